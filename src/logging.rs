//! Tracing setup. `RUST_LOG` wins over the default filter.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "comfy_trans=debug,reqwest=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Returns false if one was already set
/// (the host or a test installed its own).
pub fn init(json: bool) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true)
        .with_thread_ids(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_refused() {
        init(false);
        assert!(!init(true));
    }
}
