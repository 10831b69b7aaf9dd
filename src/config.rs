//! Runtime configuration: endpoint, model, debounce delays, sizing and UI strings.
//! Loaded from a JSON file; every field has a default so a partial file is fine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Environment override for the completion endpoint base URL.
pub const ENV_API_BASE: &str = "COMFY_TRANS_API_BASE";
/// Environment override for the default completion model.
pub const ENV_MODEL: &str = "COMFY_TRANS_MODEL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the chat-completion API, without the `/v1/...` path.
    pub api_base: String,
    pub default_model: String,
    pub request_timeout_secs: u64,
    /// Language the reader wants translations in.
    pub target_language: String,
    /// Debounce after a mouse-up selection.
    pub mouseup_delay_ms: u64,
    /// Debounce after the keyboard shortcut.
    pub shortcut_delay_ms: u64,
    pub shortcut_key: String,
    pub cache_capacity: usize,
    /// Recompute the overlay width every N explanation fragments.
    pub width_refresh_every: usize,
    pub speech_rate: f32,
    pub speech_min_interval_ms: u64,
    pub page_context: PageContext,
    pub messages: Messages,
}

/// Opt-in summary of the page, computed once and added to translation prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageContext {
    pub enabled: bool,
    /// Cheaper model used for the one-off summary.
    pub model: String,
    /// Leading characters of page text sent for the summary.
    pub max_chars: usize,
}

/// User-facing strings rendered into the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub missing_key: String,
    pub invalid_key: String,
    pub translation_failed: String,
    pub loading: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com".into(),
            default_model: "gpt-4-turbo".into(),
            request_timeout_secs: 60,
            target_language: "Simplified Chinese".into(),
            mouseup_delay_ms: 1500,
            shortcut_delay_ms: 300,
            shortcut_key: "t".into(),
            cache_capacity: 256,
            width_refresh_every: 8,
            speech_rate: 0.9,
            speech_min_interval_ms: 300,
            page_context: PageContext::default(),
            messages: Messages::default(),
        }
    }
}

impl Default for PageContext {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-3.5-turbo".into(),
            max_chars: 1000,
        }
    }
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            missing_key: "please configure API key".into(),
            invalid_key: "API key format is invalid".into(),
            translation_failed: "translation failed, please retry".into(),
            loading: "translating...".into(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl Config {
    /// Load from a JSON file, then apply environment overrides.
    /// A missing file falls back to defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str::<Config>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.apply_env(|name| std::env::var(name).ok());
        info!(api_base = %config.api_base, model = %config.default_model, "config loaded");
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base) = lookup(ENV_API_BASE).filter(|v| !v.trim().is_empty()) {
            self.api_base = base.trim().to_string();
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            self.default_model = model.trim().to_string();
        }
    }

    pub fn mouseup_delay(&self) -> Duration {
        Duration::from_millis(self.mouseup_delay_ms)
    }

    pub fn shortcut_delay(&self) -> Duration {
        Duration::from_millis(self.shortcut_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn speech_min_interval(&self) -> Duration {
        Duration::from_millis(self.speech_min_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"default_model":"gpt-4o","messages":{"loading":"..."}}"#)
                .unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.mouseup_delay_ms, 1500);
        assert_eq!(config.messages.loading, "...");
        assert_eq!(config.messages.missing_key, "please configure API key");
        assert!(!config.page_context.enabled);
    }

    #[test]
    fn page_context_section_fills_missing_fields() {
        let config: Config = serde_json::from_str(r#"{"page_context":{"enabled":true}}"#).unwrap();
        assert!(config.page_context.enabled);
        assert_eq!(config.page_context.model, "gpt-3.5-turbo");
        assert_eq!(config.page_context.max_chars, 1000);
    }

    #[test]
    fn env_overrides_endpoint_and_model() {
        let mut config = Config::default();
        config.apply_env(|name| match name {
            ENV_API_BASE => Some("http://127.0.0.1:9999".into()),
            ENV_MODEL => Some("  ".into()),
            _ => None,
        });
        assert_eq!(config.api_base, "http://127.0.0.1:9999");
        assert_eq!(config.default_model, "gpt-4-turbo");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Path::new("/nonexistent/comfy-trans.json")).unwrap();
        assert_eq!(config.shortcut_key, "t");
    }
}
