//! Settings popup flows: save the API key, disable capture on the current host.

use serde_json::{json, Value};
use tracing::info;
use url::Url;

use crate::storage::{self, KeyValueStore, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Added(String),
    AlreadyBlocked(String),
}

impl BlockOutcome {
    pub fn host(&self) -> &str {
        match self {
            BlockOutcome::Added(host) | BlockOutcome::AlreadyBlocked(host) => host,
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    InvalidUrl(String),
    Storage(StorageError),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::InvalidUrl(url) => write!(f, "page url has no hostname: {url}"),
            SettingsError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<StorageError> for SettingsError {
    fn from(e: StorageError) -> Self {
        SettingsError::Storage(e)
    }
}

pub fn save_api_key(store: &dyn KeyValueStore, key: &str) -> Result<(), SettingsError> {
    store.set(storage::API_KEY, Value::String(key.trim().to_string()))?;
    info!("API key saved");
    Ok(())
}

/// The stored key, for pre-filling the settings form.
pub fn load_api_key(store: &dyn KeyValueStore) -> Result<String, SettingsError> {
    Ok(storage::api_key(store)?.unwrap_or_default())
}

/// Add the page's hostname to the blacklist.
pub fn block_host(store: &dyn KeyValueStore, page_url: &str) -> Result<BlockOutcome, SettingsError> {
    let host = host_of(page_url)?;
    let mut list = storage::blacklist(store)?;
    if list.iter().any(|h| h == &host) {
        return Ok(BlockOutcome::AlreadyBlocked(host));
    }
    list.push(host.clone());
    store.set(storage::BLACKLIST, json!(list))?;
    info!(host = %host, "host added to blacklist");
    Ok(BlockOutcome::Added(host))
}

pub fn is_blocked(store: &dyn KeyValueStore, page_url: &str) -> Result<bool, SettingsError> {
    let host = host_of(page_url)?;
    Ok(storage::blacklist(store)?.iter().any(|h| h == &host))
}

/// Hostname of a page URL.
pub fn host_of(page_url: &str) -> Result<String, SettingsError> {
    Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| SettingsError::InvalidUrl(page_url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn saved_key_is_trimmed() {
        let store = MemoryStore::new();
        save_api_key(&store, "  sk-abc \n").unwrap();
        assert_eq!(load_api_key(&store).unwrap(), "sk-abc");
    }

    #[test]
    fn blocking_is_idempotent_per_host() {
        let store = MemoryStore::new();
        assert_eq!(
            block_host(&store, "https://example.com/a/b?c=d").unwrap(),
            BlockOutcome::Added("example.com".into())
        );
        assert_eq!(
            block_host(&store, "http://example.com/other").unwrap(),
            BlockOutcome::AlreadyBlocked("example.com".into())
        );
        assert!(is_blocked(&store, "https://example.com/").unwrap());
        assert!(!is_blocked(&store, "https://example.org/").unwrap());
        assert_eq!(storage::blacklist(&store).unwrap().len(), 1);
    }

    #[test]
    fn url_without_host_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            block_host(&store, "about:blank"),
            Err(SettingsError::InvalidUrl(_))
        ));
    }
}
