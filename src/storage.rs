//! Key-value storage collaborator: API key and per-host blacklist.
//! The browser's extension storage sits behind `KeyValueStore`; an in-memory
//! store and a SQLite-backed store are provided for headless hosts.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const API_KEY: &str = "apiKey";
pub const BLACKLIST: &str = "blacklist";

#[derive(Debug)]
pub enum StorageError {
    Backend(String),
    Decode { key: String, reason: String },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Backend(msg) => write!(f, "storage backend error: {msg}"),
            StorageError::Decode { key, reason } => {
                write!(f, "stored value for {key} is malformed: {reason}")
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// JSON-valued key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

/// The stored API key, `None` when absent or blank.
pub fn api_key(store: &dyn KeyValueStore) -> Result<Option<String>, StorageError> {
    match store.get(API_KEY)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(key)) => {
            let key = key.trim();
            Ok((!key.is_empty()).then(|| key.to_string()))
        }
        Some(other) => Err(StorageError::Decode {
            key: API_KEY.into(),
            reason: format!("expected string, got {other}"),
        }),
    }
}

/// Hostnames on which capture is disabled.
pub fn blacklist(store: &dyn KeyValueStore) -> Result<Vec<String>, StorageError> {
    match store.get(BLACKLIST)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value).map_err(|e| StorageError::Decode {
            key: BLACKLIST.into(),
            reason: e.to_string(),
        }),
    }
}

/// Process-local store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// SQLite-backed store; values are kept as JSON text.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        info!(path = %db_path.display(), "SQLite settings store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!(key, error = %e, "stored setting is not valid JSON");
                    Err(StorageError::Decode {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })
                }
            },
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value.to_string(), now_unix()],
        )?;
        debug!(key, "setting stored");
        Ok(())
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_api_key_reads_as_absent() {
        let store = MemoryStore::new();
        assert_eq!(api_key(&store).unwrap(), None);
        store.set(API_KEY, json!("   ")).unwrap();
        assert_eq!(api_key(&store).unwrap(), None);
        store.set(API_KEY, json!(" sk-test ")).unwrap();
        assert_eq!(api_key(&store).unwrap().as_deref(), Some("sk-test"));
    }

    #[test]
    fn non_string_api_key_is_a_decode_error() {
        let store = MemoryStore::new();
        store.set(API_KEY, json!(42)).unwrap();
        assert!(matches!(api_key(&store), Err(StorageError::Decode { .. })));
    }

    #[test]
    fn sqlite_store_round_trips_blacklist() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(blacklist(&store).unwrap().is_empty());
        store
            .set(BLACKLIST, json!(["example.com", "news.ycombinator.com"]))
            .unwrap();
        assert_eq!(
            blacklist(&store).unwrap(),
            vec!["example.com".to_string(), "news.ycombinator.com".to_string()]
        );
    }

    #[test]
    fn sqlite_store_overwrites_existing_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set(API_KEY, json!("old")).unwrap();
        store.set(API_KEY, json!("new")).unwrap();
        assert_eq!(api_key(&store).unwrap().as_deref(), Some("new"));
    }
}
