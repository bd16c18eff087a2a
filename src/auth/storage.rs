//! Durable credential storage: trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key under which the bearer token is persisted.
pub const TOKEN_KEY: &str = "auth_token";

/// Trait for durable key/value stores holding client credentials.
pub trait TokenStore: Send + Sync {
  fn load(&self, key: &str) -> Result<Option<String>>;

  fn save(&self, key: &str, value: &str) -> Result<()>;

  fn remove(&self, key: &str) -> Result<()>;
}

/// Store that lives only as long as the process. Used for tests and
/// `--ephemeral` sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl TokenStore for MemoryTokenStore {
  fn load(&self, key: &str) -> Result<Option<String>> {
    let values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(values.get(key).cloned())
  }

  fn save(&self, key: &str, value: &str) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    values.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    values.remove(key);
    Ok(())
  }
}

/// SQLite-based credential storage.
pub struct SqliteTokenStore {
  conn: Mutex<Connection>,
}

impl SqliteTokenStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create credential directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open credential database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory credential database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("recruitdesk").join("credentials.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CREDENTIAL_SCHEMA)
      .map_err(|e| eyre!("Failed to run credential migrations: {}", e))?;

    Ok(())
  }
}

const CREDENTIAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl TokenStore for SqliteTokenStore {
  fn load(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM credentials WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read credential {}: {}", key, e))
  }

  fn save(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO credentials (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to store credential {}: {}", key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM credentials WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove credential {}: {}", key, e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sqlite_round_trip_and_remove() {
    let store = SqliteTokenStore::open_in_memory().unwrap();
    assert_eq!(store.load(TOKEN_KEY).unwrap(), None);

    store.save(TOKEN_KEY, "first").unwrap();
    store.save(TOKEN_KEY, "second").unwrap();
    assert_eq!(store.load(TOKEN_KEY).unwrap().as_deref(), Some("second"));

    store.remove(TOKEN_KEY).unwrap();
    assert_eq!(store.load(TOKEN_KEY).unwrap(), None);
  }

  #[test]
  fn test_sqlite_persists_across_reopen() {
    let dir = std::env::temp_dir().join(format!("recruitdesk-test-{}", std::process::id()));
    let path = dir.join("credentials.db");

    SqliteTokenStore::open_at(&path)
      .unwrap()
      .save(TOKEN_KEY, "persisted")
      .unwrap();
    let reopened = SqliteTokenStore::open_at(&path).unwrap();
    assert_eq!(reopened.load(TOKEN_KEY).unwrap().as_deref(), Some("persisted"));

    let _ = std::fs::remove_dir_all(dir);
  }

  #[test]
  fn test_memory_store() {
    let store = MemoryTokenStore::new();
    store.save("k", "v").unwrap();
    assert_eq!(store.load("k").unwrap().as_deref(), Some("v"));
    store.remove("k").unwrap();
    assert!(store.load("k").unwrap().is_none());
  }
}
