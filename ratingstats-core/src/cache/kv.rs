//! External key-value cache store.
//!
//! The store offers get/set/flush plus integer counters, but no way to count
//! keys, so the number of entries is tracked in a side counter.

use super::{CacheKey, CacheStore};
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Prefix of entry keys in the external store
pub const KEY_PREFIX: &str = "rating-stats-";

/// Side counter tracking the number of stored entries
pub const COUNTER_KEY: &str = "rating-stats-cache-count";

/// Minimal key-value backend
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove every entry
    fn flush(&self) -> Result<()>;

    /// Increment a counter, returning the new value
    fn incr(&self, counter: &str) -> Result<i64>;

    fn reset_counter(&self, counter: &str) -> Result<()>;

    fn counter(&self, counter: &str) -> Result<i64>;

    /// Where the data lives, for diagnostics
    fn location(&self) -> String;
}

/// [`CacheStore`] over an external key-value backend
pub struct ExternalStore<K: KeyValueStore> {
    kv: K,
}

impl<K: KeyValueStore> ExternalStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    pub fn entry_key(key: &CacheKey) -> String {
        format!("{}{}", KEY_PREFIX, key.digest())
    }

    pub fn backend(&self) -> &K {
        &self.kv
    }
}

impl<K: KeyValueStore> CacheStore for ExternalStore<K> {
    fn name(&self) -> &'static str {
        "external"
    }

    fn location(&self) -> String {
        self.kv.location()
    }

    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        self.kv.get(&Self::entry_key(key))
    }

    fn store(&self, key: &CacheKey, payload: &[u8]) -> Result<()> {
        self.kv.set(&Self::entry_key(key), payload)?;
        self.kv.incr(COUNTER_KEY)?;
        Ok(())
    }

    fn clear(&self) -> Result<bool> {
        self.kv.reset_counter(COUNTER_KEY)?;
        self.kv.flush()?;
        Ok(true)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.kv.counter(COUNTER_KEY)?.max(0) as usize)
    }
}

// ============================================
// In-memory backend
// ============================================

#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    counters: Mutex<HashMap<String, i64>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }

    fn incr(&self, counter: &str) -> Result<i64> {
        let mut counters = self.counters.lock().unwrap();
        let value = counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    fn reset_counter(&self, counter: &str) -> Result<()> {
        self.counters.lock().unwrap().insert(counter.to_string(), 0);
        Ok(())
    }

    fn counter(&self, counter: &str) -> Result<i64> {
        Ok(self.counters.lock().unwrap().get(counter).copied().unwrap_or(0))
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

// ============================================
// SQLite backend
// ============================================

/// Key-value backend in a SQLite file shared by every process on the host
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteKvStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE TABLE IF NOT EXISTS kv_counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM kv_entries", [])?;
        Ok(())
    }

    fn incr(&self, counter: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let value = conn.query_row(
            r#"
            INSERT INTO kv_counters (name, value) VALUES (?1, 1)
            ON CONFLICT(name) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
            params![counter],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    fn reset_counter(&self, counter: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO kv_counters (name, value) VALUES (?1, 0)
            ON CONFLICT(name) DO UPDATE SET value = 0
            "#,
            params![counter],
        )?;
        Ok(())
    }

    fn counter(&self, counter: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM kv_counters WHERE name = ?1",
                params![counter],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    fn location(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }
}
