//! Statistics cache
//!
//! Computed statistics are memoized per (form, field, date range, grouping).
//! Entries never expire; they are removed by explicit clears and rebuilt on
//! the next read or by cache regeneration.
//!
//! Two backing stores are available:
//! - [`FileStore`]: one `{md5}.cache` file per key in a directory
//! - [`ExternalStore`]: a shared key-value store with a side counter, since
//!   the store cannot enumerate its keys
//!
//! Payloads are JSON envelopes carrying a schema version. An entry written by
//! a different schema version reads as a miss.

mod file;
mod kv;

pub use file::FileStore;
pub use kv::{ExternalStore, KeyValueStore, MemoryKvStore, SqliteKvStore, COUNTER_KEY, KEY_PREFIX};

use crate::analytics::FieldStatistics;
use crate::config::{CacheConfig, StorageMethod};
use crate::error::{Error, Result};
use crate::types::DateRange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the cache envelope layout
pub const SCHEMA_VERSION: u32 = 1;

/// Identifies one cached statistics result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub form_id: i64,
    pub field_handle: String,
    pub date_range: DateRange,
    pub group_by: Option<String>,
}

impl CacheKey {
    pub fn new(
        form_id: i64,
        field_handle: impl Into<String>,
        date_range: DateRange,
        group_by: Option<&str>,
    ) -> Self {
        Self {
            form_id,
            field_handle: field_handle.into(),
            date_range,
            group_by: group_by.filter(|g| !g.is_empty()).map(str::to_string),
        }
    }

    /// `{formId}-{fieldHandle}-{dateRange}[-{groupBy}]`
    pub fn raw(&self) -> String {
        let mut key = format!(
            "{}-{}-{}",
            self.form_id,
            self.field_handle,
            self.date_range.as_str()
        );
        if let Some(group_by) = &self.group_by {
            key.push('-');
            key.push_str(group_by);
        }
        key
    }

    /// Lowercase hex MD5 of [`CacheKey::raw`]
    pub fn digest(&self) -> String {
        format!("{:x}", md5::compute(self.raw()))
    }

    pub fn file_name(&self) -> String {
        format!("{}.cache", self.digest())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw())
    }
}

/// Stored form of a cached result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub schema_version: u32,
    pub stored_at: DateTime<Utc>,
    pub result: FieldStatistics,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeHeader {
    schema_version: u32,
}

impl CacheEntry {
    pub fn new(result: FieldStatistics) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            stored_at: Utc::now(),
            result,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a payload; `Ok(None)` when it was written by another schema version.
    pub fn decode(payload: &[u8]) -> Result<Option<CacheEntry>> {
        let header: EnvelopeHeader = serde_json::from_slice(payload)?;
        if header.schema_version != SCHEMA_VERSION {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(payload)?))
    }
}

/// Diagnostics about a cache store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    /// "file" or "external"
    pub storage: String,
    /// Directory or database file
    pub location: String,
    pub entries: usize,
}

/// A backing store for encoded cache entries
pub trait CacheStore: Send + Sync {
    /// Storage method name ("file", "external")
    fn name(&self) -> &'static str;

    /// Where the entries live, for diagnostics
    fn location(&self) -> String;

    fn load(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    fn store(&self, key: &CacheKey, payload: &[u8]) -> Result<()>;

    /// Remove every entry. `Ok(false)` when some entries could not be removed.
    fn clear(&self) -> Result<bool>;

    fn count(&self) -> Result<usize>;
}

/// Statistics cache over a pluggable [`CacheStore`].
///
/// Reads never fail: read and decode errors are logged and reported as a
/// miss. There is no locking; concurrent writers race and the last write wins.
pub struct StatisticsCache {
    store: Box<dyn CacheStore>,
}

impl StatisticsCache {
    pub fn new(store: impl CacheStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Build the store selected by configuration
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        match config.storage {
            StorageMethod::File => Ok(Self::new(FileStore::new(config.file_dir()))),
            StorageMethod::External => {
                let kv = SqliteKvStore::open(&config.external_store_path())?;
                Ok(Self::new(ExternalStore::new(kv)))
            }
        }
    }

    /// Cache backed by process memory, for tests and one-off runs
    pub fn in_memory() -> Self {
        Self::new(ExternalStore::new(MemoryKvStore::new()))
    }

    pub fn get(&self, key: &CacheKey) -> Option<FieldStatistics> {
        let payload = match self.store.load(key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read cache entry");
                return None;
            }
        };

        match CacheEntry::decode(&payload) {
            Ok(Some(entry)) => Some(entry.result),
            Ok(None) => {
                tracing::debug!(key = %key, "Ignoring cache entry from another schema version");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to decode cache entry");
                None
            }
        }
    }

    pub fn put(&self, key: &CacheKey, result: &FieldStatistics) -> Result<()> {
        let payload = CacheEntry::new(result.clone()).encode()?;
        match self.store.store(key, &payload) {
            Ok(()) => {
                tracing::info!(
                    key = %key,
                    file = %key.file_name(),
                    storage = self.store.name(),
                    "Cache saved"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to save cache");
                Err(Error::CacheWrite(format!("{}: {}", key, e)))
            }
        }
    }

    /// Clear entries for a form.
    ///
    /// Keys are one-way hashes and cannot be filtered by form, so this clears
    /// the whole store.
    pub fn clear_form(&self, form_id: i64) -> bool {
        tracing::info!(form_id, "Clearing statistics cache for form (all entries)");
        self.clear_all()
    }

    pub fn clear_all(&self) -> bool {
        match self.store.clear() {
            Ok(cleared) => {
                if !cleared {
                    tracing::warn!(storage = self.store.name(), "Some cache entries could not be removed");
                }
                cleared
            }
            Err(e) => {
                tracing::error!(storage = self.store.name(), error = %e, "Failed to clear cache");
                false
            }
        }
    }

    /// Number of live entries; `0` if the store cannot be read.
    pub fn count(&self) -> usize {
        self.store.count().unwrap_or_else(|e| {
            tracing::error!(storage = self.store.name(), error = %e, "Failed to count cache entries");
            0
        })
    }

    pub fn info(&self) -> CacheInfo {
        CacheInfo {
            storage: self.store.name().to_string(),
            location: self.store.location(),
            entries: self.count(),
        }
    }
}
