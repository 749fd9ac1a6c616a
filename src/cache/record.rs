//! Single-slot cache for the daily record
//!
//! Keeps the most recently fetched `DailyRecord` in memory and in a JSON file
//! in the cache directory. Entries are fresh for one hour; stale entries are
//! still returned so callers can show something while they refresh.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::data::DailyRecord;

/// How long a fetched record is considered fresh, in seconds
pub const RECORD_TTL_SECS: i64 = 3600;

/// File name of the durable slot inside the cache directory
const RECORD_FILE_NAME: &str = "cached_apod.json";

/// A cached record together with the time it was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordCacheEntry {
    /// The cached record
    #[serde(rename = "apod")]
    pub record: DailyRecord,
    /// When the record was fetched from the network
    pub fetched_at: DateTime<Utc>,
}

impl RecordCacheEntry {
    /// Returns `true` if the entry is no older than the TTL at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at <= Duration::seconds(RECORD_TTL_SECS)
    }

    /// Returns `true` if the entry is still fresh
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// Memory + disk cache holding at most one daily record
///
/// All errors reading the durable slot (missing file, corrupt JSON) are
/// treated as a miss; a corrupt file is removed. Disk I/O is async and
/// serialized by `durable`; the memory lock is never held across it.
#[derive(Debug)]
pub struct RecordCache {
    /// Directory holding the durable slot
    cache_dir: PathBuf,
    /// Fast in-memory copy of the slot
    memory: RwLock<Option<RecordCacheEntry>>,
    /// Serializes writers (and promoting readers) of the durable slot
    durable: Mutex<()>,
}

impl RecordCache {
    /// Creates a cache storing its durable slot in `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            memory: RwLock::new(None),
            durable: Mutex::new(()),
        }
    }

    /// Path of the durable slot
    pub fn file_path(&self) -> PathBuf {
        self.cache_dir.join(RECORD_FILE_NAME)
    }

    /// Stores `record` as fetched now, replacing any prior entry
    pub async fn put(&self, record: DailyRecord) -> bool {
        self.put_at(record, Utc::now()).await
    }

    /// Stores `record` with an explicit fetch time
    ///
    /// Returns `false` and keeps the current entry when that entry was fetched
    /// later than `fetched_at`, so out-of-order refreshes never roll the cache
    /// back.
    pub async fn put_at(&self, record: DailyRecord, fetched_at: DateTime<Utc>) -> bool {
        let _durable = self.durable.lock().await;

        let in_memory = self.memory.read().as_ref().map(|entry| entry.fetched_at);
        let on_disk = self.read_durable().await.map(|entry| entry.fetched_at);
        if in_memory.max(on_disk).is_some_and(|newest| newest > fetched_at) {
            debug!(date = %record.date, "Skipping record write older than cached entry");
            return false;
        }

        let entry = RecordCacheEntry { record, fetched_at };
        if let Err(e) = self.write_durable(&entry).await {
            warn!(error = %e, path = ?self.file_path(), "Failed to persist cached record");
        }
        debug!(date = %entry.record.date, %fetched_at, "Cached daily record");
        *self.memory.write() = Some(entry);
        true
    }

    /// Returns the cached entry, fresh or stale
    ///
    /// Checks memory first, then the durable slot. A durable entry is
    /// promoted into memory only while it is still fresh.
    pub async fn get(&self) -> Option<RecordCacheEntry> {
        let cached = self.memory.read().clone();
        if cached.is_some() {
            return cached;
        }

        let _durable = self.durable.lock().await;
        // A writer may have filled memory while we waited
        let cached = self.memory.read().clone();
        if cached.is_some() {
            return cached;
        }

        let entry = self.read_durable().await?;
        if entry.is_valid() {
            *self.memory.write() = Some(entry.clone());
        }
        Some(entry)
    }

    /// Returns `true` if a durable entry exists and is still fresh
    pub async fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now()).await
    }

    /// Same as `is_valid`, evaluated at `now`
    pub async fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.read_durable()
            .await
            .is_some_and(|entry| entry.is_valid_at(now))
    }

    /// Removes the memory and durable entries; calling it twice is harmless
    pub async fn clear(&self) {
        let _durable = self.durable.lock().await;
        *self.memory.write() = None;
        match fs::remove_file(self.file_path()).await {
            Ok(()) => debug!("Cleared cached record"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to remove cached record"),
        }
    }

    async fn write_durable(&self, entry: &RecordCacheEntry) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;

        let json = serde_json::to_string_pretty(entry)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;

        // Write then rename so a crash never leaves a half-written slot
        let tmp_path = self.cache_dir.join(format!("{}.tmp", RECORD_FILE_NAME));
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, self.file_path()).await
    }

    async fn read_durable(&self) -> Option<RecordCacheEntry> {
        read_entry(&self.file_path()).await
    }
}

async fn read_entry(path: &Path) -> Option<RecordCacheEntry> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(error = %e, ?path, "Failed to read cached record");
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(error = %e, ?path, "Discarding corrupt cached record");
            let _ = fs::remove_file(path).await;
            None
        }
    }
}
