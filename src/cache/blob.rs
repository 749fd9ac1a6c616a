//! Two-tier cache for image bytes keyed by source URL
//!
//! The memory tier is an LRU bounded by entry count and total bytes. The disk
//! tier is a directory with one file per URL. Every disk operation runs on a
//! single background task ("disk lane") in the order it was queued, so a
//! write always lands before a later read of the same key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Default maximum number of blobs kept in memory
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Default maximum total size of blobs kept in memory (100 MB)
pub const DEFAULT_MAX_BYTES: usize = 100 * 1024 * 1024;

/// Directory name of the disk tier inside the cache directory
pub const BLOB_DIR_NAME: &str = "CachedImages";

/// Longest file stem used before switching to a hashed suffix
const MAX_FILE_STEM_BYTES: usize = 150;

/// Bounds for the memory tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLimits {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Maximum total payload size in bytes
    pub max_bytes: usize,
}

impl Default for BlobLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// LRU of payloads with a running byte total
struct MemoryTier {
    entries: LruCache<String, Bytes>,
    total_bytes: usize,
    limits: BlobLimits,
    /// Bumped by every `put` and `clear`; a disk read that saw an older value
    /// must not overwrite memory
    writes: u64,
}

impl MemoryTier {
    fn new(limits: BlobLimits) -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_bytes: 0,
            limits,
            writes: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Bytes> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: &str, data: Bytes) {
        if let Some(old) = self.entries.pop(key) {
            self.total_bytes -= old.len();
        }

        if data.len() > self.limits.max_bytes || self.limits.max_entries == 0 {
            debug!(key, size = data.len(), "Blob too large for memory tier");
            return;
        }

        self.total_bytes += data.len();
        self.entries.put(key.to_string(), data);

        while self.entries.len() > self.limits.max_entries
            || self.total_bytes > self.limits.max_bytes
        {
            match self.entries.pop_lru() {
                Some((evicted, old)) => {
                    self.total_bytes -= old.len();
                    debug!(key = %evicted, "Evicted blob from memory tier");
                }
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
        self.writes += 1;
    }
}

/// Work item for the disk lane
enum DiskOp {
    Write { path: PathBuf, data: Bytes },
    Read { path: PathBuf, reply: oneshot::Sender<Option<Bytes>> },
    Clear { reply: oneshot::Sender<usize> },
    Flush { reply: oneshot::Sender<()> },
}

/// Handle to the blob cache
///
/// Cloning is cheap; all clones share the same memory tier and disk lane.
/// Must be created from within a Tokio runtime because it spawns the disk
/// lane task.
#[derive(Clone)]
pub struct BlobCache {
    dir: PathBuf,
    memory: Arc<Mutex<MemoryTier>>,
    disk: mpsc::UnboundedSender<DiskOp>,
}

impl BlobCache {
    /// Creates a cache whose disk tier lives in `dir`
    pub fn new(dir: impl Into<PathBuf>, limits: BlobLimits) -> Self {
        let dir = dir.into();
        let (disk, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_disk_lane(dir.clone(), rx));

        Self {
            dir,
            memory: Arc::new(Mutex::new(MemoryTier::new(limits))),
            disk,
        }
    }

    /// Directory holding the disk tier
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stores `data` under `key`
    ///
    /// The memory tier is updated before returning; the disk write is queued
    /// and lands later.
    pub fn put(&self, key: &str, data: Bytes) {
        let path = self.path_for(key);
        let mut memory = self.memory.lock();
        memory.writes += 1;
        memory.insert(key, data.clone());

        // Queued under the lock so memory and disk see puts in the same order
        if self.disk.send(DiskOp::Write { path, data }).is_err() {
            warn!(key, "Blob disk lane is closed; write dropped");
        }
    }

    /// Memory-only lookup, never touches disk
    pub fn get_cached(&self, key: &str) -> Option<Bytes> {
        self.memory.lock().get(key)
    }

    /// Looks up `key` in memory, then on disk
    ///
    /// A disk hit is promoted into the memory tier unless a `put` or `clear`
    /// ran while the read was queued; then the memory copy wins.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let writes_seen = {
            let mut memory = self.memory.lock();
            if let Some(data) = memory.get(key) {
                return Some(data);
            }
            memory.writes
        };

        let (reply, rx) = oneshot::channel();
        let path = self.path_for(key);
        self.disk.send(DiskOp::Read { path, reply }).ok()?;
        let data = rx.await.ok().flatten();

        let mut memory = self.memory.lock();
        if memory.writes != writes_seen {
            debug!(key, "Blob changed during disk read; skipping promotion");
            return memory.get(key).or(data);
        }

        let data = data?;
        debug!(key, size = data.len(), "Promoted blob from disk");
        memory.insert(key, data.clone());
        Some(data)
    }

    /// Drops every memory entry and deletes every file in the disk tier
    ///
    /// Returns the number of files removed.
    pub async fn clear(&self) -> usize {
        self.memory.lock().clear();

        let (reply, rx) = oneshot::channel();
        if self.disk.send(DiskOp::Clear { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Waits until every disk operation queued so far has completed
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.disk.send(DiskOp::Flush { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Number of entries currently in the memory tier
    pub fn memory_len(&self) -> usize {
        self.memory.lock().entries.len()
    }

    /// Total payload bytes currently in the memory tier
    pub fn memory_bytes(&self) -> usize {
        self.memory.lock().total_bytes
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name_for(key))
    }
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCache")
            .field("dir", &self.dir)
            .field("memory_entries", &self.memory_len())
            .finish()
    }
}

/// Maps a URL to a file name in the disk tier
///
/// Path separators, `:`, `.` and other characters that are unsafe in file
/// names become `_`. Very long names keep a prefix and gain a SHA-256 suffix
/// of the full key.
pub fn file_name_for(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| match c {
            '/' | ':' | '.' | '\\' | '?' | '&' | '=' | '#' | '%' | '*' | '"' | '<' | '>' | '|' => {
                '_'
            }
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    if safe.len() <= MAX_FILE_STEM_BYTES {
        return format!("{}.jpg", safe);
    }

    let mut cut = MAX_FILE_STEM_BYTES;
    while !safe.is_char_boundary(cut) {
        cut -= 1;
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}_{}.jpg", &safe[..cut], &digest[..16])
}

async fn run_disk_lane(dir: PathBuf, mut rx: mpsc::UnboundedReceiver<DiskOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            DiskOp::Write { path, data } => {
                if let Err(e) = write_blob(&dir, &path, &data).await {
                    warn!(error = %e, ?path, "Failed to persist blob");
                }
            }
            DiskOp::Read { path, reply } => {
                let data = match tokio::fs::read(&path).await {
                    Ok(data) => Some(Bytes::from(data)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => {
                        warn!(error = %e, ?path, "Failed to read blob");
                        None
                    }
                };
                let _ = reply.send(data);
            }
            DiskOp::Clear { reply } => {
                let removed = clear_dir(&dir).await;
                debug!(removed, "Cleared blob directory");
                let _ = reply.send(removed);
            }
            DiskOp::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }
    debug!("Blob disk lane stopped");
}

async fn write_blob(dir: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, data).await
}

async fn clear_dir(dir: &Path) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(error = %e, path = ?entry.path(), "Failed to remove blob"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to list blob directory");
                break;
            }
        }
    }
    removed
}
