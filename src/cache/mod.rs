//! Local caches for APOD data
//!
//! - `RecordCache`: single-slot memory + JSON file cache for today's record,
//!   fresh for one hour but still served when stale.
//! - `BlobCache`: image bytes keyed by URL, bounded LRU in memory backed by a
//!   directory on disk.
//! - `TranslationCache`: in-memory translations, never persisted.
//!
//! Cache errors never escape this module; they are logged and treated as a
//! miss.

mod blob;
mod record;
mod translation;

pub use blob::{file_name_for, BlobCache, BlobLimits, BLOB_DIR_NAME, DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES};
pub use record::{RecordCache, RecordCacheEntry, RECORD_TTL_SECS};
pub use translation::{TranslationCache, TranslationKey, TRANSLATION_CACHE_CAPACITY};
