//! In-memory translation cache
//!
//! Keys are the target language plus a SHA-256 digest of the full source text,
//! so two different texts never share an entry. Entries live for the process
//! lifetime; nothing is persisted.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Maximum number of translations kept in memory
pub const TRANSLATION_CACHE_CAPACITY: usize = 512;

/// Cache key for a translated fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranslationKey {
    language: String,
    digest: [u8; 32],
}

impl TranslationKey {
    /// Keys `text` by its SHA-256 digest under `target_language`
    pub fn new(text: &str, target_language: &str) -> Self {
        Self {
            language: target_language.to_string(),
            digest: Sha256::digest(text.as_bytes()).into(),
        }
    }
}

/// Bounded LRU of translated text, shared behind a mutex
///
/// ```
/// use cosmicdaily::cache::{TranslationCache, TranslationKey};
///
/// let cache = TranslationCache::new(8);
/// let key = TranslationKey::new("Galaxy", "tr");
/// cache.insert(key.clone(), "Galaksi".to_string());
/// assert_eq!(cache.get(&key).as_deref(), Some("Galaksi"));
/// ```
pub struct TranslationCache {
    inner: Mutex<LruCache<TranslationKey, String>>,
}

impl TranslationCache {
    /// Creates a cache holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached translation and marks it recently used
    pub fn get(&self, key: &TranslationKey) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    /// Stores a translation, evicting the least recently used entry when full
    pub fn insert(&self, key: TranslationKey, translated_text: String) {
        self.inner.lock().put(key, translated_text);
    }

    /// Drops every entry
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of cached translations
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(TRANSLATION_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for TranslationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationCache")
            .field("entries", &self.len())
            .finish()
    }
}
