//! Google Translate client with an in-memory cache
//!
//! Uses the keyless `translate_a/single` endpoint. Results are cached per
//! (target language, text) for the lifetime of the process.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::apod::{build_http_client, TimedClient};
use crate::cache::{TranslationCache, TranslationKey};

/// Base URL for the translation endpoint
pub const TRANSLATE_BASE_URL: &str = "https://translate.googleapis.com/translate_a/single";

/// A language the explanation can be translated into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    /// ISO 639-1 code sent to the translation endpoint
    pub code: &'static str,
    /// Name in the language itself
    pub name: &'static str,
    /// Name in English
    pub english_name: &'static str,
}

/// Target languages offered to users
pub const SUPPORTED_LANGUAGES: &[Language] = &[
    Language { code: "tr", name: "Türkçe", english_name: "Turkish" },
    Language { code: "es", name: "Español", english_name: "Spanish" },
    Language { code: "fr", name: "Français", english_name: "French" },
    Language { code: "de", name: "Deutsch", english_name: "German" },
    Language { code: "it", name: "Italiano", english_name: "Italian" },
    Language { code: "pt", name: "Português", english_name: "Portuguese" },
    Language { code: "ru", name: "Русский", english_name: "Russian" },
    Language { code: "ja", name: "日本語", english_name: "Japanese" },
    Language { code: "zh", name: "中文", english_name: "Chinese" },
    Language { code: "ko", name: "한국어", english_name: "Korean" },
    Language { code: "hi", name: "हिन्दी", english_name: "Hindi" },
];

/// Looks up a supported language by code (case-insensitive)
pub fn find_language(code: &str) -> Option<&'static Language> {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|lang| lang.code.eq_ignore_ascii_case(code.trim()))
}

/// Errors that can occur when translating text
#[derive(Debug, Error)]
pub enum TranslationError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Translation service returned status {0}")]
    Status(u16),

    /// Body was not JSON
    #[error("Failed to parse translation response: {0}")]
    Parse(#[from] serde_json::Error),

    /// JSON did not have the expected nested array shape
    #[error("Unexpected translation response shape")]
    Malformed,

    /// Service answered but produced no text
    #[error("Translation returned an empty result")]
    Empty,
}

/// Client for translating text, backed by a `TranslationCache`
#[derive(Debug, Clone)]
pub struct TranslationClient {
    http_client: TimedClient,
    base_url: String,
    cache: Arc<TranslationCache>,
}

impl TranslationClient {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(TRANSLATE_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client: build_http_client(timeout),
            base_url: base_url.into(),
            cache: Arc::new(TranslationCache::default()),
        }
    }

    /// Translates `text` into `target_language`
    ///
    /// Returns the cached translation when one exists. Otherwise calls the
    /// service once (no retries) and caches a successful result.
    pub async fn translate(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<String, TranslationError> {
        let key = TranslationKey::new(text, target_language);
        if let Some(cached) = self.cache.get(&key) {
            debug!(language = target_language, "Translation cache hit");
            return Ok(cached);
        }

        let translated = self.fetch_translation(text, target_language).await?;
        self.cache.insert(key, translated.clone());
        Ok(translated)
    }

    /// Drops every cached translation
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of cached translations
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    async fn fetch_translation(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<String, TranslationError> {
        let url = format!(
            "{}?client=gtx&sl=auto&tl={}&dt=t&q={}",
            self.base_url,
            urlencoding::encode(target_language),
            urlencoding::encode(text)
        );

        debug!(language = target_language, chars = text.len(), "Requesting translation");
        let response = self.http_client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslationError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let json: Value = serde_json::from_str(&body)?;
        parse_translation(&json)
    }
}

/// Joins the translated segments of a `translate_a/single` response
///
/// The first top-level element is an array of segments; the first element of
/// each segment is the translated text for that segment.
fn parse_translation(json: &Value) -> Result<String, TranslationError> {
    let segments = json
        .get(0)
        .and_then(Value::as_array)
        .ok_or(TranslationError::Malformed)?;

    let translated: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();

    if translated.is_empty() {
        return Err(TranslationError::Empty);
    }

    Ok(translated)
}
