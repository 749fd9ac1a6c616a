//! Application wiring for Cosmic Daily
//!
//! `App` owns the caches and clients and is the only place they are
//! constructed. Front ends talk to `App`; they never touch a cache directly
//! except for the read-only accessors used in tests.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Local;
use tokio::sync::watch;
use tracing::info;

use crate::cache::{BlobCache, RecordCache, BLOB_DIR_NAME};
use crate::config::AppConfig;
use crate::data::{
    ApodClient, ApodError, DailyRecord, ImageClient, ImageError, TranslationClient,
    TranslationError,
};
use crate::orchestrator::{FetchOrchestrator, FetchOutcome, FetchState, RecordError};

/// Main application handle
///
/// Must be created inside a Tokio runtime; the blob cache starts its disk
/// task on construction.
pub struct App {
    record_cache: Arc<RecordCache>,
    blob_cache: BlobCache,
    orchestrator: FetchOrchestrator,
    apod_client: ApodClient,
    translation_client: TranslationClient,
}

impl App {
    /// Builds every cache and client from `config`
    pub fn new(config: &AppConfig) -> Self {
        let record_cache = Arc::new(RecordCache::new(&config.cache_dir));
        let blob_cache = BlobCache::new(config.cache_dir.join(BLOB_DIR_NAME), config.blob_limits);

        let apod_client = ApodClient::with_base_url(
            config.apod_base_url.clone(),
            config.api_key.clone(),
            config.request_timeout,
        );
        let orchestrator = FetchOrchestrator::new(
            record_cache.clone(),
            blob_cache.clone(),
            apod_client.clone(),
            ImageClient::new(config.request_timeout),
        );
        let translation_client =
            TranslationClient::with_base_url(config.translate_base_url.clone(), config.request_timeout);

        Self {
            record_cache,
            blob_cache,
            orchestrator,
            apod_client,
            translation_client,
        }
    }

    /// Returns today's record, from cache or network
    pub async fn fetch_record(&self, force_refresh: bool) -> Result<FetchOutcome, RecordError> {
        self.orchestrator.fetch_record(force_refresh).await
    }

    /// Image bytes already in memory, without touching disk or network
    pub fn get_cached_image_bytes(&self, url: &str) -> Option<Bytes> {
        self.blob_cache.get_cached(url)
    }

    /// Image bytes from the blob cache, downloading on a miss
    pub async fn load_image_bytes(&self, url: &str) -> Result<Bytes, ImageError> {
        self.orchestrator.load_image_bytes(url).await
    }

    /// Clears the record and blob caches; returns the number of image files removed
    pub async fn clear_all_caches(&self) -> usize {
        self.record_cache.clear().await;
        let removed = self.blob_cache.clear().await;
        info!(removed, "Cleared caches");
        removed
    }

    /// Translates `text` into `language`
    pub async fn translate(&self, text: &str, language: &str) -> Result<String, TranslationError> {
        self.translation_client.translate(text, language).await
    }

    /// Records of the `days` days before today, newest first; not cached
    pub async fn fetch_history(&self, days: u32) -> Result<Vec<DailyRecord>, ApodError> {
        let today = Local::now().date_naive();
        self.apod_client.fetch_history(today, days).await
    }

    /// `count` randomly chosen records, newest first; not cached
    pub async fn fetch_random(&self, count: u32) -> Result<Vec<DailyRecord>, ApodError> {
        self.apod_client.fetch_random(count).await
    }

    /// Subscribes to orchestrator state changes
    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.orchestrator.subscribe()
    }

    /// Waits for background refreshes, pre-fetches and disk writes
    pub async fn settle(&self) {
        self.orchestrator.settle().await;
    }

    /// The shared record cache
    pub fn record_cache(&self) -> &RecordCache {
        &self.record_cache
    }

    /// Handle to the image blob cache
    pub fn blob_cache(&self) -> &BlobCache {
        &self.blob_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MediaType;
    use tempfile::TempDir;

    fn create_test_app() -> (App, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = AppConfig::with_cache_dir(temp_dir.path());
        config.apod_base_url = "http://127.0.0.1:9/apod".to_string();
        (App::new(&config), temp_dir)
    }

    fn record() -> DailyRecord {
        DailyRecord {
            date: "2024-01-01".to_string(),
            title: "X".to_string(),
            explanation: "Y".to_string(),
            media_type: MediaType::Image,
            url: "http://x/img.jpg".to_string(),
            hd_url: None,
            copyright: None,
            service_version: "v1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_blob_cache_lives_under_cache_dir() {
        let (app, temp_dir) = create_test_app();
        assert_eq!(app.blob_cache().dir(), temp_dir.path().join("CachedImages"));
    }

    #[tokio::test]
    async fn test_cached_image_bytes_reads_memory_tier() {
        let (app, _temp_dir) = create_test_app();
        assert!(app.get_cached_image_bytes("http://x/img.jpg").is_none());

        app.blob_cache().put("http://x/img.jpg", Bytes::from_static(b"jpeg"));

        assert_eq!(
            app.get_cached_image_bytes("http://x/img.jpg"),
            Some(Bytes::from_static(b"jpeg"))
        );
    }

    #[tokio::test]
    async fn test_clear_all_caches() {
        let (app, _temp_dir) = create_test_app();
        app.record_cache().put(record()).await;
        app.blob_cache().put("http://x/img.jpg", Bytes::from_static(b"jpeg"));

        let removed = app.clear_all_caches().await;

        assert_eq!(removed, 1);
        assert!(app.record_cache().get().await.is_none());
        assert!(app.get_cached_image_bytes("http://x/img.jpg").is_none());
    }

    #[tokio::test]
    async fn test_fetch_record_serves_cache_without_network() {
        let (app, _temp_dir) = create_test_app();
        app.record_cache().put(record()).await;

        let outcome = app.fetch_record(false).await.expect("Should serve cache");

        assert_eq!(outcome.record, record());
        assert!(!outcome.is_stale());
    }
}
