//! End-to-end fetch scenarios against a mocked APOD server
//!
//! Each test gets its own cache directory and `MockServer`; call counts are
//! checked by wiremock when the server is dropped.

use std::time::Duration;

use chrono::{Days, Local, Utc};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cosmicdaily::app::App;
use cosmicdaily::cache::file_name_for;
use cosmicdaily::config::AppConfig;
use cosmicdaily::data::{DailyRecord, MediaType};
use cosmicdaily::orchestrator::{FetchState, RecordError, RecordSource};

const APOD_PATH: &str = "/planetary/apod";
const IMAGE_BYTES: &[u8] = b"\xFF\xD8\xFFfake jpeg";

fn create_app(server: &MockServer) -> (App, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let mut config = AppConfig::with_cache_dir(temp_dir.path());
    config.apod_base_url = format!("{}{}", server.uri(), APOD_PATH);
    config.api_key = "TEST_KEY".to_string();
    config.request_timeout = Duration::from_secs(5);
    (App::new(&config), temp_dir)
}

fn image_url(server: &MockServer) -> String {
    format!("{}/img.jpg", server.uri())
}

fn record_json(server: &MockServer, date: &str) -> serde_json::Value {
    json!({
        "date": date,
        "title": format!("Nebula {}", date),
        "explanation": "Gas and dust.",
        "media_type": "image",
        "url": image_url(server),
        "service_version": "v1"
    })
}

fn cached_record(date: &str) -> DailyRecord {
    DailyRecord {
        date: date.to_string(),
        title: format!("Cached {}", date),
        explanation: "From disk.".to_string(),
        media_type: MediaType::Image,
        url: "http://cached.invalid/old.jpg".to_string(),
        hd_url: None,
        copyright: None,
        service_version: "v1".to_string(),
    }
}

async fn mount_image(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/img.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE_BYTES))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .and(query_param("api_key", "TEST_KEY"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(record_json(&server, "2024-05-01"))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_image(&server).await;
    let (app, _temp_dir) = create_app(&server);

    let (first, second) = tokio::join!(app.fetch_record(false), app.fetch_record(false));

    let first = first.expect("First caller should get a record");
    let second = second.expect("Second caller should get a record");
    assert_eq!(first.source, RecordSource::Network);
    assert_eq!(second.source, RecordSource::Network);
    assert_eq!(first.record, second.record);
    app.settle().await;
}

#[tokio::test]
async fn test_new_fetch_after_completion_hits_network_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(record_json(&server, "2024-05-01")))
        .expect(2)
        .mount(&server)
        .await;
    mount_image(&server).await;
    let (app, _temp_dir) = create_app(&server);

    app.fetch_record(true).await.expect("First refresh");
    app.fetch_record(true).await.expect("Second refresh");
    app.settle().await;
}

#[tokio::test]
async fn test_cold_start_caches_record_and_prefetches_image() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(record_json(&server, "2024-05-01")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE_BYTES))
        .expect(1)
        .mount(&server)
        .await;
    let (app, temp_dir) = create_app(&server);

    let outcome = app.fetch_record(false).await.expect("Should fetch from network");
    assert_eq!(outcome.source, RecordSource::Network);
    assert_eq!(outcome.record.date, "2024-05-01");

    app.settle().await;

    let url = image_url(&server);
    assert!(app.record_cache().is_valid().await);
    assert_eq!(app.get_cached_image_bytes(&url).as_deref(), Some(IMAGE_BYTES));
    assert!(temp_dir
        .path()
        .join("CachedImages")
        .join(file_name_for(&url))
        .exists());

    // Served from cache now; the image mock's expect(1) proves no second download
    let again = app.fetch_record(false).await.expect("Should hit cache");
    assert_eq!(again.source, RecordSource::Cache);
    let data = app.load_image_bytes(&url).await.expect("Should hit blob cache");
    assert_eq!(data.as_ref(), IMAGE_BYTES);
}

#[tokio::test]
async fn test_stale_cache_is_served_then_replaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(record_json(&server, "2024-05-02"))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_image(&server).await;
    let (app, _temp_dir) = create_app(&server);
    app.record_cache()
        .put_at(
            cached_record("2024-05-01"),
            Utc::now() - chrono::Duration::seconds(3700),
        )
        .await;
    let mut updates = app.subscribe();

    let outcome = app.fetch_record(false).await.expect("Should serve stale cache");
    assert_eq!(outcome.source, RecordSource::StaleCache);
    assert_eq!(outcome.record.date, "2024-05-01");

    let fresh = tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|state| matches!(state, FetchState::ServingCache { stale: false, .. })),
    )
    .await
    .expect("Refresh should finish in time")
    .expect("State channel should stay open")
    .clone();

    assert_eq!(fresh.record().map(|r| r.date.as_str()), Some("2024-05-02"));
    app.settle().await;
    assert!(app.record_cache().is_valid().await);
    assert_eq!(app.record_cache().get().await.unwrap().record.date, "2024-05-02");
}

#[tokio::test]
async fn test_stale_cache_survives_failing_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let (app, _temp_dir) = create_app(&server);
    app.record_cache()
        .put_at(cached_record("2024-05-01"), Utc::now() - chrono::Duration::hours(2))
        .await;

    let outcome = app.fetch_record(false).await.expect("Stale record should be served");
    assert_eq!(outcome.source, RecordSource::StaleCache);
    assert_eq!(outcome.record, cached_record("2024-05-01"));

    app.settle().await;

    match app.subscribe().borrow().clone() {
        FetchState::Failed { fallback, .. } => {
            assert_eq!(fallback, Some(cached_record("2024-05-01")));
        }
        other => panic!("Expected failed state, got {:?}", other),
    }
    let entry = app.record_cache().get().await.expect("Stale record should remain cached");
    assert_eq!(entry.record, cached_record("2024-05-01"));
}

#[tokio::test]
async fn test_forced_refresh_failure_returns_offline_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    let (app, _temp_dir) = create_app(&server);
    app.record_cache().put(cached_record("2024-05-01")).await;

    let outcome = app.fetch_record(true).await.expect("Should fall back to cache");

    assert!(matches!(outcome.source, RecordSource::Offline { .. }));
    assert!(outcome.is_stale());
    assert_eq!(outcome.record, cached_record("2024-05-01"));
}

#[tokio::test]
async fn test_no_cache_and_no_network_is_hard_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let (app, _temp_dir) = create_app(&server);

    let err = app.fetch_record(false).await.unwrap_err();

    assert!(matches!(err, RecordError::Unavailable(_)));
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_clear_all_caches_forces_network_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(record_json(&server, "2024-05-01")))
        .expect(2)
        .mount(&server)
        .await;
    mount_image(&server).await;
    let (app, temp_dir) = create_app(&server);

    app.fetch_record(false).await.expect("Initial fetch");
    app.settle().await;

    let removed = app.clear_all_caches().await;

    assert_eq!(removed, 1);
    assert!(app.record_cache().get().await.is_none());
    assert!(!temp_dir.path().join("cached_apod.json").exists());
    assert!(app.get_cached_image_bytes(&image_url(&server)).is_none());

    let outcome = app.fetch_record(false).await.expect("Fetch after clear");
    assert_eq!(outcome.source, RecordSource::Network);
    app.settle().await;
}

#[tokio::test]
async fn test_video_record_skips_image_prefetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "date": "2024-05-03",
            "title": "Launch",
            "explanation": "A rocket.",
            "media_type": "video",
            "url": "https://www.youtube.com/embed/abc",
            "service_version": "v1"
        })))
        .mount(&server)
        .await;
    let (app, _temp_dir) = create_app(&server);

    let outcome = app.fetch_record(false).await.expect("Should fetch video record");
    app.settle().await;

    assert_eq!(outcome.record.media_type, MediaType::Video);
    assert_eq!(app.blob_cache().memory_len(), 0);
}

#[tokio::test]
async fn test_fetch_random_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APOD_PATH))
        .and(query_param("count", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            record_json(&server, "2024-04-01"),
            record_json(&server, "2024-04-03")
        ])))
        .expect(1)
        .mount(&server)
        .await;
    let (app, _temp_dir) = create_app(&server);

    let records = app.fetch_random(2).await.expect("Should fetch batch");

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].date, "2024-04-03");
    assert!(app.record_cache().get().await.is_none());
}

#[tokio::test]
async fn test_fetch_history_requests_each_past_day() {
    let server = MockServer::start().await;
    let today = Local::now().date_naive();
    let days: Vec<String> = (1..=2)
        .map(|n| (today - Days::new(n)).format("%Y-%m-%d").to_string())
        .collect();
    for day in &days {
        Mock::given(method("GET"))
            .and(path(APOD_PATH))
            .and(query_param("date", day.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(record_json(&server, day)))
            .expect(1)
            .mount(&server)
            .await;
    }
    let (app, _temp_dir) = create_app(&server);

    let records = app.fetch_history(2).await.expect("Should fetch history");

    let dates: Vec<&str> = records.iter().map(|r| r.date.as_str()).collect();
    assert_eq!(dates, vec![days[0].as_str(), days[1].as_str()]);
    assert!(app.record_cache().get().await.is_none());
}
