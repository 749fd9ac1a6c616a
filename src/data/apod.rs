//! NASA APOD API client
//!
//! Fetches the Astronomy Picture of the Day for today or a given date, the
//! last few days as a history, or a random batch, and decodes them into
//! `DailyRecord` values.

use std::time::Duration;

use chrono::{Days, NaiveDate};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use super::DailyRecord;

/// Base URL for the NASA APOD API
pub const APOD_BASE_URL: &str = "https://api.nasa.gov/planetary/apod";

/// API key used when the user has not configured one
pub const DEMO_API_KEY: &str = "DEMO_KEY";

/// Number of days listed by a history request when no count is given
pub const DEFAULT_HISTORY_DAYS: u32 = 7;

/// Longest history fetched in one go
pub const MAX_HISTORY_DAYS: u32 = 100;

/// Largest batch the API accepts for `count`
pub const MAX_RANDOM_COUNT: u32 = 100;

/// Per-date requests in flight at once while building a history
const HISTORY_CONCURRENCY: usize = 6;

/// Errors that can occur when fetching APOD data
#[derive(Debug, Error)]
pub enum ApodError {
    /// HTTP request failed (connection, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("APOD API returned status {0}")]
    Status(u16),

    /// Failed to parse JSON response
    #[error("Failed to parse APOD response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Client for the APOD API
#[derive(Debug, Clone)]
pub struct ApodClient {
    http_client: TimedClient,
    base_url: String,
    api_key: String,
}

impl ApodClient {
    /// Creates a client for the public NASA endpoint
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self::with_base_url(APOD_BASE_URL, api_key, timeout)
    }

    /// Creates a client for a custom endpoint (mirrors, tests)
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http_client: build_http_client(timeout),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Returns the API key requests are sent with
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Fetches today's record
    pub async fn fetch_today(&self) -> Result<DailyRecord, ApodError> {
        debug!(url = %self.base_url, "Fetching today's APOD");
        let text = self.get_text(&[("api_key", self.api_key.clone())]).await?;
        let record: DailyRecord = serde_json::from_str(&text)?;
        debug!(date = %record.date, media_type = ?record.media_type, "Fetched APOD");
        Ok(record)
    }

    /// Fetches the record published on `date`
    pub async fn fetch_for_date(&self, date: NaiveDate) -> Result<DailyRecord, ApodError> {
        debug!(%date, "Fetching APOD for date");
        let text = self
            .get_text(&[
                ("api_key", self.api_key.clone()),
                ("date", date.format("%Y-%m-%d").to_string()),
            ])
            .await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Fetches the `days` records published before `today`, newest first
    ///
    /// Days that fail are skipped. An error is returned only when every
    /// requested day failed.
    pub async fn fetch_history(
        &self,
        today: NaiveDate,
        days: u32,
    ) -> Result<Vec<DailyRecord>, ApodError> {
        let dates: Vec<NaiveDate> = (1..=days)
            .filter_map(|offset| today.checked_sub_days(Days::new(offset.into())))
            .collect();

        let results: Vec<(NaiveDate, Result<DailyRecord, ApodError>)> = stream::iter(dates)
            .map(|date| async move { (date, self.fetch_for_date(date).await) })
            .buffer_unordered(HISTORY_CONCURRENCY)
            .collect()
            .await;

        let mut records = Vec::with_capacity(results.len());
        let mut last_error = None;
        for (date, result) in results {
            match result {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(%date, error = %e, "Skipping history day");
                    last_error = Some(e);
                }
            }
        }

        if records.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        records.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(records)
    }

    /// Fetches `count` randomly chosen records, sorted newest first
    pub async fn fetch_random(&self, count: u32) -> Result<Vec<DailyRecord>, ApodError> {
        debug!(count, "Fetching random APOD batch");
        let text = self
            .get_text(&[
                ("api_key", self.api_key.clone()),
                ("count", count.to_string()),
            ])
            .await?;
        let mut records: Vec<DailyRecord> = serde_json::from_str(&text)?;
        records.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(records)
    }

    async fn get_text(&self, query: &[(&str, String)]) -> Result<String, ApodError> {
        let response = self
            .http_client
            .get(&self.base_url)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApodError::Status(status.as_u16()));
        }

        Ok(response.text().await?)
    }
}

/// Builds an HTTP client with a request timeout so sockets are always released
///
/// If the builder fails, falls back to a default client that still carries
/// the timeout on each request.
pub(crate) fn build_http_client(timeout: Duration) -> TimedClient {
    match Client::builder().timeout(timeout).build() {
        Ok(client) => TimedClient { client, per_request: None },
        Err(e) => {
            warn!(error = %e, ?timeout, "HTTP client builder failed; applying timeout per request");
            TimedClient {
                client: Client::new(),
                per_request: Some(timeout),
            }
        }
    }
}

/// A `reqwest::Client` that always enforces a request timeout
#[derive(Debug, Clone)]
pub(crate) struct TimedClient {
    client: Client,
    /// Set when the client itself was built without a timeout
    per_request: Option<Duration>,
}

impl TimedClient {
    /// Starts a GET request with the timeout applied
    pub(crate) fn get(&self, url: impl reqwest::IntoUrl) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match self.per_request {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }
}
