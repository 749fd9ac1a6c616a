//! Raw image download

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use super::apod::{build_http_client, TimedClient};

/// Errors that can occur when downloading image bytes
#[derive(Debug, Error)]
pub enum ImageError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Image server returned status {0}")]
    Status(u16),
}

/// Downloads image payloads by URL (no authentication)
#[derive(Debug, Clone)]
pub struct ImageClient {
    http_client: TimedClient,
}

impl ImageClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http_client: build_http_client(timeout),
        }
    }

    /// Fetches the bytes at `url`
    pub async fn fetch(&self, url: &str) -> Result<Bytes, ImageError> {
        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Status(status.as_u16()));
        }

        let data = response.bytes().await?;
        debug!(url, size = data.len(), "Downloaded image");
        Ok(data)
    }
}
