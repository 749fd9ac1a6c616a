//! Core data models for Cosmic Daily
//!
//! This module contains the Astronomy Picture of the Day record type and the
//! HTTP clients that fetch records, image bytes and translations.

pub mod apod;
pub mod image;
pub mod translate;

pub use apod::{ApodClient, ApodError};
pub use image::{ImageClient, ImageError};
pub use translate::{find_language, Language, TranslationClient, TranslationError, SUPPORTED_LANGUAGES};

use serde::{Deserialize, Serialize};

/// Kind of media attached to a daily record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    /// Anything the API reports that is neither an image nor a video
    #[serde(other)]
    Other,
}

/// A single Astronomy Picture of the Day entry
///
/// Field names follow the APOD API wire format, so the same serde
/// representation is used for network responses and the on-disk cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    /// Calendar date (`YYYY-MM-DD`), unique per record
    pub date: String,
    /// Title of the picture or video
    pub title: String,
    /// Explanation written by the APOD editors
    pub explanation: String,
    /// Whether the entry is an image, a video, or something else
    pub media_type: MediaType,
    /// Standard resolution media URL
    pub url: String,
    /// Optional high resolution image URL
    #[serde(rename = "hdurl", default, skip_serializing_if = "Option::is_none")]
    pub hd_url: Option<String>,
    /// Optional attribution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    /// Opaque API version tag, passed through unchanged
    pub service_version: String,
}

impl DailyRecord {
    /// Returns the URL whose bytes should be displayed and cached.
    ///
    /// Prefers `hd_url` over `url`. Videos and other media never have an image
    /// URL, so callers must not attempt image cache operations for them.
    pub fn image_url(&self) -> Option<&str> {
        match self.media_type {
            MediaType::Image => Some(self.hd_url.as_deref().unwrap_or(&self.url)),
            MediaType::Video | MediaType::Other => None,
        }
    }

    /// Returns `true` if the record is an image
    pub fn is_image(&self) -> bool {
        self.media_type == MediaType::Image
    }
}
