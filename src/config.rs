//! Runtime configuration and saved user settings
//!
//! `AppConfig` is resolved once at startup from CLI flags, environment
//! variables and the saved `Settings`, then handed to `App::new`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::BlobLimits;
use crate::cli::Cli;
use crate::data::apod::{APOD_BASE_URL, DEMO_API_KEY};
use crate::data::translate::TRANSLATE_BASE_URL;

/// Name used for the XDG cache and config directories
const APP_NAME: &str = "cosmicdaily";

const SETTINGS_FILE_NAME: &str = "settings.json";

/// Timeout applied to every outbound HTTP request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors resolving configuration or writing settings
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No home directory could be determined for the XDG paths
    #[error("Could not determine a {0} directory; pass --cache-dir or set COSMICDAILY_CACHE_DIR")]
    NoProjectDir(&'static str),

    /// Settings could not be written
    #[error("Failed to save settings to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings could not be encoded
    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// User settings persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Saved NASA API key; `None` means the demo key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Settings {
    /// Loads settings from `path`; a missing or corrupt file yields defaults
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(error = %e, ?path, "Failed to read settings");
                return Self::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(error = %e, ?path, "Ignoring corrupt settings file");
            Self::default()
        })
    }

    /// Writes settings to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, json)
        };
        write().map_err(|source| ConfigError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "Saved settings");
        Ok(())
    }

    /// Stores `key`; an empty or blank key reverts to the demo key
    pub fn set_api_key(&mut self, key: &str) {
        let key = key.trim();
        self.api_key = (!key.is_empty()).then(|| key.to_string());
    }

    /// Reverts to the demo key
    pub fn reset_api_key(&mut self) {
        self.api_key = None;
    }

    /// Key to send with APOD requests
    pub fn effective_api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or(DEMO_API_KEY)
    }
}

/// Default location of the settings file (`~/.config/cosmicdaily/settings.json`)
pub fn settings_path() -> Result<PathBuf, ConfigError> {
    let project_dirs = project_dirs().ok_or(ConfigError::NoProjectDir("config"))?;
    Ok(project_dirs.config_dir().join(SETTINGS_FILE_NAME))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Everything `App::new` needs to wire the caches and clients
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub cache_dir: PathBuf,
    pub apod_base_url: String,
    pub translate_base_url: String,
    pub blob_limits: BlobLimits,
    pub request_timeout: Duration,
}

impl AppConfig {
    /// Default configuration rooted at `cache_dir`, using the demo key
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_key: DEMO_API_KEY.to_string(),
            cache_dir: cache_dir.into(),
            apod_base_url: APOD_BASE_URL.to_string(),
            translate_base_url: TRANSLATE_BASE_URL.to_string(),
            blob_limits: BlobLimits::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Resolves the configuration for a run
    ///
    /// The API key comes from `--api-key`/`NASA_API_KEY`, then the saved
    /// settings, then the demo key. The cache directory comes from
    /// `--cache-dir`/`COSMICDAILY_CACHE_DIR`, else the XDG cache directory.
    pub fn resolve(cli: &Cli, settings: &Settings) -> Result<Self, ConfigError> {
        let cache_dir = match &cli.cache_dir {
            Some(dir) => dir.clone(),
            None => project_dirs()
                .ok_or(ConfigError::NoProjectDir("cache"))?
                .cache_dir()
                .to_path_buf(),
        };

        let api_key = cli
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| settings.effective_api_key())
            .to_string();

        Ok(Self {
            api_key,
            ..Self::with_cache_dir(cache_dir)
        })
    }
}
