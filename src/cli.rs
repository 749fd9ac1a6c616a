//! Command-line interface parsing for Cosmic Daily
//!
//! Flags are parsed with clap and then validated into a `StartupConfig`
//! before any network or disk work happens.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::data::apod::{DEFAULT_HISTORY_DAYS, MAX_HISTORY_DAYS, MAX_RANDOM_COUNT};
use crate::data::{find_language, Language};

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// The language code is not one we can translate into
    #[error("Invalid language: '{0}'. Valid languages: tr, es, fr, de, it, pt, ru, ja, zh, ko, hi")]
    InvalidLanguage(String),

    /// A `--recent` or `--random` count is out of range
    #[error("Invalid count: {0}. Expected a value between 1 and 100")]
    InvalidCount(u32),
}

/// Cosmic Daily - NASA's Astronomy Picture of the Day in your terminal
#[derive(Parser, Debug)]
#[command(name = "cosmicdaily")]
#[command(about = "Astronomy Picture of the Day with offline caching")]
#[command(version)]
pub struct Cli {
    /// Skip the cache and fetch today's record from the network
    #[arg(long)]
    pub refresh: bool,

    /// Remove the cached record and all cached images, then exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Translate the title and explanation into a language
    ///
    /// Valid languages: tr, es, fr, de, it, pt, ru, ja, zh, ko, hi
    #[arg(long, value_name = "LANG")]
    pub translate: Option<String>,

    /// List the records of the N days before today, newest first (default 7)
    #[arg(long, value_name = "N", num_args = 0..=1, conflicts_with = "random")]
    pub recent: Option<Option<u32>>,

    /// List N randomly chosen records from the archive
    #[arg(long, value_name = "N")]
    pub random: Option<u32>,

    /// Write today's image to a file
    #[arg(long, value_name = "PATH")]
    pub save_image: Option<PathBuf>,

    /// NASA API key for this run
    #[arg(long, value_name = "KEY", env = "NASA_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Save a NASA API key for future runs (an empty key reverts to DEMO_KEY)
    #[arg(long, value_name = "KEY", conflicts_with = "reset_api_key")]
    pub set_api_key: Option<String>,

    /// Forget the saved API key and use DEMO_KEY
    #[arg(long)]
    pub reset_api_key: bool,

    /// Directory for cached records and images
    #[arg(long, value_name = "DIR", env = "COSMICDAILY_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Seconds to wait for a background refresh when the cache is stale
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub refresh_wait: u64,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Validated settings derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    /// Language to translate into, if requested
    pub language: Option<&'static Language>,
    /// Number of past days to list, if requested
    pub history_days: Option<u32>,
    /// Number of random records to list, if requested
    pub random_count: Option<u32>,
}

/// Parses a language code argument into a supported language
pub fn parse_language_arg(s: &str) -> Result<&'static Language, CliError> {
    find_language(s).ok_or_else(|| CliError::InvalidLanguage(s.to_string()))
}

/// Checks a `--recent` or `--random` count against `max`
pub fn parse_count_arg(count: u32, max: u32) -> Result<u32, CliError> {
    if (1..=max).contains(&count) {
        Ok(count)
    } else {
        Err(CliError::InvalidCount(count))
    }
}

impl StartupConfig {
    /// Validates parsed CLI arguments
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let language = cli.translate.as_deref().map(parse_language_arg).transpose()?;

        let history_days = match cli.recent {
            None => None,
            Some(None) => Some(DEFAULT_HISTORY_DAYS),
            Some(Some(days)) => Some(parse_count_arg(days, MAX_HISTORY_DAYS)?),
        };
        let random_count = cli
            .random
            .map(|count| parse_count_arg(count, MAX_RANDOM_COUNT))
            .transpose()?;

        Ok(StartupConfig {
            language,
            history_days,
            random_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_language_arg() {
        assert_eq!(parse_language_arg("tr").unwrap().english_name, "Turkish");
        assert_eq!(parse_language_arg("ES").unwrap().code, "es");
    }

    #[test]
    fn test_parse_language_arg_invalid() {
        let err = parse_language_arg("klingon").unwrap_err();
        assert!(err.to_string().contains("Invalid language"));
        assert!(err.to_string().contains("klingon"));
    }

    #[test]
    fn test_parse_count_arg_bounds() {
        assert!(parse_count_arg(0, 100).is_err());
        assert_eq!(parse_count_arg(1, 100).unwrap(), 1);
        assert_eq!(parse_count_arg(100, 100).unwrap(), 100);
        assert!(matches!(parse_count_arg(101, 100), Err(CliError::InvalidCount(101))));
    }

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::parse_from(["cosmicdaily"]);
        assert!(!cli.refresh);
        assert!(cli.translate.is_none());
        assert!(cli.recent.is_none());
        assert_eq!(cli.refresh_wait, 5);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_parse_recent_without_value() {
        let cli = Cli::parse_from(["cosmicdaily", "--recent"]);
        assert_eq!(cli.recent, Some(None));
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.history_days, Some(7));
        assert!(config.random_count.is_none());
    }

    #[test]
    fn test_cli_parse_recent_with_value() {
        let cli = Cli::parse_from(["cosmicdaily", "--recent", "3"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.history_days, Some(3));
    }

    #[test]
    fn test_cli_parse_random() {
        let cli = Cli::parse_from(["cosmicdaily", "--random", "5"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.random_count, Some(5));
        assert!(config.history_days.is_none());
    }

    #[test]
    fn test_recent_and_random_conflict() {
        assert!(Cli::try_parse_from(["cosmicdaily", "--recent", "--random", "3"]).is_err());
    }

    #[test]
    fn test_cli_parse_verbose_count() {
        let cli = Cli::parse_from(["cosmicdaily", "-vv"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_startup_config_default() {
        let cli = Cli::parse_from(["cosmicdaily"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert!(config.language.is_none());
        assert!(config.history_days.is_none());
        assert!(config.random_count.is_none());
    }

    #[test]
    fn test_startup_config_with_language() {
        let cli = Cli::parse_from(["cosmicdaily", "--translate", "ja"]);
        let config = StartupConfig::from_cli(&cli).unwrap();
        assert_eq!(config.language.map(|l| l.code), Some("ja"));
    }

    #[test]
    fn test_startup_config_invalid_language() {
        let cli = Cli::parse_from(["cosmicdaily", "--translate", "xx"]);
        assert!(StartupConfig::from_cli(&cli).is_err());
    }

    #[test]
    fn test_startup_config_invalid_count() {
        let cli = Cli::parse_from(["cosmicdaily", "--recent", "500"]);
        assert!(matches!(
            StartupConfig::from_cli(&cli),
            Err(CliError::InvalidCount(500))
        ));
    }
}
