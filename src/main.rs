//! Cosmic Daily - NASA's Astronomy Picture of the Day in the terminal
//!
//! Prints today's record, served from the local cache when possible and
//! refreshed in the background when the cache is stale.

use std::fs;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use cosmicdaily::app::App;
use cosmicdaily::cli::{Cli, StartupConfig};
use cosmicdaily::config::{settings_path, AppConfig, Settings};
use cosmicdaily::data::{ApodError, DailyRecord, Language, MediaType};
use cosmicdaily::orchestrator::{FetchState, RecordSource};

/// Sets up stderr logging; `RUST_LOG` overrides the `-v` level
fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "warn",
        1 => "warn,cosmicdaily=info",
        _ => "warn,cosmicdaily=debug",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn status_label(source: &RecordSource) -> &'static str {
    match source {
        RecordSource::Cache => "cached",
        RecordSource::StaleCache => "cached, refreshing",
        RecordSource::Network => "live",
        RecordSource::Offline { .. } => "offline",
    }
}

fn print_record(record: &DailyRecord, label: &str, title: &str, explanation: &str) {
    println!("{} ({}) [{}]", title, record.date, label);
    if let Some(copyright) = &record.copyright {
        println!("© {}", copyright.trim());
    }
    match record.media_type {
        MediaType::Image => println!("Image: {}", record.image_url().unwrap_or(record.url.as_str())),
        MediaType::Video => println!("Video: {}", record.url),
        MediaType::Other => println!("Media: {}", record.url),
    }
    println!();
    println!("{}", explanation);
}

/// Updates the saved API key and reports the result
fn update_api_key(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let path = settings_path()?;
    let mut settings = Settings::load(&path);

    match &cli.set_api_key {
        Some(key) => settings.set_api_key(key),
        None => settings.reset_api_key(),
    }
    settings.save(&path)?;

    match &settings.api_key {
        Some(_) => println!("Saved API key to {}", path.display()),
        None => println!("Using DEMO_KEY (saved to {})", path.display()),
    }
    Ok(())
}

fn print_records(result: Result<Vec<DailyRecord>, ApodError>) {
    match result {
        Ok(records) => {
            for record in records {
                println!("{}  {}", record.date, record.title);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Waits for the background refresh started by a stale cache hit
///
/// Returns the refreshed record, or `None` on failure or timeout.
async fn wait_for_refresh(app: &App, wait: Duration) -> Option<DailyRecord> {
    let mut updates = app.subscribe();
    let done = |state: &FetchState| {
        matches!(
            state,
            FetchState::ServingCache { stale: false, .. } | FetchState::Failed { .. }
        )
    };

    let state = match tokio::time::timeout(wait, updates.wait_for(done)).await {
        Ok(Ok(state)) => state.clone(),
        Ok(Err(_)) => return None,
        Err(_) => {
            debug!(?wait, "Background refresh still running");
            return None;
        }
    };

    match state {
        FetchState::ServingCache { record, .. } => Some(record),
        _ => None,
    }
}

async fn translate_record(
    app: &App,
    record: &DailyRecord,
    language: &Language,
) -> Option<(String, String)> {
    let result = futures::try_join!(
        app.translate(&record.title, language.code),
        app.translate(&record.explanation, language.code)
    );

    match result {
        Ok(pair) => Some(pair),
        Err(e) => {
            warn!(language = language.code, error = %e, "Translation failed");
            eprintln!("Translation to {} unavailable: {}", language.english_name, e);
            None
        }
    }
}

async fn show_today(
    app: &App,
    cli: &Cli,
    startup: &StartupConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = match app.fetch_record(cli.refresh).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Check your connection and try again with --refresh.");
            app.settle().await;
            process::exit(1);
        }
    };

    let mut record = outcome.record;
    let mut label = status_label(&outcome.source);
    if let RecordSource::Offline { reason } = &outcome.source {
        debug!(%reason, "Serving offline record");
    }

    if outcome.source == RecordSource::StaleCache && cli.refresh_wait > 0 {
        match wait_for_refresh(app, Duration::from_secs(cli.refresh_wait)).await {
            Some(fresh) => {
                record = fresh;
                label = "live";
            }
            None => label = "cached, may be outdated",
        }
    }

    let translated = match startup.language {
        Some(language) => translate_record(app, &record, language).await,
        None => None,
    };
    let (title, explanation) = match &translated {
        Some((title, explanation)) => (title.as_str(), explanation.as_str()),
        None => (record.title.as_str(), record.explanation.as_str()),
    };
    print_record(&record, label, title, explanation);

    if let Some(path) = &cli.save_image {
        match record.image_url() {
            Some(url) => match app.load_image_bytes(url).await {
                Ok(data) => {
                    fs::write(path, &data)?;
                    println!("\nSaved image to {}", path.display());
                }
                Err(e) => eprintln!("Failed to download image: {}", e),
            },
            None => eprintln!("Today's record has no image to save"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Validate before touching disk or network
    let startup = match StartupConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    init_tracing(cli.verbose);

    if cli.set_api_key.is_some() || cli.reset_api_key {
        return update_api_key(&cli);
    }

    let settings = settings_path()
        .map(|path| Settings::load(&path))
        .unwrap_or_default();
    let config = AppConfig::resolve(&cli, &settings)?;
    debug!(cache_dir = ?config.cache_dir, "Resolved configuration");

    let app = App::new(&config);

    if cli.clear_cache {
        let removed = app.clear_all_caches().await;
        println!("Cleared cached record and {} cached images", removed);
        return Ok(());
    }

    if let Some(days) = startup.history_days {
        print_records(app.fetch_history(days).await);
        return Ok(());
    }

    if let Some(count) = startup.random_count {
        print_records(app.fetch_random(count).await);
        return Ok(());
    }

    let result = show_today(&app, &cli, &startup).await;
    app.settle().await;
    result
}
