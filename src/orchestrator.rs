//! Fetch orchestration for the daily record
//!
//! Decides between serving the record cache, refreshing in the background and
//! fetching from the network. State changes are published on a `watch`
//! channel so a front end can show a stale record first and swap in the fresh
//! one when the refresh lands.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{BlobCache, RecordCache};
use crate::data::{ApodClient, ApodError, DailyRecord, ImageClient, ImageError};

/// Observable state of the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    /// Nothing requested yet
    Idle,
    /// A record is being served from the cache
    ///
    /// After a successful refresh the new record has been written through the
    /// cache and is served with `stale: false`.
    ServingCache { record: DailyRecord, stale: bool },
    /// A network fetch is in flight; `current` is whatever was shown before
    Refreshing { current: Option<DailyRecord> },
    /// The last network fetch failed; `fallback` is the cached record, if any
    Failed {
        fallback: Option<DailyRecord>,
        error: String,
    },
}

impl FetchState {
    /// Record a front end should currently display, if any
    pub fn record(&self) -> Option<&DailyRecord> {
        match self {
            FetchState::Idle => None,
            FetchState::ServingCache { record, .. } => Some(record),
            FetchState::Refreshing { current } => current.as_ref(),
            FetchState::Failed { fallback, .. } => fallback.as_ref(),
        }
    }
}

/// Where the record returned by `fetch_record` came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSource {
    /// Fresh cache entry
    Cache,
    /// Stale cache entry; a background refresh has been started
    StaleCache,
    /// Fetched from the network just now
    Network,
    /// Network failed; this is the last cached record
    Offline { reason: String },
}

/// Result of a successful `fetch_record`
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub record: DailyRecord,
    pub source: RecordSource,
}

impl FetchOutcome {
    /// Returns `true` when the record may be out of date
    pub fn is_stale(&self) -> bool {
        matches!(self.source, RecordSource::StaleCache | RecordSource::Offline { .. })
    }
}

/// Errors surfaced by `fetch_record`
#[derive(Debug, Clone, Error)]
pub enum RecordError {
    /// Network fetch failed and nothing is cached
    #[error("No record available: {0}")]
    Unavailable(Arc<ApodError>),

    /// The refresh task stopped before producing a result
    #[error("Record refresh was interrupted")]
    Interrupted,
}

type RefreshResult = Result<DailyRecord, Arc<ApodError>>;
type InFlight = watch::Receiver<Option<RefreshResult>>;

struct Inner {
    record_cache: Arc<RecordCache>,
    blob_cache: BlobCache,
    apod_client: ApodClient,
    image_client: ImageClient,
    state: watch::Sender<FetchState>,
    /// Single-flight slot for today's record
    in_flight: Mutex<Option<InFlight>>,
    /// Image pre-fetch tasks not yet awaited by `settle`
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    /// Empties the single-flight slot if it still holds `rx`'s channel
    fn release_in_flight(&self, rx: &InFlight) {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|current| current.same_channel(rx)) {
            *slot = None;
        }
    }
}

/// Releases the single-flight slot when a refresh task ends, panics included
struct InFlightGuard {
    inner: Arc<Inner>,
    rx: InFlight,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.release_in_flight(&self.rx);
    }
}

/// Coordinates the record cache, blob cache and network clients
///
/// Cloning is cheap and clones share the same single-flight slot and state.
#[derive(Clone)]
pub struct FetchOrchestrator {
    inner: Arc<Inner>,
}

impl FetchOrchestrator {
    /// Wires an orchestrator over shared caches and clients
    pub fn new(
        record_cache: Arc<RecordCache>,
        blob_cache: BlobCache,
        apod_client: ApodClient,
        image_client: ImageClient,
    ) -> Self {
        let (state, _) = watch::channel(FetchState::Idle);
        Self {
            inner: Arc::new(Inner {
                record_cache,
                blob_cache,
                apod_client,
                image_client,
                state,
                in_flight: Mutex::new(None),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribes to state changes
    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.inner.state.subscribe()
    }

    /// Current state
    pub fn state(&self) -> FetchState {
        self.inner.state.borrow().clone()
    }

    /// Returns today's record
    ///
    /// Without `force_refresh`, any cached entry is returned at once; a stale
    /// one also starts a background refresh. Otherwise the network is asked,
    /// and if it fails the cached entry is returned as offline data. Only when
    /// both are empty is an error returned.
    pub async fn fetch_record(&self, force_refresh: bool) -> Result<FetchOutcome, RecordError> {
        if !force_refresh {
            if let Some(entry) = self.inner.record_cache.get().await {
                let fresh = self.inner.record_cache.is_valid().await;
                debug!(date = %entry.record.date, fresh, "Serving record from cache");
                self.publish(FetchState::ServingCache {
                    record: entry.record.clone(),
                    stale: !fresh,
                });

                if fresh {
                    return Ok(FetchOutcome {
                        record: entry.record,
                        source: RecordSource::Cache,
                    });
                }

                info!(date = %entry.record.date, "Cached record is stale; refreshing in background");
                let _ = self.join_or_start_refresh();
                return Ok(FetchOutcome {
                    record: entry.record,
                    source: RecordSource::StaleCache,
                });
            }
        }

        match self.refresh().await {
            Ok(record) => Ok(FetchOutcome {
                record,
                source: RecordSource::Network,
            }),
            Err(err) => match self.inner.record_cache.get().await {
                Some(entry) => {
                    info!(date = %entry.record.date, error = %err, "Showing cached record offline");
                    Ok(FetchOutcome {
                        record: entry.record,
                        source: RecordSource::Offline {
                            reason: err.to_string(),
                        },
                    })
                }
                None => Err(err),
            },
        }
    }

    /// Returns the bytes for `url` from the blob cache, downloading on a miss
    pub async fn load_image_bytes(&self, url: &str) -> Result<Bytes, ImageError> {
        if let Some(data) = self.inner.blob_cache.get(url).await {
            return Ok(data);
        }

        let data = self.inner.image_client.fetch(url).await?;
        self.inner.blob_cache.put(url, data.clone());
        Ok(data)
    }

    /// Waits for the in-flight refresh, pending image pre-fetches and queued
    /// blob writes
    pub async fn settle(&self) {
        let in_flight = self.inner.in_flight.lock().clone();
        if let Some(mut rx) = in_flight {
            let _ = rx.wait_for(Option::is_some).await;
        }

        let pending = std::mem::take(&mut *self.inner.background.lock());
        futures::future::join_all(pending).await;

        self.inner.blob_cache.flush().await;
    }

    /// Joins the in-flight refresh, or starts one, and waits for its result
    async fn refresh(&self) -> Result<DailyRecord, RecordError> {
        let mut rx = self.join_or_start_refresh();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };

        match result {
            Some(Ok(record)) => Ok(record),
            Some(Err(err)) => Err(RecordError::Unavailable(err)),
            None => {
                self.inner.release_in_flight(&rx);
                Err(RecordError::Interrupted)
            }
        }
    }

    /// Returns a receiver for the current refresh, spawning one if needed
    ///
    /// The refresh runs on its own task so it finishes and fills the cache
    /// even if every caller goes away.
    fn join_or_start_refresh(&self) -> InFlight {
        let mut slot = self.inner.in_flight.lock();
        if let Some(rx) = slot.as_ref() {
            debug!("Joining in-flight record refresh");
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        drop(slot);

        let guard = InFlightGuard {
            inner: self.inner.clone(),
            rx: rx.clone(),
        };
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.run_refresh().await;
            drop(guard);
            let _ = tx.send(Some(result));
        });

        rx
    }

    async fn run_refresh(&self) -> RefreshResult {
        let current = self.inner.state.borrow().record().cloned();
        self.publish(FetchState::Refreshing { current });

        match self.inner.apod_client.fetch_today().await {
            Ok(record) => {
                let fetched_at = Utc::now();
                let record = if self.inner.record_cache.put_at(record.clone(), fetched_at).await {
                    record
                } else {
                    self.inner
                        .record_cache
                        .get()
                        .await
                        .map(|entry| entry.record)
                        .unwrap_or(record)
                };

                info!(date = %record.date, "Fetched daily record");
                self.publish(FetchState::ServingCache {
                    record: record.clone(),
                    stale: false,
                });

                if let Some(url) = record.image_url() {
                    self.spawn_prefetch(url.to_string());
                }
                Ok(record)
            }
            Err(err) => {
                warn!(error = %err, "Failed to fetch daily record");
                let fallback = self.inner.record_cache.get().await.map(|entry| entry.record);
                self.publish(FetchState::Failed {
                    fallback,
                    error: err.to_string(),
                });
                Err(Arc::new(err))
            }
        }
    }

    /// Downloads the record's image into the blob cache without blocking
    fn spawn_prefetch(&self, url: String) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            match this.load_image_bytes(&url).await {
                Ok(data) => debug!(url = %url, size = data.len(), "Image pre-fetched"),
                Err(e) => warn!(url = %url, error = %e, "Image pre-fetch failed"),
            }
        });

        let mut background = self.inner.background.lock();
        background.retain(|task| !task.is_finished());
        background.push(handle);
    }

    fn publish(&self, state: FetchState) {
        self.inner.state.send_replace(state);
    }
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}
