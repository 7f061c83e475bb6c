//! Background poller driven by cheap metadata checks

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use flagsync_core::{StorageBackend, SyncError, SyncMetrics};
use flagsync_http::Transport;

use crate::ConfigFetcher;

/// Poller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Interval to wait between metadata checks
    pub interval: Duration,
    /// Up to this much is subtracted from each interval at random, so many
    /// clients do not poll in lockstep
    pub jitter: Duration,
    /// Settings dimension whose metadata is checked
    pub dimension: String,
}

impl PollerConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimension = dimension.into();
        self
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_POLL_INTERVAL,
            jitter: Self::DEFAULT_POLL_JITTER,
            dimension: "default".to_string(),
        }
    }
}

/// What one poll decided to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollAction {
    /// Offline, nothing attempted
    Skipped,
    /// Remote validators match the cache; freshness was extended without a fetch
    Confirmed,
    /// A full fetch ran; `true` if usable configuration is cached afterwards
    Refreshed(bool),
    /// Metadata failed but the cache is still fresh
    Deferred,
    /// The server rejected the client; polling should stop
    Fatal(SyncError),
}

/// Run one metadata check and fetch the configuration if it changed.
///
/// Metadata validators are compared with the ones last confirmed for
/// `dimension`, not with the config entry's. On a change they are sent on the
/// conditional config fetch. A full fetch also runs when the metadata check
/// fails and the cached entry is stale or missing.
pub async fn poll_once<B, T, M>(fetcher: &ConfigFetcher<B, T, M>, dimension: &str) -> PollAction
where
    B: StorageBackend,
    T: Transport,
    M: SyncMetrics,
{
    if fetcher.is_offline() {
        return PollAction::Skipped;
    }

    let cached = fetcher.cached_entry().await;
    match fetcher.fetch_metadata(dimension).await {
        Ok(remote) => {
            let unchanged = cached.is_some()
                && !remote.is_empty()
                && fetcher.seen_metadata(dimension).as_ref() == Some(&remote);
            if unchanged {
                debug!(target: "flagsync", dimension, "configuration unchanged");
                fetcher.mark_current().await;
                return PollAction::Confirmed;
            }

            let ready = fetcher.refresh_with(remote.clone()).await;
            if ready && !remote.is_empty() {
                fetcher.remember_metadata(dimension, remote);
            }
            PollAction::Refreshed(ready)
        }
        Err(SyncError::Offline) => PollAction::Skipped,
        Err(err) if is_fatal(&err) => PollAction::Fatal(err),
        Err(err) => {
            let usable_fresh = cached.as_ref().is_some_and(|entry| entry.is_fresh());
            if usable_fresh {
                debug!(target: "flagsync", dimension, error = %err, "metadata check failed, cache still fresh");
                PollAction::Deferred
            } else {
                PollAction::Refreshed(fetcher.refresh().await)
            }
        }
    }
}

fn is_fatal(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::InvalidUrl(_) | SyncError::HttpStatus(401) | SyncError::HttpStatus(403)
    )
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    let offset = if jitter_ms > 0 {
        Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
    } else {
        Duration::ZERO
    };
    interval.saturating_sub(offset)
}

/// A background task polling the server periodically.
///
/// Dropping the handle also stops the task, at its next wait.
pub struct Poller {
    join_handle: JoinHandle<()>,
    stop_sender: watch::Sender<bool>,
}

impl Poller {
    pub fn start<B, T, M>(fetcher: ConfigFetcher<B, T, M>, config: PollerConfig) -> Poller
    where
        B: StorageBackend,
        T: Transport,
        M: SyncMetrics,
    {
        let (stop_sender, mut stop_receiver) = watch::channel(false);

        let join_handle = tokio::spawn(async move {
            loop {
                match poll_once(&fetcher, &config.dimension).await {
                    PollAction::Fatal(err) => {
                        warn!(target: "flagsync", error = %err, "poller stopping on unrecoverable error");
                        return;
                    }
                    action => {
                        debug!(target: "flagsync", ?action, "poll finished");
                    }
                }

                let timeout = jitter(config.interval, config.jitter);
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {}
                    // Stop requested, or the handle is gone
                    _ = stop_receiver.changed() => {
                        debug!(target: "flagsync", "poller received stop command");
                        return;
                    }
                }
            }
        });

        Poller {
            join_handle,
            stop_sender,
        }
    }

    /// Stop polling and wait for the task to exit
    pub async fn stop(self) {
        let _ = self.stop_sender.send(true);
        let _ = self.join_handle.await;
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}
