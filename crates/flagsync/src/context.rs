//! Explicit sync context wiring every component together

use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

use flagsync_core::{NoopMetrics, Result, StorageBackend, SyncMetrics};
use flagsync_http::{HttpClient, HttpConfig, ReqwestTransport, Transport};
use flagsync_storage::MemoryBackend;

use crate::{
    CoalescerConfig, ConfigFetcher, ConfigListener, FetcherConfig, Poller, PollerConfig,
};

/// Owns the fetcher and optional poller for one client.
///
/// Constructed once by the host application and shared by handle; there is
/// no global instance. Dereferences to [`ConfigFetcher`].
pub struct FlagSync<B, T = ReqwestTransport, M = NoopMetrics>
where
    B: StorageBackend,
    T: Transport,
    M: SyncMetrics,
{
    fetcher: ConfigFetcher<B, T, M>,
    poller_config: Option<PollerConfig>,
    poller: Mutex<Option<Poller>>,
}

impl FlagSync<MemoryBackend> {
    /// Builder with an in-memory backend and no metrics
    pub fn builder(config: FetcherConfig) -> FlagSyncBuilder<MemoryBackend> {
        FlagSyncBuilder {
            config,
            http: HttpConfig::default(),
            coalescing: CoalescerConfig::default(),
            poller: None,
            backend: MemoryBackend::default(),
            metrics: Arc::new(NoopMetrics),
            listeners: Vec::new(),
        }
    }
}

impl<B, T, M> FlagSync<B, T, M>
where
    B: StorageBackend,
    T: Transport,
    M: SyncMetrics,
{
    pub fn fetcher(&self) -> &ConfigFetcher<B, T, M> {
        &self.fetcher
    }

    /// Fetch the initial configuration and start the poller, if configured.
    ///
    /// Returns whether usable configuration is available.
    pub async fn start(&self) -> bool {
        let ready = self.fetcher.fetch_config(None, None).await;

        if let Some(config) = &self.poller_config {
            let mut slot = self.poller.lock();
            if slot.is_none() {
                debug!(target: "flagsync", interval_ms = config.interval.as_millis() as u64, "starting poller");
                *slot = Some(Poller::start(self.fetcher.clone(), config.clone()));
            }
        }
        ready
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|poller| !poller.is_finished())
    }

    /// Stop the poller and cancel every pending fetch
    pub async fn shutdown(&self) {
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller.stop().await;
        }
        self.fetcher.cancel_all();
        debug!(target: "flagsync", "sync context shut down");
    }
}

impl<B, T, M> Deref for FlagSync<B, T, M>
where
    B: StorageBackend,
    T: Transport,
    M: SyncMetrics,
{
    type Target = ConfigFetcher<B, T, M>;

    fn deref(&self) -> &Self::Target {
        &self.fetcher
    }
}

/// Builder for [`FlagSync`]
pub struct FlagSyncBuilder<B, M = NoopMetrics>
where
    B: StorageBackend,
    M: SyncMetrics,
{
    config: FetcherConfig,
    http: HttpConfig,
    coalescing: CoalescerConfig,
    poller: Option<PollerConfig>,
    backend: B,
    metrics: Arc<M>,
    listeners: Vec<Arc<dyn ConfigListener>>,
}

impl<B, M> FlagSyncBuilder<B, M>
where
    B: StorageBackend,
    M: SyncMetrics,
{
    /// Persist entries through `backend` instead of memory only
    pub fn backend<B2: StorageBackend>(self, backend: B2) -> FlagSyncBuilder<B2, M> {
        FlagSyncBuilder {
            config: self.config,
            http: self.http,
            coalescing: self.coalescing,
            poller: self.poller,
            backend,
            metrics: self.metrics,
            listeners: self.listeners,
        }
    }

    pub fn metrics<M2: SyncMetrics>(self, metrics: M2) -> FlagSyncBuilder<B, M2> {
        FlagSyncBuilder {
            config: self.config,
            http: self.http,
            coalescing: self.coalescing,
            poller: self.poller,
            backend: self.backend,
            metrics: Arc::new(metrics),
            listeners: self.listeners,
        }
    }

    pub fn http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    pub fn coalescing(mut self, coalescing: CoalescerConfig) -> Self {
        self.coalescing = coalescing;
        self
    }

    /// Poll for changes in the background once started
    pub fn poll(mut self, poller: PollerConfig) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn listener(mut self, listener: impl ConfigListener) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Build over a reqwest transport configured from the HTTP settings
    pub fn build(self) -> Result<FlagSync<B, ReqwestTransport, M>> {
        let transport = ReqwestTransport::new(&self.http)?;
        Ok(self.build_with_transport(transport))
    }

    /// Build over a custom transport
    pub fn build_with_transport<T: Transport>(self, transport: T) -> FlagSync<B, T, M> {
        let http = HttpClient::new(transport, self.http);
        let fetcher = ConfigFetcher::new(
            self.config,
            self.backend,
            http,
            self.coalescing,
            self.metrics,
        );
        for listener in self.listeners {
            fetcher.add_shared_listener(listener);
        }

        FlagSync {
            fetcher,
            poller_config: self.poller,
            poller: Mutex::new(None),
        }
    }
}
