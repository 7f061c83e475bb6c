//! Config fetcher: composes the cache store, transport, deduplicator and coalescer

mod config;
mod health;
mod listener;

pub use config::{FetcherConfig, DEFAULT_BASE_URL};
pub use health::SyncHealth;
pub use listener::ConfigListener;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use flagsync_core::{
    CacheKey, CachedEntry, ConfigDocument, ConfigKey, FlagDefinition, NoopMetrics,
    OutcomeKind, Result, StorageBackend, SyncError, SyncMetrics, SyncOperation, Validators,
};
use flagsync_http::{HttpClient, HttpOutcome, HttpResponse, ReqwestTransport, Transport};
use flagsync_storage::CacheStore;

use crate::coalescer::{Coalescer, CoalescerConfig};
use crate::dedup::Deduplicator;
use listener::Listeners;

type Store<B, M> = CacheStore<B, flagsync_core::JsonSerializer, Arc<M>>;

struct Inner<B, T, M>
where
    B: StorageBackend,
    T: Transport,
    M: SyncMetrics,
{
    config: FetcherConfig,
    store: Store<B, M>,
    http: HttpClient<T>,
    metrics: Arc<M>,
    key: RwLock<ConfigKey>,
    offline: AtomicBool,
    configs: Deduplicator<OutcomeKind>,
    metadata: Deduplicator<Validators>,
    settings: Deduplicator<Value>,
    refresher: Coalescer<bool, M>,
    /// Validators the next coalesced refresh sends instead of the cached ones
    refresh_hint: Mutex<Option<Validators>>,
    /// Last metadata validators per dimension that led to a usable cache
    metadata_seen: DashMap<String, Validators>,
    listeners: Listeners,
}

/// Fetches flag configuration and keeps the cache store current.
///
/// Concurrent fetches for the same key share one HTTP round trip. Any
/// transport failure is answered from the cache when an entry exists,
/// however old. Cloning is cheap and shares all state.
pub struct ConfigFetcher<B, T = ReqwestTransport, M = NoopMetrics>
where
    B: StorageBackend,
    T: Transport,
    M: SyncMetrics,
{
    inner: Arc<Inner<B, T, M>>,
}

impl<B, T, M> Clone for ConfigFetcher<B, T, M>
where
    B: StorageBackend,
    T: Transport,
    M: SyncMetrics,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B, T, M> ConfigFetcher<B, T, M>
where
    B: StorageBackend,
    T: Transport,
    M: SyncMetrics,
{
    pub fn new(
        config: FetcherConfig,
        backend: B,
        http: HttpClient<T>,
        coalescing: CoalescerConfig,
        metrics: Arc<M>,
    ) -> Self {
        let store = CacheStore::with_serializer_and_metrics(
            backend,
            flagsync_core::JsonSerializer,
            Arc::clone(&metrics),
        );
        let key = match &config.user_id {
            Some(user) => ConfigKey::new(&config.client_key, user, &config.namespace),
            None => ConfigKey::anonymous(&config.client_key, &config.namespace),
        };

        Self {
            inner: Arc::new(Inner {
                offline: AtomicBool::new(config.offline),
                key: RwLock::new(key),
                store,
                http,
                refresher: Coalescer::with_metrics(coalescing, Arc::clone(&metrics)),
                refresh_hint: Mutex::new(None),
                metadata_seen: DashMap::new(),
                metrics,
                configs: Deduplicator::new(),
                metadata: Deduplicator::new(),
                settings: Deduplicator::new(),
                listeners: Listeners::default(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Store<B, M> {
        &self.inner.store
    }

    pub fn http(&self) -> &HttpClient<T> {
        &self.inner.http
    }

    /// Cache key of the current user
    pub fn current_key(&self) -> ConfigKey {
        self.inner.key.read().clone()
    }

    /// Switch user; later fetches and reads use that user's cache entry
    pub fn set_user(&self, user_id: Option<&str>) {
        let mut key = self.inner.key.write();
        let next = match user_id {
            Some(user) => key.for_user(user),
            None => ConfigKey::anonymous(key.client_id(), &self.inner.config.namespace),
        };
        debug!(target: "flagsync", from = %*key, to = %next, "switching user");
        *key = next;
        // Metadata confirmations were made against the previous user's entry
        self.inner.metadata_seen.clear();
    }

    pub fn set_offline(&self, offline: bool) {
        let was = self.inner.offline.swap(offline, Ordering::SeqCst);
        if was != offline {
            debug!(target: "flagsync", offline, "offline mode changed");
        }
    }

    pub fn is_offline(&self) -> bool {
        self.inner.offline.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: impl ConfigListener) {
        self.inner.listeners.add(Arc::new(listener));
    }

    pub(crate) fn add_shared_listener(&self, listener: Arc<dyn ConfigListener>) {
        self.inner.listeners.add(listener);
    }

    /// Fetch configuration for the current user.
    ///
    /// Sends the given validators, or the cached entry's when both are `None`.
    /// Returns `true` when usable configuration is cached afterwards: freshly
    /// fetched, confirmed unchanged, or an older entry kept after a failure.
    pub async fn fetch_config(&self, last_modified: Option<String>, etag: Option<String>) -> bool {
        let key = self.current_key();
        let full_key = key.full_key();

        if self.is_offline() {
            self.inner.metrics.record_fetch(&full_key, OutcomeKind::Offline);
            let cached = self.inner.store.get(&key).await.is_some();
            debug!(target: "flagsync", key = %full_key, cached, "offline, skipping config fetch");
            return cached;
        }

        let validators = match Validators::new(last_modified, etag) {
            supplied if !supplied.is_empty() => supplied,
            _ => self
                .inner
                .store
                .get(&key)
                .await
                .map(|entry| entry.validators())
                .unwrap_or_default(),
        };

        let inner = Arc::clone(&self.inner);
        let producer_key = key.clone();
        let result = self
            .inner
            .configs
            .execute(&format!("fetch-config:{full_key}"), move || async move {
                inner.fetch_and_apply(producer_key, validators).await
            })
            .await;

        match result {
            Ok(kind) => {
                let usable = self.inner.store.get(&key).await.is_some();
                if !usable {
                    warn!(target: "flagsync", key = %full_key, outcome = kind.as_str(), "server reported no change but nothing is cached");
                }
                usable
            }
            Err(err) => {
                if self.inner.store.get(&key).await.is_some() {
                    self.inner.metrics.record_stale_fallback(&full_key);
                    warn!(target: "flagsync", key = %full_key, error = %err, "config fetch failed, serving cached configuration");
                    true
                } else {
                    warn!(target: "flagsync", key = %full_key, error = %err, "config fetch failed and nothing is cached");
                    false
                }
            }
        }
    }

    /// Refresh the current user's configuration with cached validators.
    ///
    /// Calls within one coalescing window share a single fetch.
    pub async fn refresh(&self) -> bool {
        self.refresh_with(Validators::default()).await
    }

    /// Refresh, sending `validators` on the conditional request.
    ///
    /// Empty validators fall back to the cached entry's. When several callers
    /// in one window pass validators, the most recent ones are sent.
    pub async fn refresh_with(&self, validators: Validators) -> bool {
        if !validators.is_empty() {
            *self.inner.refresh_hint.lock() = Some(validators);
        }

        let this = self.clone();
        self.inner
            .refresher
            .coalesce(move |batch| async move {
                let hint = this.inner.refresh_hint.lock().take().unwrap_or_default();
                debug!(target: "flagsync", batch, hinted = !hint.is_empty(), "refreshing configuration");
                Ok(this.fetch_config(hint.last_modified, hint.etag).await)
            })
            .await
            .unwrap_or(false)
    }

    /// Metadata validators last confirmed for `dimension`
    pub(crate) fn seen_metadata(&self, dimension: &str) -> Option<Validators> {
        self.inner
            .metadata_seen
            .get(dimension)
            .map(|seen| seen.value().clone())
    }

    pub(crate) fn remember_metadata(&self, dimension: &str, validators: Validators) {
        self.inner
            .metadata_seen
            .insert(dimension.to_string(), validators);
    }

    /// Fetch the validators of a dimension's settings without the body.
    ///
    /// Fails when offline or on any transport failure; there is no cached
    /// fallback for metadata.
    pub async fn fetch_metadata(&self, dimension: &str) -> Result<Validators> {
        if self.is_offline() {
            return Err(SyncError::Offline);
        }

        let url = self.inner.config.metadata_url(dimension)?;
        let inner = Arc::clone(&self.inner);
        let key = format!("fetch-metadata:{dimension}");
        let metric_key = key.clone();
        self.inner
            .metadata
            .execute(&key, move || async move {
                let start = Instant::now();
                let result = inner.http.head(&url, &Validators::default()).await;
                inner
                    .metrics
                    .record_latency(SyncOperation::FetchMetadata, start.elapsed());
                inner.metrics.record_fetch(&metric_key, outcome_kind(&result));
                Ok(result?.response().validators())
            })
            .await
    }

    /// Fetch the SDK settings document
    pub async fn fetch_sdk_settings(&self) -> Result<Value> {
        if self.is_offline() {
            return Err(SyncError::Offline);
        }

        let url = self.inner.config.settings_url()?;
        let inner = Arc::clone(&self.inner);
        self.inner
            .settings
            .execute("fetch-settings", move || async move {
                let start = Instant::now();
                let result = inner.http.get(&url, &Validators::default()).await;
                inner
                    .metrics
                    .record_latency(SyncOperation::FetchSettings, start.elapsed());
                inner.metrics.record_fetch("fetch-settings", outcome_kind(&result));
                result?.response().json()
            })
            .await
    }

    /// Currently cached document, fresh or stale
    pub async fn get_configs(&self) -> Result<ConfigDocument> {
        self.cached_entry()
            .await
            .map(|entry| entry.payload.clone())
            .ok_or(SyncError::CacheNotInitialized)
    }

    pub async fn flag_exists(&self, name: &str) -> bool {
        self.cached_entry()
            .await
            .is_some_and(|entry| entry.payload.contains(name))
    }

    pub async fn get_flag_config(&self, name: &str) -> Option<FlagDefinition> {
        self.cached_entry()
            .await
            .and_then(|entry| entry.payload.flag(name).cloned())
    }

    /// Cached entry of the current user, with its freshness metadata
    pub async fn cached_entry(&self) -> Option<Arc<CachedEntry>> {
        self.inner.store.get(self.current_key()).await
    }

    /// Extend freshness of the cached entry after out-of-band confirmation
    /// that it is current
    pub(crate) async fn mark_current(&self) -> bool {
        self.inner.store.touch(self.current_key()).await.is_some()
    }

    /// Abort every pending fetch and refresh window
    pub fn cancel_all(&self) {
        self.inner.configs.cancel_all();
        self.inner.metadata.cancel_all();
        self.inner.settings.cancel_all();
        self.inner.refresher.cancel_all();
    }

    pub async fn health(&self) -> SyncHealth {
        let cache_state = self
            .inner
            .store
            .lookup(self.current_key())
            .await
            .freshness();

        SyncHealth {
            offline: self.is_offline(),
            in_flight: self.inner.configs.in_flight()
                + self.inner.metadata.in_flight()
                + self.inner.settings.in_flight(),
            pending_coalesced: self.inner.refresher.pending(),
            open_circuits: self.inner.http.open_circuits(),
            cache_state,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl<B, T, M> Inner<B, T, M>
where
    B: StorageBackend,
    T: Transport,
    M: SyncMetrics,
{
    /// One network round trip plus the resulting cache update
    async fn fetch_and_apply(&self, key: ConfigKey, validators: Validators) -> Result<OutcomeKind> {
        let full_key = key.full_key();
        let url = self.config.config_url()?;
        let body = json!({
            "userId": key.user_id(),
            "namespace": self.config.namespace,
            "sdk": {
                "name": self.config.sdk_name,
                "version": self.config.sdk_version,
            },
        });

        debug!(target: "flagsync", key = %full_key, conditional = !validators.is_empty(), "fetching configuration");
        let start = Instant::now();
        let result = self.http.post_json(&url, &body, &validators).await;
        self.metrics
            .record_latency(SyncOperation::FetchConfig, start.elapsed());

        let applied = match result {
            Ok(HttpOutcome::NotModified(_)) => {
                self.store.touch(&key).await;
                debug!(target: "flagsync", key = %full_key, "configuration not modified");
                Ok(OutcomeKind::NotModified)
            }
            Ok(HttpOutcome::Ok(response)) => self.apply(&key, &response).await,
            Err(err) => Err(err),
        };

        let kind = match &applied {
            Ok(kind) => *kind,
            Err(_) => OutcomeKind::Failure,
        };
        self.metrics.record_fetch(&full_key, kind);
        applied
    }

    /// Replace the cached entry with a freshly fetched document
    async fn apply(&self, key: &ConfigKey, response: &HttpResponse) -> Result<OutcomeKind> {
        let full_key = key.full_key();
        let parsed = ConfigDocument::parse(&response.body, &self.config.flags_key)?;
        if !parsed.dropped.is_empty() {
            warn!(target: "flagsync", key = %full_key, dropped = ?parsed.dropped, "skipped malformed flag entries");
            self.metrics
                .record_dropped_flags(&full_key, parsed.dropped.len());
        }

        let ttl = response
            .cache_control()
            .and_then(|cc| cc.freshness())
            .unwrap_or(self.config.ttl);
        let entry = CachedEntry::new(parsed.document, response.validators(), ttl);
        let stored = self.store.put(key, entry, ttl).await;

        debug!(target: "flagsync", key = %full_key, flags = stored.payload.len(), ttl_secs = ttl.as_secs(), "configuration replaced");
        self.listeners.notify(key, &stored.payload);
        Ok(OutcomeKind::Success)
    }
}

fn outcome_kind(result: &Result<HttpOutcome>) -> OutcomeKind {
    match result {
        Ok(HttpOutcome::Ok(_)) => OutcomeKind::Success,
        Ok(HttpOutcome::NotModified(_)) => OutcomeKind::NotModified,
        Err(SyncError::Offline) => OutcomeKind::Offline,
        Err(_) => OutcomeKind::Failure,
    }
}
