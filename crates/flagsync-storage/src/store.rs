//! TTL-aware configuration cache store
//!
//! [`CacheStore`] keeps one [`CachedEntry`] per [`ConfigKey`]. Readers get an `Arc`
//! snapshot; a `put` builds the new entry completely and then swaps it in, so a
//! reader never observes a half-written entry.
//!
//! The store never evicts because an entry went stale. Staleness is reported
//! through [`CacheLookup`] and the caller decides whether to re-fetch or to keep
//! serving the old payload.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use flagsync_core::{
    CacheKey, CacheLookup, CachedEntry, JsonSerializer, NoopMetrics, Serializer, StorageBackend,
    StoreStats, SyncMetrics, SyncOperation,
};

/// Cache of configuration entries over a pluggable [`StorageBackend`]
///
/// Generic over:
/// - `B`: The persistence backend
/// - `S`: The serializer used for persisted entries
/// - `M`: The metrics collector
pub struct CacheStore<B, S = JsonSerializer, M = NoopMetrics>
where
    B: StorageBackend,
    S: Serializer,
    M: SyncMetrics,
{
    backend: Arc<B>,
    serializer: Arc<S>,
    metrics: Arc<M>,
    /// Decoded snapshots, authoritative for reads
    snapshots: Arc<DashMap<String, Arc<CachedEntry>>>,
    /// Bumped by every clear; hydration started before a clear is discarded
    clears: Arc<AtomicU64>,
    /// Serializes backend writes and deletes
    persist_lock: Arc<Mutex<()>>,
}

impl<B: StorageBackend> CacheStore<B, JsonSerializer, NoopMetrics> {
    /// Create a store with the JSON serializer and no metrics
    pub fn new(backend: B) -> Self {
        Self::with_serializer_and_metrics(backend, JsonSerializer, NoopMetrics)
    }
}

impl<B, S, M> CacheStore<B, S, M>
where
    B: StorageBackend,
    S: Serializer,
    M: SyncMetrics,
{
    /// Create a store with custom serializer and metrics
    pub fn with_serializer_and_metrics(backend: B, serializer: S, metrics: M) -> Self {
        Self {
            backend: Arc::new(backend),
            serializer: Arc::new(serializer),
            metrics: Arc::new(metrics),
            snapshots: Arc::new(DashMap::new()),
            clears: Arc::new(AtomicU64::new(0)),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get the entry for `key`, fresh or stale.
    ///
    /// Falls back to the backend when no snapshot is loaded (cold start with a
    /// persisted cache). Backend and decoding failures read as "no entry".
    pub async fn get(&self, key: impl CacheKey) -> Option<Arc<CachedEntry>> {
        let full_key = key.full_key();
        loop {
            if let Some(entry) = self.snapshots.get(&full_key) {
                return Some(entry.clone());
            }

            let epoch = self.clears.load(Ordering::SeqCst);
            let entry = self.hydrate(&full_key).await?;

            match self.snapshots.entry(full_key.clone()) {
                // A put that raced with hydration wins
                Entry::Occupied(current) => return Some(current.get().clone()),
                Entry::Vacant(slot) if self.clears.load(Ordering::SeqCst) == epoch => {
                    tracing::debug!(target: "flagsync", key = %full_key, "hydrated cached entry from backend");
                    let entry = Arc::new(entry);
                    slot.insert(Arc::clone(&entry));
                    return Some(entry);
                }
                // Cleared while reading; the bytes may be gone, read again
                Entry::Vacant(_) => continue,
            }
        }
    }

    /// Read and decode the persisted entry for `full_key`
    async fn hydrate(&self, full_key: &str) -> Option<CachedEntry> {
        let start = Instant::now();
        let bytes = match self.backend.get(full_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(target: "flagsync", key = %full_key, error = %err, "cache backend read failed");
                return None;
            }
        };
        self.metrics
            .record_latency(SyncOperation::StoreGet, start.elapsed());

        let decode_start = Instant::now();
        let entry = match self.serializer.deserialize(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(target: "flagsync", key = %full_key, error = %err, "discarding undecodable cached entry");
                return None;
            }
        };
        self.metrics
            .record_latency(SyncOperation::Deserialize, decode_start.elapsed());
        Some(entry)
    }

    /// Get the entry for `key` classified as fresh, stale or missing
    pub async fn lookup(&self, key: impl CacheKey) -> CacheLookup {
        let full_key = key.full_key();
        let lookup = CacheLookup::classify(self.get(full_key.as_str()).await);
        self.metrics.record_lookup(&full_key, lookup.freshness());
        lookup
    }

    /// Store `entry` under `key` with freshness lifetime `ttl`, replacing any previous entry.
    ///
    /// The in-memory snapshot is swapped first; persistence is best effort and a
    /// backend failure is logged, not returned.
    pub async fn put(
        &self,
        key: impl CacheKey,
        mut entry: CachedEntry,
        ttl: Duration,
    ) -> Arc<CachedEntry> {
        let full_key = key.full_key();
        entry.ttl = ttl;
        let entry = Arc::new(entry);

        self.snapshots.insert(full_key.clone(), entry.clone());
        self.persist(&full_key).await;

        entry
    }

    /// Move `fetched_at` of the current entry to now, keeping payload and validators.
    ///
    /// Returns `None` when nothing is cached for `key`.
    pub async fn touch(&self, key: impl CacheKey) -> Option<Arc<CachedEntry>> {
        let full_key = key.full_key();
        self.get(full_key.as_str()).await?;

        // Swapped under the shard lock so a concurrent put is never overwritten
        let touched = {
            let mut current = self.snapshots.get_mut(&full_key)?;
            let touched = Arc::new(current.value().touched());
            *current.value_mut() = Arc::clone(&touched);
            touched
        };
        self.persist(&full_key).await;
        Some(touched)
    }

    /// Remove the entry for `key`. Returns `true` if something was removed.
    pub async fn clear(&self, key: impl CacheKey) -> bool {
        let full_key = key.full_key();
        let _guard = self.persist_lock.lock().await;
        let persisted = match self.backend.delete(&full_key).await {
            Ok(deleted) => deleted,
            Err(err) => {
                tracing::warn!(target: "flagsync", key = %full_key, error = %err, "cache backend delete failed");
                false
            }
        };
        let in_memory = match self.snapshots.entry(full_key) {
            Entry::Occupied(slot) => {
                self.clears.fetch_add(1, Ordering::SeqCst);
                slot.remove();
                true
            }
            Entry::Vacant(_) => {
                self.clears.fetch_add(1, Ordering::SeqCst);
                false
            }
        };
        persisted || in_memory
    }

    /// Remove every entry
    pub async fn clear_all(&self) {
        let _guard = self.persist_lock.lock().await;
        if let Err(err) = self.backend.clear().await {
            tracing::warn!(target: "flagsync", error = %err, "cache backend clear failed");
        }
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.snapshots.clear();
    }

    /// `now < fetched_at + ttl`
    pub fn is_fresh(entry: &CachedEntry) -> bool {
        entry.is_fresh()
    }

    /// Number of entries currently loaded in memory
    pub fn loaded(&self) -> usize {
        self.snapshots.len()
    }

    /// Backend statistics
    pub async fn stats(&self) -> flagsync_core::Result<StoreStats> {
        self.backend.stats().await
    }

    /// Write the current snapshot of `full_key` through to the backend.
    ///
    /// Writes are serialized and always take the latest snapshot, so the
    /// backend never ends up older than memory. Nothing is written once the
    /// key has been cleared.
    async fn persist(&self, full_key: &str) {
        let _guard = self.persist_lock.lock().await;
        let Some(entry) = self.snapshots.get(full_key).map(|e| Arc::clone(e.value())) else {
            return;
        };

        let start = Instant::now();
        let bytes = match self.serializer.serialize(entry.as_ref()) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(target: "flagsync", key = %full_key, error = %err, "failed to encode cached entry");
                return;
            }
        };
        self.metrics
            .record_latency(SyncOperation::Serialize, start.elapsed());

        let write_start = Instant::now();
        if let Err(err) = self.backend.set(full_key, bytes).await {
            tracing::warn!(target: "flagsync", key = %full_key, error = %err, "cache backend write failed");
            return;
        }
        self.metrics
            .record_latency(SyncOperation::StorePut, write_start.elapsed());
    }
}

impl<B, S, M> Clone for CacheStore<B, S, M>
where
    B: StorageBackend,
    S: Serializer,
    M: SyncMetrics,
{
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            serializer: self.serializer.clone(),
            metrics: self.metrics.clone(),
            snapshots: self.snapshots.clone(),
            clears: self.clears.clone(),
            persist_lock: self.persist_lock.clone(),
        }
    }
}
