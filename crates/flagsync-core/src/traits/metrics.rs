//! Metrics trait for sync observability

use std::sync::Arc;
use std::time::Duration;

use crate::{Freshness, OutcomeKind};

/// Sync operation for latency tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOperation {
    FetchConfig,
    FetchMetadata,
    FetchSettings,
    StoreGet,
    StorePut,
    Serialize,
    Deserialize,
}

impl SyncOperation {
    /// Get operation as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::FetchConfig => "fetch_config",
            SyncOperation::FetchMetadata => "fetch_metadata",
            SyncOperation::FetchSettings => "fetch_settings",
            SyncOperation::StoreGet => "store_get",
            SyncOperation::StorePut => "store_put",
            SyncOperation::Serialize => "serialize",
            SyncOperation::Deserialize => "deserialize",
        }
    }
}

/// Trait for sync metrics/observability
///
/// Implement this to integrate with your metrics system (Prometheus, StatsD, etc.)
pub trait SyncMetrics: Send + Sync + 'static {
    /// Record a cache read and how fresh it was
    fn record_lookup(&self, key: &str, freshness: Freshness);

    /// Record the outcome of a network fetch
    fn record_fetch(&self, key: &str, outcome: OutcomeKind);

    /// Record a failed fetch that was answered from the cache
    fn record_stale_fallback(&self, key: &str);

    /// Record malformed flag entries dropped from a response
    fn record_dropped_flags(&self, key: &str, count: usize);

    /// Record a closed coalescing window
    fn record_batch(&self, batch_size: usize);

    /// Record operation latency
    fn record_latency(&self, operation: SyncOperation, duration: Duration);
}

/// No-op metrics implementation (default)
///
/// Zero overhead when metrics are not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl SyncMetrics for NoopMetrics {
    #[inline]
    fn record_lookup(&self, _key: &str, _freshness: Freshness) {}

    #[inline]
    fn record_fetch(&self, _key: &str, _outcome: OutcomeKind) {}

    #[inline]
    fn record_stale_fallback(&self, _key: &str) {}

    #[inline]
    fn record_dropped_flags(&self, _key: &str, _count: usize) {}

    #[inline]
    fn record_batch(&self, _batch_size: usize) {}

    #[inline]
    fn record_latency(&self, _operation: SyncOperation, _duration: Duration) {}
}

impl<M: SyncMetrics + ?Sized> SyncMetrics for Arc<M> {
    fn record_lookup(&self, key: &str, freshness: Freshness) {
        (**self).record_lookup(key, freshness)
    }

    fn record_fetch(&self, key: &str, outcome: OutcomeKind) {
        (**self).record_fetch(key, outcome)
    }

    fn record_stale_fallback(&self, key: &str) {
        (**self).record_stale_fallback(key)
    }

    fn record_dropped_flags(&self, key: &str, count: usize) {
        (**self).record_dropped_flags(key, count)
    }

    fn record_batch(&self, batch_size: usize) {
        (**self).record_batch(batch_size)
    }

    fn record_latency(&self, operation: SyncOperation, duration: Duration) {
        (**self).record_latency(operation, duration)
    }
}

/// Metrics adapter using the `metrics` crate
///
/// # Example
/// ```ignore
/// use flagsync_core::MetricsCrateAdapter;
///
/// let metrics = MetricsCrateAdapter::new("flagsync");
/// // Emits: flagsync_fetches_total, flagsync_stale_fallbacks_total, etc.
/// ```
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsCrateAdapter {
    prefix: String,
}

#[cfg(feature = "metrics")]
impl MetricsCrateAdapter {
    /// Create a new adapter with the given metric name prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn metric_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }
}

#[cfg(feature = "metrics")]
impl SyncMetrics for MetricsCrateAdapter {
    fn record_lookup(&self, _key: &str, freshness: Freshness) {
        metrics::counter!(self.metric_name("lookups_total"), "freshness" => freshness.as_str())
            .increment(1);
    }

    fn record_fetch(&self, _key: &str, outcome: OutcomeKind) {
        metrics::counter!(self.metric_name("fetches_total"), "outcome" => outcome.as_str())
            .increment(1);
    }

    fn record_stale_fallback(&self, _key: &str) {
        metrics::counter!(self.metric_name("stale_fallbacks_total")).increment(1);
    }

    fn record_dropped_flags(&self, _key: &str, count: usize) {
        metrics::counter!(self.metric_name("dropped_flags_total")).increment(count as u64);
    }

    fn record_batch(&self, batch_size: usize) {
        metrics::histogram!(self.metric_name("batch_size")).record(batch_size as f64);
    }

    fn record_latency(&self, operation: SyncOperation, duration: Duration) {
        metrics::histogram!(
            self.metric_name("operation_duration_seconds"),
            "operation" => operation.as_str()
        )
        .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_as_str() {
        assert_eq!(SyncOperation::FetchConfig.as_str(), "fetch_config");
        assert_eq!(SyncOperation::StorePut.as_str(), "store_put");
    }

    #[test]
    fn test_noop_metrics() {
        let metrics = NoopMetrics;
        // Just verify these don't panic
        metrics.record_lookup("key", Freshness::Stale);
        metrics.record_fetch("key", OutcomeKind::NotModified);
        metrics.record_latency(SyncOperation::FetchConfig, Duration::from_millis(1));
    }
}
