use crate::{Freshness, OutcomeKind, SyncMetrics, SyncOperation};
use std::time::Duration;
use tracing::{debug, warn};

/// Metrics adapter that logs events via `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingMetrics {
    /// Service name/prefix (optional)
    service_name: Option<String>,
}

impl TracingMetrics {
    /// Create new tracing metrics adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with service name prefix
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl SyncMetrics for TracingMetrics {
    fn record_lookup(&self, key: &str, freshness: Freshness) {
        debug!(
            target: "flagsync",
            event = "lookup",
            key = %key,
            freshness = freshness.as_str(),
            service = ?self.service_name,
            "Config Lookup"
        );
    }

    fn record_fetch(&self, key: &str, outcome: OutcomeKind) {
        debug!(
            target: "flagsync",
            event = "fetch",
            key = %key,
            outcome = outcome.as_str(),
            service = ?self.service_name,
            "Config Fetch"
        );
    }

    fn record_stale_fallback(&self, key: &str) {
        warn!(
            target: "flagsync",
            event = "stale_fallback",
            key = %key,
            service = ?self.service_name,
            "Serving Cached Config After Failed Fetch"
        );
    }

    fn record_dropped_flags(&self, key: &str, count: usize) {
        warn!(
            target: "flagsync",
            event = "dropped_flags",
            key = %key,
            count = count,
            service = ?self.service_name,
            "Malformed Flag Entries Dropped"
        );
    }

    fn record_batch(&self, batch_size: usize) {
        tracing::trace!(
            target: "flagsync",
            event = "batch",
            batch_size = batch_size,
            service = ?self.service_name,
            "Coalescing Window Closed"
        );
    }

    fn record_latency(&self, operation: SyncOperation, duration: Duration) {
        tracing::trace!(
            target: "flagsync",
            event = "latency",
            operation = operation.as_str(),
            duration_ms = duration.as_millis(),
            service = ?self.service_name,
            "Sync Operation Latency"
        );
    }
}
