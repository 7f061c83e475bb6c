use flagsync_core::Freshness;

/// Point-in-time view of the sync subsystem for health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHealth {
    pub offline: bool,
    /// Deduplicated network operations currently running
    pub in_flight: usize,
    /// Refresh callers waiting in an open coalescing window
    pub pending_coalesced: usize,
    /// Hosts whose circuit breaker is open or half-open
    pub open_circuits: usize,
    /// Freshness of the current user's cached configuration
    pub cache_state: Freshness,
}

impl SyncHealth {
    /// True when flags may be served from an old or missing configuration
    pub fn is_degraded(&self) -> bool {
        self.offline || self.open_circuits > 0 || self.cache_state != Freshness::Fresh
    }
}
