//! Cached configuration entry

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use super::document::ConfigDocument;

/// Conditional-request validators returned by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Validators {
    /// `ETag` response header
    pub etag: Option<String>,
    /// `Last-Modified` response header
    pub last_modified: Option<String>,
}

impl Validators {
    /// Create validators from optional header values
    pub fn new(last_modified: Option<String>, etag: Option<String>) -> Self {
        Self {
            etag,
            last_modified,
        }
    }

    /// True if neither validator is set
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A cached configuration document with freshness metadata
///
/// Entries are immutable once built. A refresh produces a new entry which replaces
/// the old one as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    /// The configuration document
    pub payload: ConfigDocument,
    /// ETag validator
    pub etag: Option<String>,
    /// Last-Modified validator
    pub last_modified: Option<String>,
    /// When the payload was fetched (or last confirmed by a 304)
    pub fetched_at: SystemTime,
    /// Freshness lifetime
    pub ttl: Duration,
}

impl CachedEntry {
    /// Create a new entry fetched now
    pub fn new(payload: ConfigDocument, validators: Validators, ttl: Duration) -> Self {
        Self {
            payload,
            etag: validators.etag,
            last_modified: validators.last_modified,
            fetched_at: SystemTime::now(),
            ttl,
        }
    }

    /// Validators carried by this entry
    pub fn validators(&self) -> Validators {
        Validators {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }

    /// Copy of this entry with `fetched_at` moved to now; payload and validators are kept
    pub fn touched(&self) -> Self {
        Self {
            fetched_at: SystemTime::now(),
            ..self.clone()
        }
    }

    /// Check freshness at a given instant: `now < fetched_at + ttl`
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        match now.duration_since(self.fetched_at) {
            Ok(elapsed) => elapsed < self.ttl,
            // Clock went backwards; entry was fetched "in the future"
            Err(_) => true,
        }
    }

    /// Check freshness against the current clock
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(SystemTime::now())
    }

    /// Expired but still retained
    pub fn is_stale(&self) -> bool {
        !self.is_fresh()
    }

    /// Instant the entry stops being fresh
    pub fn expires_at(&self) -> SystemTime {
        self.fetched_at + self.ttl
    }

    /// Get remaining freshness
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.fetched_at
            .elapsed()
            .ok()
            .and_then(|elapsed| self.ttl.checked_sub(elapsed))
    }

    /// Get age of the entry
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed().unwrap_or_default()
    }
}
