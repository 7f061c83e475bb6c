//! Cache lookup result type

use std::sync::Arc;

use super::entry::CachedEntry;

/// Freshness classification of a cache read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    Fresh,
    Stale,
    Missing,
}

impl Freshness {
    /// Get freshness as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Missing => "missing",
        }
    }
}

/// Result of a cache store lookup
///
/// Entries are shared snapshots: a later `put` swaps in a new entry and never
/// mutates one a reader already holds.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Within TTL
    Fresh(Arc<CachedEntry>),
    /// Past TTL but retained
    Stale(Arc<CachedEntry>),
    /// Nothing cached
    Miss,
}

impl CacheLookup {
    /// Classify an optional entry against the current clock
    pub fn classify(entry: Option<Arc<CachedEntry>>) -> Self {
        match entry {
            Some(entry) if entry.is_fresh() => CacheLookup::Fresh(entry),
            Some(entry) => CacheLookup::Stale(entry),
            None => CacheLookup::Miss,
        }
    }

    pub fn freshness(&self) -> Freshness {
        match self {
            CacheLookup::Fresh(_) => Freshness::Fresh,
            CacheLookup::Stale(_) => Freshness::Stale,
            CacheLookup::Miss => Freshness::Missing,
        }
    }

    /// Check if this is a fresh hit
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheLookup::Fresh(_))
    }

    /// Check if this is a miss
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheLookup::Miss)
    }

    /// Check if result is usable (fresh or stale)
    pub fn is_usable(&self) -> bool {
        !self.is_miss()
    }

    /// Borrow the entry, if any
    pub fn entry(&self) -> Option<&Arc<CachedEntry>> {
        match self {
            CacheLookup::Fresh(entry) | CacheLookup::Stale(entry) => Some(entry),
            CacheLookup::Miss => None,
        }
    }

    /// Extract the entry, consuming the result
    pub fn into_entry(self) -> Option<Arc<CachedEntry>> {
        match self {
            CacheLookup::Fresh(entry) | CacheLookup::Stale(entry) => Some(entry),
            CacheLookup::Miss => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigDocument, Validators};
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_fresh() {
        let entry = CachedEntry::new(
            ConfigDocument::default(),
            Validators::default(),
            Duration::from_secs(60),
        );
        let lookup = CacheLookup::classify(Some(Arc::new(entry)));

        assert!(lookup.is_fresh());
        assert!(lookup.is_usable());
        assert_eq!(lookup.freshness(), Freshness::Fresh);
    }

    #[test]
    fn test_stale_is_still_usable() {
        let mut entry = CachedEntry::new(
            ConfigDocument::default(),
            Validators::default(),
            Duration::from_secs(60),
        );
        entry.fetched_at = SystemTime::UNIX_EPOCH;
        let lookup = CacheLookup::classify(Some(Arc::new(entry)));

        assert!(!lookup.is_fresh());
        assert!(lookup.is_usable());
        assert_eq!(lookup.freshness().as_str(), "stale");
        assert!(lookup.into_entry().is_some());
    }

    #[test]
    fn test_miss() {
        let lookup = CacheLookup::classify(None);
        assert!(lookup.is_miss());
        assert!(!lookup.is_usable());
        assert!(lookup.entry().is_none());
    }
}
