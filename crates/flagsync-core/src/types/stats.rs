//! Storage statistics

/// Statistics for backend operations
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Number of reads that found a value
    pub hits: u64,
    /// Number of reads that found nothing
    pub misses: u64,
    /// Number of write operations
    pub writes: u64,
    /// Number of delete operations
    pub deletes: u64,
    /// Current number of entries
    pub size: usize,
    /// Approximate memory usage in bytes
    pub memory_bytes: usize,
}

impl StoreStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total reads (hits + misses)
    pub fn total_reads(&self) -> u64 {
        self.hits + self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stats() {
        let stats = StoreStats::default();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio() {
        let stats = StoreStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(stats.total_reads(), 4);
    }
}
