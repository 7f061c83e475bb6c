//! In-memory storage backend using DashMap

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use flagsync_core::{Result, StorageBackend, StoreStats};

/// Configuration for the memory backend
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Number of entries to pre-allocate
    pub initial_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 16,
        }
    }
}

impl MemoryConfig {
    /// Create config with specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            initial_capacity: capacity,
        }
    }
}

/// Internal statistics tracking
#[derive(Debug, Default)]
struct MemoryStats {
    hits: u64,
    misses: u64,
    writes: u64,
    deletes: u64,
}

/// In-memory storage backend
///
/// Never evicts on its own; content only changes through `set`, `delete` and `clear`.
/// Cloning creates a new handle to the SAME underlying store.
#[derive(Clone)]
pub struct MemoryBackend {
    /// Main data store
    data: Arc<DashMap<String, Vec<u8>>>,
    /// Statistics
    stats: Arc<RwLock<MemoryStats>>,
}

impl MemoryBackend {
    /// Create a new memory backend
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            data: Arc::new(DashMap::with_capacity(config.initial_capacity)),
            stats: Arc::new(RwLock::new(MemoryStats::default())),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(MemoryConfig::default())
    }

    /// Get approximate memory usage
    pub fn memory_usage(&self) -> usize {
        self.data
            .iter()
            .map(|entry| entry.value().len() + entry.key().len())
            .sum()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.data.get(key) {
            Some(value) => {
                self.stats.write().hits += 1;
                Ok(Some(value.clone()))
            }
            None => {
                self.stats.write().misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.data.insert(key.to_string(), value);
        self.stats.write().writes += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if self.data.remove(key).is_some() {
            self.stats.write().deletes += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.contains_key(key))
    }

    async fn clear(&self) -> Result<()> {
        self.data.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let stats = self.stats.read();
        Ok(StoreStats {
            hits: stats.hits,
            misses: stats.misses,
            writes: stats.writes,
            deletes: stats.deletes,
            size: self.data.len(),
            memory_bytes: self.memory_usage(),
        })
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_get_set() {
        let backend = MemoryBackend::new(MemoryConfig::default());

        backend.set("key1", b"value1".to_vec()).await.unwrap();

        let result = backend.get("key1").await.unwrap();
        assert_eq!(result, Some(b"value1".to_vec()));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let backend = MemoryBackend::with_defaults();

        backend.set("key1", b"old".to_vec()).await.unwrap();
        backend.set("key1", b"new".to_vec()).await.unwrap();

        assert_eq!(backend.get("key1").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(backend.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MemoryBackend::with_defaults();

        backend.set("key1", b"value1".to_vec()).await.unwrap();
        assert!(backend.exists("key1").await.unwrap());

        assert!(backend.delete("key1").await.unwrap());
        assert!(!backend.exists("key1").await.unwrap());
        assert!(!backend.delete("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear() {
        let backend = MemoryBackend::with_defaults();

        backend.set("key1", b"value1".to_vec()).await.unwrap();
        backend.set("key2", b"value2".to_vec()).await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 2);

        backend.clear().await.unwrap();
        assert!(backend.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_stats() {
        let backend = MemoryBackend::with_defaults();

        backend.set("key1", b"value1".to_vec()).await.unwrap();
        backend.get("key1").await.unwrap();
        backend.get("nonexistent").await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.memory_bytes, "key1".len() + "value1".len());
    }

    #[tokio::test]
    async fn test_clone_shares_data() {
        let backend = MemoryBackend::with_defaults();
        let handle = backend.clone();

        backend.set("key1", b"value1".to_vec()).await.unwrap();
        assert!(handle.exists("key1").await.unwrap());
    }
}
