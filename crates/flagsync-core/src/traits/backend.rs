//! Storage backend trait

use async_trait::async_trait;
use crate::{Result, StoreStats};

/// Byte-level key-value persistence used by the cache store
///
/// Platform bindings (secure storage, preferences, files) implement this trait.
/// The store only needs `get`/`set`/`delete`/`clear` semantics; the storage format
/// is the store's concern.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Get the raw bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a key
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    /// Get backend statistics
    async fn stats(&self) -> Result<StoreStats>;

    /// Get the number of entries
    async fn len(&self) -> Result<usize>;

    /// Check if the backend is empty
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
