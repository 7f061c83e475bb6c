//! flagsync-storage: Cache store and storage backends for flagsync

pub mod memory;
mod store;

pub use memory::{MemoryBackend, MemoryConfig};
pub use store::CacheStore;
