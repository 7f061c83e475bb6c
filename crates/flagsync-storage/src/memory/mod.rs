//! In-memory storage backend

mod backend;

pub use backend::{MemoryBackend, MemoryConfig};
