//! flagsync-core: Core types and traits for the flagsync library
//!
//! This crate provides the error taxonomy, the cached-entry data model and the
//! seams (storage backend, metrics, serializer) shared by the rest of the
//! flagsync workspace.

mod error;
mod traits;
mod types;

pub use error::{Result, StatusKind, SyncError};
pub use traits::*;
pub use types::*;
