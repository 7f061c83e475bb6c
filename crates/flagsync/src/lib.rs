//! flagsync: offline-tolerant feature-flag configuration sync
//!
//! # Features
//!
//! - **Single-flight fetches**: concurrent callers share one HTTP round trip
//! - **Stale-while-revalidate**: a failed fetch serves the cached configuration
//! - **Conditional requests** with `ETag` / `Last-Modified`, `304` handling
//! - **Retry and per-host circuit breaking** in the transport
//! - **Coalesced refreshes** and a metadata-driven background poller
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use flagsync::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let sync = FlagSync::builder(FetcherConfig::new("client-key"))
//!         .poll(PollerConfig::default())
//!         .build()?;
//!
//!     if sync.start().await {
//!         let enabled = sync
//!             .get_flag_config("new-checkout")
//!             .await
//!             .and_then(|flag| flag.value().as_bool())
//!             .unwrap_or(false);
//!         println!("new-checkout: {enabled}");
//!     }
//!
//!     sync.shutdown().await;
//!     Ok(())
//! }
//! ```

mod coalescer;
mod context;
mod dedup;
mod fetcher;
mod poller;

// Re-export core
pub use flagsync_core::*;

// Re-export storage and transport
pub use flagsync_http::{
    BreakerConfig, BreakerState, CacheControl, HttpClient, HttpConfig, HttpOutcome, HttpRequest,
    HttpResponse, ReqwestTransport, RetryPolicy, Transport,
};
pub use flagsync_storage::{CacheStore, MemoryBackend, MemoryConfig};

pub use coalescer::{Coalescer, CoalescerConfig};
pub use context::{FlagSync, FlagSyncBuilder};
pub use dedup::Deduplicator;
pub use fetcher::{ConfigFetcher, ConfigListener, FetcherConfig, SyncHealth, DEFAULT_BASE_URL};
pub use poller::{poll_once, PollAction, Poller, PollerConfig};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CoalescerConfig, ConfigDocument, ConfigFetcher, ConfigKey, ConfigListener, FetcherConfig,
        FlagDefinition, FlagSync, FlagValue, HttpConfig, MemoryBackend, PollerConfig, Result,
        RetryPolicy, SyncError, SyncHealth,
    };
}
