//! HTTP transport for flagsync
//!
//! Conditional requests, retry with exponential backoff, per-host circuit
//! breaking and classification of every failure into [`SyncError`].
//!
//! [`SyncError`]: flagsync_core::SyncError

pub mod cache_control;
pub mod circuit_breaker;
pub mod client;
pub mod policy;
pub mod response;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache_control::CacheControl;
pub use circuit_breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use client::{HttpClient, HttpOutcome};
pub use policy::{HttpConfig, RetryPolicy};
pub use response::{HttpRequest, HttpResponse};
pub use transport::{classify, ReqwestTransport, Transport};
