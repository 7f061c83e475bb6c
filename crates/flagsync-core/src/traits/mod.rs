//! Core traits for configuration sync

mod backend;
mod key;
mod metrics;
mod serializer;
mod tracing;

pub use backend::StorageBackend;
pub use key::{CacheKey, ConfigKey, ANONYMOUS_USER, KEY_PREFIX};
pub use metrics::{NoopMetrics, SyncMetrics, SyncOperation};
pub use serializer::{JsonSerializer, Serializer};
pub use self::tracing::TracingMetrics;

#[cfg(feature = "metrics")]
pub use metrics::MetricsCrateAdapter;
