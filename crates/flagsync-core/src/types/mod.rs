//! Core types for configuration sync

mod document;
mod entry;
mod lookup;
mod outcome;
mod stats;

pub use document::{
    ConfigDocument, FlagDefinition, FlagValue, ParsedDocument, DEFAULT_FLAGS_KEY,
};
pub use entry::{CachedEntry, Validators};
pub use lookup::{CacheLookup, Freshness};
pub use outcome::{FetchOutcome, OutcomeKind};
pub use stats::StoreStats;
