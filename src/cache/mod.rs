//! Cache Module
//!
//! Two-tier (memory + durable) storage of query results with a
//! fresh/stale/expired lifecycle.

mod durable;
mod entry;
mod key;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use durable::{DurableStorage, FileStorage, MemoryStorage};
pub use entry::{CacheEntry, DurableRecord, Freshness, FreshnessWindow, Record};
pub use key::{CacheKey, FilterSet, YearMonth};
pub use lru::LruTracker;
pub use stats::CacheStats;
pub use store::{CacheStore, RehydrateReport};

// == Public Constants ==
/// Default namespace for durable cache items
pub const DEFAULT_PREFIX: &str = "sci-historico-cache-";
