//! Data Access Module
//!
//! The read-through facade consumed by dashboard components: a process-wide
//! [`DataAccess`] runtime shared by every component, per-component
//! [`QueryView`]s that track loading and error state, and the
//! [`MutationInvalidator`] that keeps writes and cached reads consistent.

mod facade;
mod invalidator;
mod view;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::{CacheEntry, FilterSet, Freshness, Record};
use crate::config::Config;
use crate::query::DatasetCatalog;
use crate::remote::RetryPolicy;

pub use facade::DataAccess;
pub use invalidator::MutationInvalidator;
pub use view::{Phase, QuerySnapshot, QueryView};

/// Page size used when a request does not name one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

// == Query Request ==
/// One logical query: a dataset, its filters and a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub dataset: String,
    pub filters: FilterSet,
    pub page: u32,
    pub page_size: u32,
}

impl QueryRequest {
    /// First page of `dataset`, unfiltered.
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            filters: FilterSet::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }
}

// == Query Outcome ==
/// A served page and how fresh it was when served.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub data: Arc<Vec<Record>>,
    pub total: u64,
    pub freshness: Freshness,
    /// Write time of the underlying entry, Unix milliseconds
    pub written_at: i64,
}

impl QueryOutcome {
    pub fn new(entry: &CacheEntry, freshness: Freshness) -> Self {
        Self {
            data: Arc::clone(entry.payload()),
            total: entry.total(),
            freshness,
            written_at: entry.written_at(),
        }
    }
}

/// What one expiry sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Cache entries past the stale window
    pub entries: usize,
    /// Profiles and token mappings past their TTL
    pub identities: usize,
}

// == Access Settings ==
/// Tunables of the facade runtime that are not owned by the cache store.
#[derive(Debug, Clone)]
pub struct AccessSettings {
    pub catalog: DatasetCatalog,
    pub retry: RetryPolicy,
    pub profile_ttl: Duration,
    pub debounce: Duration,
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for AccessSettings {
    fn from(config: &Config) -> Self {
        Self {
            catalog: DatasetCatalog::standard(),
            retry: config.retry_policy(),
            profile_ttl: config.profile_ttl(),
            debounce: config.debounce(),
        }
    }
}
