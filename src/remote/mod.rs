//! Remote Store Module
//!
//! Boundary to the managed backend that owns the data: session identity,
//! profile lookup, paginated reads and writes.
//!
//! # Backends
//! - [`RestStore`]: PostgREST-style HTTP API
//! - [`InMemoryStore`]: local tables for development and tests

mod memory;
mod rest;
mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::Record;
use crate::error::DataError;
use crate::profile::Caller;
use crate::query::QueryDescriptor;

pub use memory::InMemoryStore;
pub use rest::RestStore;
pub use retry::RetryPolicy;

// == Page ==
/// One page of rows plus the exact count of rows matching the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<Record>,
    pub total: u64,
}

// == Profile Row ==
/// Authorization attributes as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub role: String,
    pub section_id: Option<String>,
    pub team_id: Option<String>,
    pub active: bool,
}

// == Mutation ==
/// A write against one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Mutation {
    Create { record: Record },
    Update { id: String, changes: Record },
    Delete { id: String },
}

/// Backend contract consumed by the cache.
///
/// Implementations must report a rejected or expired session as
/// [`DataError::AuthExpired`], row-level-security refusals as
/// [`DataError::PermissionDenied`], and transport failures as
/// [`DataError::Network`] so the fetch step can decide what to retry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Exchanges an access token for the caller's identity.
    async fn identify(&self, access_token: &str) -> Result<String, DataError>;

    /// Looks up the caller's profile; `None` when no profile row exists.
    async fn fetch_profile(&self, caller: &Caller) -> Result<Option<ProfileRow>, DataError>;

    /// Runs a paginated query and returns the page with an exact total.
    async fn fetch_page(&self, caller: &Caller, query: &QueryDescriptor)
        -> Result<Page, DataError>;

    /// Counts rows matching the query, ignoring its page window.
    async fn count(&self, caller: &Caller, query: &QueryDescriptor) -> Result<u64, DataError>;

    /// Applies a write to `table`.
    async fn apply(&self, caller: &Caller, table: &str, mutation: &Mutation)
        -> Result<(), DataError>;
}
