//! Indicator Cache - read-through data access for operational dashboards
//!
//! Serves role-scoped, paginated indicator datasets from a two-tier cache
//! with stale-while-revalidate, in-flight request deduplication and
//! mutation-driven invalidation.

pub mod access;
pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod profile;
pub mod query;
pub mod remote;
pub mod tasks;

pub use access::{DataAccess, QueryRequest, QueryView};
pub use api::AppState;
pub use config::Config;
pub use error::DataError;
pub use tasks::spawn_cleanup_task;
