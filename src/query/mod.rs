//! Query Module
//!
//! Dataset metadata and the pure builder that turns a caller's request into a
//! role-scoped, ordered, paginated query.

mod builder;
mod catalog;

pub use builder::{
    validate_column, Filter, OrderBy, PageRange, ParentJoin, QueryBuilder, QueryDescriptor,
};
pub use catalog::{
    DatasetCatalog, DatasetDescriptor, Scoping, CREATED_AT_COLUMN, DEFAULT_LOOKBACK_MONTHS,
    ID_COLUMN, SECTION_COLUMN, TEAM_COLUMN, UPDATED_AT_COLUMN,
};
