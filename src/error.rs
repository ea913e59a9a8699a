//! Error types for the data-access cache
//!
//! Provides the error taxonomy surfaced to callers using thiserror, plus the
//! durable-tier error that never leaves the cache store.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Data Error Enum ==
/// Unified error type surfaced by the data-access facade.
///
/// `Clone` so a single failed fetch can be handed to every caller that was
/// waiting on the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// Connectivity or DNS failure talking to the remote store
    #[error("Network error: {0}")]
    Network(String),

    /// The remote store did not answer within the fetch ceiling
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The caller's session is no longer valid
    #[error("Session expired, sign in again")]
    AuthExpired,

    /// The caller is authenticated but the profile is inactive or missing
    #[error("Profile inactive or not found")]
    ProfileInactive,

    /// Authorization scoping rejected the request
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Dataset identifier is not registered in the catalog
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    /// Malformed cached or remote payload
    #[error("Malformed payload: {0}")]
    Parse(String),

    /// Caller supplied an unusable argument
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The remote store refused a write
    #[error("Mutation failed: {0}")]
    Mutation(String),
}

impl DataError {
    /// Returns true for transient failures worth retrying in the fetch step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DataError::Network(_) | DataError::Timeout(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for DataError {
    fn into_response(self) -> Response {
        let status = match &self {
            DataError::AuthExpired => StatusCode::UNAUTHORIZED,
            DataError::ProfileInactive | DataError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            DataError::UnknownDataset(_) => StatusCode::NOT_FOUND,
            DataError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DataError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DataError::Network(_) | DataError::Parse(_) => StatusCode::BAD_GATEWAY,
            DataError::Mutation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Storage Error Enum ==
/// Failures of the durable cache tier.
///
/// These are logged and swallowed by the store; a durable failure degrades
/// to a cache miss, never to a failed read.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage name: {0}")]
    InvalidName(String),
}

// == Config Error Enum ==
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got '{value}'")]
    Unparsable {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("FRESH_FOR_SECS ({fresh}) must be below STALE_FOR_SECS ({stale})")]
    InvertedWindow { fresh: u64, stale: u64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

// == Result Type Alias ==
/// Convenience Result type for the data-access layer.
pub type Result<T> = std::result::Result<T, DataError>;
