//! API Handlers
//!
//! HTTP request handlers exposing the data-access facade to dashboard
//! clients. Every data endpoint authenticates the caller from its bearer
//! token; the caller id is never taken from the request itself.

use std::collections::HashMap;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use tracing::info;

use crate::access::DataAccess;
use crate::cache::Record;
use crate::error::{DataError, Result};
use crate::models::{
    dataset_request, CountsParams, CountsResponse, DatasetPageResponse, HealthResponse,
    MutationResponse, PurgeResponse, StatsResponse,
};
use crate::profile::{Caller, Role};
use crate::remote::Mutation;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared cache runtime
    pub access: DataAccess,
    /// Name of the remote store, reported by `/health`
    pub backend: String,
}

impl AppState {
    pub fn new(access: DataAccess, backend: impl Into<String>) -> Self {
        Self {
            access,
            backend: backend.into(),
        }
    }
}

// == Authentication ==
/// Caller resolved from the `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Caller);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = DataError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(DataError::AuthExpired)?;

        Ok(Self(state.access.identify(token).await?))
    }
}

/// Handler for GET /datasets/:dataset
pub async fn query_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(dataset): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<DatasetPageResponse>> {
    let request = dataset_request(&dataset, &params)?;
    let outcome = state.access.query(&caller, &request).await?;
    Ok(Json(DatasetPageResponse::new(&request, outcome)))
}

/// Handler for POST /datasets/:dataset/refetch
pub async fn refetch_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(dataset): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<DatasetPageResponse>> {
    let request = dataset_request(&dataset, &params)?;
    let outcome = state.access.refetch(&caller, &request).await?;
    Ok(Json(DatasetPageResponse::new(&request, outcome)))
}

/// Handler for POST /datasets/:dataset/records
pub async fn create_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path(dataset): Path<String>,
    Json(record): Json<Record>,
) -> Result<Json<MutationResponse>> {
    state
        .access
        .mutate(&caller, &dataset, &Mutation::Create { record })
        .await?;
    Ok(Json(MutationResponse::new(dataset, "created")))
}

/// Handler for PATCH /datasets/:dataset/records/:id
pub async fn update_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path((dataset, id)): Path<(String, String)>,
    Json(changes): Json<Record>,
) -> Result<Json<MutationResponse>> {
    if changes.is_empty() {
        return Err(DataError::InvalidRequest("no changes given".to_string()));
    }
    state
        .access
        .mutate(&caller, &dataset, &Mutation::Update { id, changes })
        .await?;
    Ok(Json(MutationResponse::new(dataset, "updated")))
}

/// Handler for DELETE /datasets/:dataset/records/:id
pub async fn delete_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Path((dataset, id)): Path<(String, String)>,
) -> Result<Json<MutationResponse>> {
    state
        .access
        .mutate(&caller, &dataset, &Mutation::Delete { id })
        .await?;
    Ok(Json(MutationResponse::new(dataset, "deleted")))
}

/// Handler for GET /counts?month=YYYY-MM
pub async fn counts_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    Query(params): Query<CountsParams>,
) -> Result<Json<CountsResponse>> {
    let datasets = params
        .dataset_ids()
        .unwrap_or_else(|| state.access.catalog().ids().map(str::to_string).collect());
    let counts = state
        .access
        .month_counts(&caller, &datasets, params.month)
        .await?;
    Ok(Json(CountsResponse {
        month: params.month,
        counts,
    }))
}

/// Handler for POST /session/logout
///
/// Purges the caller's cached pages and profile.
pub async fn logout_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> Json<PurgeResponse> {
    let removed = state.access.logout(&caller).await;
    info!("Caller {} logged out", caller.id);
    Json(PurgeResponse::new(&format!("caller {}", caller.id), removed))
}

/// Handler for POST /cache/clear
///
/// Global wipe; restricted to unscoped callers.
pub async fn clear_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
) -> Result<Json<PurgeResponse>> {
    let profile = state.access.profile(&caller).await?;
    if profile.role != Role::Unscoped {
        return Err(DataError::PermissionDenied(
            "clearing the cache requires an unscoped role".to_string(),
        ));
    }
    let removed = state.access.clear().await;
    Ok(Json(PurgeResponse::new("all callers", removed)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.access.stats().await;
    Json(StatsResponse::new(stats, state.access.in_flight()))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.backend))
}
