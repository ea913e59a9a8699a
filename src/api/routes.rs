//! API Routes
//!
//! Configures the Axum router with all gateway endpoints.

use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_handler, counts_handler, create_handler, delete_handler, health_handler, logout_handler,
    query_handler, refetch_handler, stats_handler, update_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /datasets/:dataset` - One page of a dataset, through the cache
/// - `POST /datasets/:dataset/refetch` - Same page, bypassing freshness
/// - `POST /datasets/:dataset/records` - Create a record
/// - `PATCH /datasets/:dataset/records/:id` - Update a record
/// - `DELETE /datasets/:dataset/records/:id` - Delete a record
/// - `GET /counts` - Per-dataset row counts for one month
/// - `POST /session/logout` - Purge the caller's cached data
/// - `POST /cache/clear` - Purge everything
/// - `GET /stats` - Cache statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/datasets/:dataset", get(query_handler))
        .route("/datasets/:dataset/refetch", post(refetch_handler))
        .route("/datasets/:dataset/records", post(create_handler))
        .route(
            "/datasets/:dataset/records/:id",
            patch(update_handler).delete(delete_handler),
        )
        .route("/counts", get(counts_handler))
        .route("/session/logout", post(logout_handler))
        .route("/cache/clear", post(clear_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessSettings, DataAccess};
    use crate::cache::{CacheStore, FreshnessWindow, MemoryStorage};
    use crate::clock::SystemClock;
    use crate::remote::{InMemoryStore, ProfileRow};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let remote = Arc::new(InMemoryStore::new());
        remote.add_session("token-1", "u1");
        remote.add_profile(
            "u1",
            ProfileRow {
                role: "ba_ce".into(),
                section_id: Some("S1".into()),
                team_id: None,
                active: true,
            },
        );
        let clock = Arc::new(SystemClock);
        let store = CacheStore::new(
            FreshnessWindow::default(),
            100,
            Box::new(MemoryStorage::new()),
            "test-",
            clock.clone(),
        );
        let access = DataAccess::new(store, remote, clock, AccessSettings::default());
        create_router(AppState::new(access, "memory"))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dataset_requires_token() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/datasets/occurrences")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dataset_with_token() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/datasets/occurrences?page=1&page_size=5")
                    .header("authorization", "Bearer token-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_dataset_not_found() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/datasets/nonexistent")
                    .header("authorization", "Bearer token-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
