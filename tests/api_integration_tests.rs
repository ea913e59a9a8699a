//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each gateway endpoint against the
//! in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use indicator_cache::{
    access::AccessSettings,
    api::create_router,
    cache::{CacheStore, FreshnessWindow, MemoryStorage},
    clock::ManualClock,
    remote::{InMemoryStore, ProfileRow},
    AppState, DataAccess,
};
use serde_json::{json, Value};
use tower::ServiceExt;

// == Helper Functions ==

struct TestApp {
    router: Router,
    access: DataAccess,
    remote: Arc<InMemoryStore>,
}

fn profile(role: &str, section: Option<&str>, team: Option<&str>, active: bool) -> ProfileRow {
    ProfileRow {
        role: role.to_string(),
        section_id: section.map(str::to_string),
        team_id: team.map(str::to_string),
        active,
    }
}

fn create_test_app() -> TestApp {
    let clock = ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
    let remote = Arc::new(InMemoryStore::new());

    remote.add_session("token-1", "u1");
    remote.add_profile("u1", profile("ba_ce", Some("S1"), None, true));
    remote.add_session("token-admin", "admin");
    remote.add_profile("admin", profile("gestor_pop", None, None, true));
    remote.add_session("token-off", "u-off");
    remote.add_profile("u-off", profile("ba_op", Some("S1"), Some("T1"), false));

    remote.insert_rows(
        "ocorrencias_aeronauticas",
        vec![
            json!({"id": 1, "secao_id": "S1", "data_ocorrencia": "2024-05-01", "created_at": "2024-05-01T10:00:00Z"}),
            json!({"id": 2, "secao_id": "S1", "data_ocorrencia": "2024-02-10", "created_at": "2024-02-10T10:00:00Z"}),
            json!({"id": 3, "secao_id": "S2", "data_ocorrencia": "2024-05-02", "created_at": "2024-05-02T10:00:00Z"}),
            json!({"id": 42, "secao_id": "S1", "data_ocorrencia": "2024-06-01", "created_at": "2024-06-01T10:00:00Z"}),
        ],
    );

    let store = CacheStore::new(
        FreshnessWindow::default(),
        100,
        Box::new(MemoryStorage::new()),
        "test-",
        Arc::new(clock.clone()),
    );
    let access = DataAccess::new(
        store,
        remote.clone(),
        Arc::new(clock),
        AccessSettings::default(),
    );
    let router = create_router(AppState::new(access.clone(), "memory"));

    TestApp {
        router,
        access,
        remote,
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn send(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn ids(json: &Value) -> Vec<i64> {
    json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_i64().unwrap())
        .collect()
}

// == Authentication Tests ==

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get("/datasets/occurrences", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_to_json(response.into_body()).await;
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn test_unknown_token_is_unauthorized() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get("/datasets/occurrences", Some("nope")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_inactive_profile_is_forbidden() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get("/datasets/occurrences", Some("token-off")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.remote.fetch_count(), 0);
}

// == Dataset Query Tests ==

#[tokio::test]
async fn test_query_is_scoped_and_ordered() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get("/datasets/occurrences?page=1&page_size=10", Some("token-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["dataset"], "occurrences");
    assert_eq!(json["total"], 3);
    assert_eq!(json["freshness"], "fresh");
    assert_eq!(ids(&json), vec![42, 1, 2]);
}

#[tokio::test]
async fn test_second_query_is_served_from_cache() {
    let app = create_test_app();

    for _ in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(get("/datasets/occurrences", Some("token-1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(app.remote.fetch_count(), 1);

    let response = app.router.oneshot(get("/stats", None)).await.unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["fresh_hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["fetches"], 1);
    assert_eq!(json["total_entries"], 1);
    assert_eq!(json["hit_rate"], 0.5);
}

#[tokio::test]
async fn test_pagination_reports_full_total() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get(
            "/datasets/occurrences?page=2&page_size=2",
            Some("token-1"),
        ))
        .await
        .unwrap();

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["total"], 3);
    assert_eq!(json["page"], 2);
    assert_eq!(ids(&json), vec![2]);
}

#[tokio::test]
async fn test_unscoped_role_sees_every_section() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get("/datasets/occurrences", Some("token-admin")))
        .await
        .unwrap();

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["total"], 4);
}

#[tokio::test]
async fn test_oversized_page_is_bad_request() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get(
            "/datasets/occurrences?page_size=10000",
            Some("token-1"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.remote.fetch_count(), 0);
}

#[tokio::test]
async fn test_unknown_dataset_is_not_found() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get("/datasets/nonexistent", Some("token-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refetch_bypasses_fresh_entry() {
    let app = create_test_app();

    app.router
        .clone()
        .oneshot(get("/datasets/occurrences", Some("token-1")))
        .await
        .unwrap();
    let response = app
        .router
        .oneshot(send("POST", "/datasets/occurrences/refetch", "token-1", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.remote.fetch_count(), 2);
}

#[tokio::test]
async fn test_concurrent_queries_share_one_fetch() {
    let app = create_test_app();
    app.remote.hold_fetches();

    let first = tokio::spawn(
        app.router
            .clone()
            .oneshot(get("/datasets/occurrences", Some("token-1"))),
    );
    let second = tokio::spawn(
        app.router
            .clone()
            .oneshot(get("/datasets/occurrences", Some("token-1"))),
    );

    for _ in 0..100 {
        if app.access.stats().await.joined == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    app.remote.release_fetches();

    let first = body_to_json(first.await.unwrap().unwrap().into_body()).await;
    let second = body_to_json(second.await.unwrap().unwrap().into_body()).await;

    assert_eq!(first["total"], second["total"]);
    assert_eq!(app.remote.fetch_count(), 1);
    let stats = app.access.stats().await;
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.joined, 1);
}

// == Mutation Tests ==

#[tokio::test]
async fn test_delete_invalidates_dataset() {
    let app = create_test_app();

    app.router
        .clone()
        .oneshot(get("/datasets/occurrences", Some("token-1")))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(send("DELETE", "/datasets/occurrences/records/42", "token-1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["dataset"], "occurrences");

    let response = app
        .router
        .oneshot(get("/datasets/occurrences", Some("token-1")))
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(ids(&json), vec![1, 2]);
    assert_eq!(app.remote.fetch_count(), 2);
}

#[tokio::test]
async fn test_create_then_query_sees_new_row() {
    let app = create_test_app();

    let response = app
        .router
        .clone()
        .oneshot(send(
            "POST",
            "/datasets/occurrences/records",
            "token-1",
            Some(json!({"secao_id": "S1", "data_ocorrencia": "2024-06-10"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(get("/datasets/occurrences", Some("token-1")))
        .await
        .unwrap();
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["total"], 4);
}

#[tokio::test]
async fn test_update_without_changes_is_bad_request() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(send(
            "PATCH",
            "/datasets/occurrences/records/1",
            "token-1",
            Some(json!({})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_failed_delete_keeps_cache() {
    let app = create_test_app();

    app.router
        .clone()
        .oneshot(get("/datasets/occurrences", Some("token-1")))
        .await
        .unwrap();
    let response = app
        .router
        .clone()
        .oneshot(send("DELETE", "/datasets/occurrences/records/999", "token-1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    app.router
        .oneshot(get("/datasets/occurrences", Some("token-1")))
        .await
        .unwrap();
    assert_eq!(app.remote.fetch_count(), 1);
}

// == Counts Tests ==

#[tokio::test]
async fn test_counts_for_month() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get(
            "/counts?month=2024-05&datasets=occurrences,trainingHours",
            Some("token-1"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["month"], "2024-05");
    assert_eq!(json["counts"]["occurrences"], 1);
    assert_eq!(json["counts"]["trainingHours"], 0);
}

#[tokio::test]
async fn test_counts_rejects_bad_month() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get("/counts?month=2024-13", Some("token-1")))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_counts_unknown_dataset_is_not_found() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get(
            "/counts?month=2024-05&datasets=occurrences,typo",
            Some("token-1"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.remote.fetch_count(), 0);
}

#[tokio::test]
async fn test_counts_rejects_unrepresentable_year() {
    let app = create_test_app();

    let response = app
        .router
        .oneshot(get("/counts?month=300000-01", Some("token-1")))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

// == Purge Tests ==

#[tokio::test]
async fn test_logout_purges_caller_entries() {
    let app = create_test_app();

    app.router
        .clone()
        .oneshot(get("/datasets/occurrences", Some("token-1")))
        .await
        .unwrap();
    app.router
        .clone()
        .oneshot(get("/datasets/occurrences", Some("token-admin")))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(send("POST", "/session/logout", "token-1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["removed"], 1);

    assert_eq!(app.access.stats().await.total_entries, 1);
}

#[tokio::test]
async fn test_clear_requires_unscoped_role() {
    let app = create_test_app();

    app.router
        .clone()
        .oneshot(get("/datasets/occurrences", Some("token-1")))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(send("POST", "/cache/clear", "token-1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.access.stats().await.total_entries, 1);

    let response = app
        .router
        .oneshot(send("POST", "/cache/clear", "token-admin", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.access.stats().await.total_entries, 0);
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let response = app.router.oneshot(get("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["backend"], "memory");
    assert!(json.get("timestamp").is_some());
}
