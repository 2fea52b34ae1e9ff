//! HTTP routes exercised in-process over the in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use promosync_api::routes::health::ReplicaHealth;
use promosync_api::routes::promotions::ProcessCsvResponse;
use promosync_api::telemetry::ApiMetrics;
use promosync_api::{create_router, ApiError, AppState, ErrorCode};
use promosync_core::{Promotion, RetryPolicy};
use promosync_engine::{IngestionLoader, PrimarySink, PromotionService};
use promosync_events::{InMemoryBroker, Producer};
use promosync_storage::{
    CacheAside, InMemoryCache, InMemoryPrimaryStore, InMemoryReplicaStore, PrimaryStore,
    ReplicaStore, Slot,
};
use promosync_test_utils::fixtures;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

struct Harness {
    router: Router,
    primary: InMemoryPrimaryStore,
    replica: InMemoryReplicaStore,
    broker: InMemoryBroker,
}

fn harness() -> Harness {
    let (metrics, registry) = fixtures::metrics_with_registry();
    let primary = InMemoryPrimaryStore::new();
    let replica = InMemoryReplicaStore::new();
    let broker = InMemoryBroker::new();

    let producer = Producer::new(
        Arc::new(broker.clone()),
        RetryPolicy::new(2, Duration::from_millis(1)),
        metrics.clone(),
    );
    let loader = IngestionLoader::new(2, Arc::new(producer), metrics.clone());
    let sink = Arc::new(PrimarySink::new(Arc::new(primary.clone()), metrics.clone()));
    let reader = CacheAside::new(
        Arc::new(InMemoryCache::new()),
        Arc::new(replica.clone()),
        Duration::from_secs(60),
        metrics,
    );
    let service = PromotionService::new(reader, loader, sink);
    let api_metrics = ApiMetrics::new(&registry).unwrap();

    Harness {
        router: create_router(AppState::new(
            service,
            Arc::new(replica.clone()),
            api_metrics,
            registry,
        )),
        primary,
        replica,
        broker,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn json<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn process_csv(form: String) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/process-csv")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap()
}

#[tokio::test]
async fn get_promotion_returns_live_record() {
    let h = harness();
    let record = fixtures::promotion("id1", 12.5);
    h.replica.seed_slot(Slot::A, vec![record.clone()]).unwrap();

    let (status, body) = send(&h.router, get("/promotions/id1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json::<Promotion>(&body), record);

    // The cached copy serializes identically.
    let (_, again) = send(&h.router, get("/promotions/id1")).await;
    assert_eq!(body, again);
}

#[tokio::test]
async fn get_missing_promotion_is_not_found() {
    let h = harness();

    let (status, body) = send(&h.router, get("/promotions/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let err: ApiError = json(&body);
    assert_eq!(err.code, ErrorCode::EntityNotFound);
    assert!(err.message.contains("nope"));
}

#[tokio::test]
async fn process_csv_requires_filename() {
    let h = harness();

    for form in ["", "filename=", "filename=%20%20"] {
        let (status, body) = send(&h.router, process_csv(form.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "form {:?}", form);
        assert_eq!(json::<ApiError>(&body).code, ErrorCode::MissingField);
    }
    assert!(h.broker.is_empty());
}

#[tokio::test]
async fn process_csv_loads_primary_and_publishes() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("promotions.csv");
    std::fs::write(&path, fixtures::csv_document(&fixtures::promotions(25))).unwrap();

    let form = format!("filename={}", path.display());
    let (status, body) = send(&h.router, process_csv(form)).await;
    assert_eq!(status, StatusCode::OK);

    let response: ProcessCsvResponse = json(&body);
    assert_eq!(response.records, 25);
    assert_eq!(response.message, "CSV processed successfully");
    assert_eq!(h.primary.count().await.unwrap(), 25);
    assert_eq!(h.broker.len(), 1);
}

#[tokio::test]
async fn process_csv_rejects_malformed_input() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.csv");
    let mut doc = fixtures::csv_document(&fixtures::promotions(3));
    doc.push_str("only,two\n");
    std::fs::write(&path, doc).unwrap();

    let (status, body) = send(&h.router, process_csv(format!("filename={}", path.display()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json::<ApiError>(&body).code, ErrorCode::InvalidInput);
    assert!(h.broker.is_empty());
}

#[tokio::test]
async fn process_csv_missing_file_is_bad_request() {
    let h = harness();

    let (status, body) = send(
        &h.router,
        process_csv("filename=/definitely/not/here.csv".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json::<ApiError>(&body).code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let h = harness();

    let (status, body) = send(&h.router, get("/health/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"pong");

    h.replica
        .seed_slot(Slot::A, fixtures::promotions(3))
        .unwrap();
    let (status, body) = send(&h.router, get("/health/replica")).await;
    assert_eq!(status, StatusCode::OK);
    let health: ReplicaHealth = json(&body);
    assert_eq!(health.live_slot, Slot::A);
    assert_eq!(health.generation, 0);
    assert_eq!(health.live_records, 3);
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn replica_health_follows_rotation() {
    let h = harness();
    let initial = h.replica.assignment().await.unwrap();
    h.replica
        .seed_slot(initial.live, fixtures::promotions(2))
        .unwrap();
    h.replica
        .insert_batch(initial.shadow, &fixtures::promotions(7))
        .await
        .unwrap();

    let next = h.replica.rotate(&initial).await.unwrap();
    h.replica.clear_slot(next.retired).await.unwrap();

    let (status, body) = send(&h.router, get("/health/replica")).await;
    assert_eq!(status, StatusCode::OK);
    let health: ReplicaHealth = json(&body);
    assert_eq!(health.live_slot, next.live);
    assert_eq!(health.generation, 1);
    assert_eq!(health.live_records, 7);
}

#[tokio::test]
async fn metrics_expose_http_and_engine_series() {
    let h = harness();
    send(&h.router, get("/health/ping")).await;
    send(&h.router, get("/promotions/missing")).await;

    let (status, body) = send(&h.router, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("promosync_http_requests_total"));
    assert!(text.contains("path=\"/promotions/:id\""));
    assert!(text.contains("promosync_cache_misses_total"));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let h = harness();
    let (status, _) = send(&h.router, get("/nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
