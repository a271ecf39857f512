//! End-to-end scenarios through the assembled router.

use axum::body::Body;
use axum::Router;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use rxserve_admission::{PressureCell, PressureSample};
use rxserve_cache::InMemoryRemote;
use rxserve_server::domain::{Order, OrderStatus, Patient, Prescription};
use rxserve_server::store::{MemoryStore, Store};
use rxserve_server::{AppBuilder, AppConfig, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

struct TestApp {
    router: Router,
    state: AppState,
    store: Arc<MemoryStore>,
    remote: Arc<InMemoryRemote>,
    cell: PressureCell,
}

async fn build_app(config: AppConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(InMemoryRemote::new());
    let cell = PressureCell::new();

    let parts = AppBuilder::new(config)
        .store(store.clone())
        .remote_store(remote.clone())
        .pressure_cell(cell.clone())
        .build()
        .await
        .expect("app must build");

    TestApp {
        router: parts.router,
        state: parts.state,
        store,
        remote,
        cell,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, Value) {
    let response = tower::ServiceExt::oneshot(router.clone(), request)
        .await
        .expect("infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn seed_orders(store: &MemoryStore, count: usize) {
    for n in 0..count {
        store
            .insert_order(Order {
                id: format!("o{n:04}"),
                prescription_id: "rx-1".into(),
                patient_id: "P1".into(),
                quantity: 1,
                order_date: format!("2026-07-01T00:{:02}:{:02}Z", n / 60, n % 60),
                status: OrderStatus::Pending,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn paged_list_returns_count_page_and_next_link() {
    let app = build_app(AppConfig::default()).await;
    seed_orders(&app.store, 150).await;

    let (status, _, body) = send(
        &app.router,
        get("/api/v2/orders?$top=10&$skip=20&$count=true&$orderby=orderDate%20desc"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["@odata.count"], 150);
    assert_eq!(body["value"].as_array().unwrap().len(), 10);
    let next_link = body["@odata.nextLink"].as_str().unwrap();
    assert!(
        next_link.ends_with("$skip=30&$top=10&$count=true&$orderby=orderDate desc"),
        "unexpected next link: {next_link}"
    );
    assert_eq!(body["@odata.context"], "/api/v2/orders#orders");
}

#[tokio::test]
async fn final_exact_page_has_no_next_link() {
    let app = build_app(AppConfig::default()).await;
    seed_orders(&app.store, 30).await;

    let (status, _, body) = send(&app.router, get("/api/v2/orders?$top=10&$skip=20")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"].as_array().unwrap().len(), 10);
    assert!(body.get("@odata.nextLink").is_none());
}

#[tokio::test]
async fn create_invalidates_cached_lists_and_the_new_order_appears() {
    let app = build_app(AppConfig::default()).await;
    app.store
        .insert_patient(Patient {
            id: "P1".into(),
            name: "Pat One".into(),
            date_of_birth: "1980-01-01".into(),
        })
        .await
        .unwrap();
    app.store
        .insert_prescription(Prescription {
            id: "rx-1".into(),
            patient_id: "P1".into(),
            medication: "amoxicillin".into(),
            refills_remaining: 2,
        })
        .await
        .unwrap();

    // Prime the list cache with the empty result.
    let (status, _, body) = send(&app.router, get("/api/v2/orders")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"].as_array().unwrap().len(), 0);

    let (status, _, created) = send(
        &app.router,
        post_json(
            "/api/v2/orders",
            json!({"prescriptionId": "rx-1", "patientId": "P1", "quantity": 2}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = created["id"].as_str().unwrap().to_string();

    // The cached empty list was invalidated; the fresh query sees the
    // new order.
    let (status, _, body) = send(&app.router, get("/api/v2/orders")).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["value"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], Value::String(order_id));
}

#[tokio::test]
async fn rolled_back_create_leaves_cached_lists_in_place() {
    let app = build_app(AppConfig::default()).await;
    app.store
        .insert_prescription(Prescription {
            id: "rx-0".into(),
            patient_id: "P1".into(),
            medication: "placebo".into(),
            refills_remaining: 0,
        })
        .await
        .unwrap();

    // Prime the list cache.
    let (status, _, _) = send(&app.router, get("/api/v2/orders")).await;
    assert_eq!(status, StatusCode::OK);
    let cached_before = app.remote.len();
    assert!(cached_before > 0, "the list result should be cached");

    let (status, _, body) = send(
        &app.router,
        post_json(
            "/api/v2/orders",
            json!({"prescriptionId": "rx-0", "patientId": "P1", "quantity": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["prescriptionId"][0]
        .as_str()
        .unwrap()
        .contains("no refills remaining"));

    assert_eq!(
        app.remote.len(),
        cached_before,
        "a failed command must not invalidate anything"
    );
}

#[tokio::test]
async fn pressure_rejections_surface_as_429_with_retry_after() {
    let app = build_app(AppConfig::default()).await;

    app.cell.publish(PressureSample {
        taken_at: Instant::now(),
        heap_load: 0.90,
        threadpool_util: 0.0,
        pending_work_depth: 0,
    });

    let (status, headers, body) = send(&app.router, get("/api/v2/orders")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers.get("retry-after").unwrap(), "10");
    assert!(body["reason"]
        .as_str()
        .unwrap()
        .contains("Memory: 90% >= 85%"));

    // Pressure clears; requests flow again.
    app.cell.publish(PressureSample {
        taken_at: Instant::now(),
        heap_load: 0.10,
        threadpool_util: 0.0,
        pending_work_depth: 0,
    });
    let (status, _, _) = send(&app.router, get("/api/v2/orders")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn shutdown_rejects_new_requests_with_503() {
    let app = build_app(AppConfig::default()).await;
    app.state.admission.begin_shutdown();

    let (status, headers, body) = send(&app.router, get("/api/v2/orders")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(headers.get("retry-after").is_some());
    assert_eq!(body["type"], "urn:rxserve:error:shutting_down");

    let (status, _, _) = send(&app.router, get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn supplied_correlation_ids_are_echoed_everywhere() {
    let app = build_app(AppConfig::default()).await;

    let request = Request::builder()
        .uri("/api/v2/orders/no-such-order")
        .header("x-correlation-id", "cid-123")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(headers.get("x-correlation-id").unwrap(), "cid-123");
    assert_eq!(body["traceId"], "cid-123");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn missing_correlation_ids_are_minted_and_echoed() {
    let app = build_app(AppConfig::default()).await;

    let (_, headers, body) = send(&app.router, get("/api/v2/orders/no-such-order")).await;
    let echoed = headers.get("x-correlation-id").unwrap().to_str().unwrap();
    assert!(!echoed.is_empty());
    assert_eq!(body["traceId"], echoed);
}

#[tokio::test]
async fn off_whitelist_orderby_is_a_validation_problem() {
    let app = build_app(AppConfig::default()).await;

    let (status, _, body) = send(&app.router, get("/api/v2/orders?$orderby=ssn")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "urn:rxserve:error:validation");
    assert!(body["errors"]["$orderby"][0].as_str().unwrap().contains("ssn"));
}

#[tokio::test]
async fn api_key_check_gates_the_api_but_not_health() {
    let mut config = AppConfig::default();
    config.auth.api_keys = vec!["test-key".to_string()];
    let app = build_app(config).await;

    let (status, _, body) = send(&app.router, get("/api/v2/orders")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["type"], "urn:rxserve:error:unauthorized");

    let request = Request::builder()
        .uri("/api/v2/orders")
        .header("x-api-key", "test-key")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app.router, get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn remote_cache_outage_degrades_without_failing_requests() {
    let app = build_app(AppConfig::default()).await;
    seed_orders(&app.store, 3).await;

    app.remote.set_failing(true);
    let (status, _, body) = send(&app.router, get("/api/v2/orders")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"].as_array().unwrap().len(), 3);

    app.remote.set_failing(false);
}

#[tokio::test]
async fn patient_scoped_lists_are_invalidated_by_creates() {
    let app = build_app(AppConfig::default()).await;
    app.store
        .insert_prescription(Prescription {
            id: "rx-1".into(),
            patient_id: "P1".into(),
            medication: "amoxicillin".into(),
            refills_remaining: 5,
        })
        .await
        .unwrap();

    let (status, _, body) = send(&app.router, get("/api/v2/patients/P1/orders")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"].as_array().unwrap().len(), 0);

    let (status, _, _) = send(
        &app.router,
        post_json(
            "/api/v2/orders",
            json!({"prescriptionId": "rx-1", "patientId": "P1", "quantity": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, _, body) = send(&app.router, get("/api/v2/patients/P1/orders")).await;
    assert_eq!(body["value"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn health_ready_reports_cache_reachability() {
    let app = build_app(AppConfig::default()).await;

    let (status, _, body) = send(&app.router, get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cache"], "reachable");

    app.remote.set_failing(true);
    let (status, _, body) = send(&app.router, get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["cache"], "unreachable");
}
