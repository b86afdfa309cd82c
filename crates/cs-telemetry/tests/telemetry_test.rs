use axum::{body::Body, http::Request, middleware, routing::get, Router};
use cs_telemetry::logging;
use cs_telemetry::metrics::{global_metrics, MetricsCollector, API_REQUESTS_TOTAL, SYNC_OPERATIONS_TOTAL};
use cs_telemetry::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[test]
fn logging_init_is_idempotent() {
    logging::init_logging("cms-sync-test", "debug");
    logging::init_logging("cms-sync-test", "info");
    logging::init_logging_json("cms-sync-test", "info");
    tracing::info!(platform = "shopify", "log line after repeated init");
}

// ---------------------------------------------------------------------------
// Metrics export
// ---------------------------------------------------------------------------

#[test]
fn prometheus_export_groups_series_under_one_type_line() {
    let m = MetricsCollector::new();
    m.record_sync("shopify", "outbound", "success", 0.1);
    m.record_sync("shopify", "inbound", "failure", 0.3);

    let text = m.export_prometheus();
    assert_eq!(text.matches("# TYPE sync_operations_total counter").count(), 1);
    assert!(text.contains(
        "sync_operations_total{direction=\"inbound\",outcome=\"failure\",platform=\"shopify\"} 1"
    ));
    assert!(text.contains("# TYPE sync_duration_seconds histogram"));
    assert!(text.contains("sync_duration_seconds_count 2"));
}

#[test]
fn default_collector_exposes_queue_gauges_before_any_event() {
    let text = MetricsCollector::with_defaults().export_prometheus();
    assert!(text.contains("sync_queue_pending 0"));
    assert!(text.contains("sync_dead_letters 0"));
    assert!(!text.contains(SYNC_OPERATIONS_TOTAL));
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

fn app() -> Router {
    Router::new()
        .route("/api/entities/{entity_type}", get(|| async { "ok" }))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
}

#[tokio::test]
async fn request_id_is_generated_or_propagated() {
    let res = app()
        .oneshot(Request::get("/api/entities/product").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let generated = res.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
    assert_eq!(generated.len(), 32);

    let res = app()
        .oneshot(
            Request::get("/api/entities/product")
                .header(REQUEST_ID_HEADER, "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.headers().get(REQUEST_ID_HEADER).unwrap(), "abc-123");
}

#[tokio::test]
async fn request_metrics_count_by_status() {
    let labels = [
        ("method", "GET"),
        ("path", "/api/entities/{entity_type}"),
        ("status", "200"),
    ];
    let raw = [("method", "GET"), ("path", "/api/entities/order"), ("status", "200")];
    let before = global_metrics().get_counter(API_REQUESTS_TOTAL, &labels)
        + global_metrics().get_counter(API_REQUESTS_TOTAL, &raw);

    let res = app()
        .oneshot(Request::get("/api/entities/order").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let after = global_metrics().get_counter(API_REQUESTS_TOTAL, &labels)
        + global_metrics().get_counter(API_REQUESTS_TOTAL, &raw);
    assert_eq!(after, before + 1);
}
