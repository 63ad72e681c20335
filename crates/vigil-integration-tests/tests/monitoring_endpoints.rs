//! Health probes, client telemetry relay, and performance routes

mod common;

use axum::body::Body;
use axum::http::Request;
use common::{get, post_json, read_json, test_app};
use serde_json::json;
use tower::ServiceExt;
use vigil_core::Environment;
use vigil_observability::telemetry::TelemetryData;

#[tokio::test]
async fn test_health_through_full_stack() {
    let (app, sink) = test_app(Environment::Development);
    let response = get(app, "/api/health").await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["cache-control"], "no-store");
    // Middleware applies to the health router too
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let (_, body) = read_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["memory"]["rssMb"].is_u64());

    assert!(sink.envelopes().iter().any(|e| matches!(
        &e.data,
        TelemetryData::Availability { name, .. } if name == "HealthCheck"
    )));
}

#[tokio::test]
async fn test_detailed_health_checks() {
    let (app, _sink) = test_app(Environment::Staging);
    let (status, body) = read_json(get(app, "/api/health/detailed").await).await;

    assert_eq!(status, 200);
    assert_eq!(body["environment"], "staging");
    assert_eq!(body["checks"]["process"], "pass");
    assert_eq!(body["checks"]["telemetry"], "pass");
    assert!(body["system"]["cpus"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_client_telemetry_web_vital() {
    let (app, sink) = test_app(Environment::Production);
    let payload = json!({
        "type": "web-vital",
        "metric": {
            "id": "v1-123",
            "name": "LCP",
            "value": 2400.5,
            "rating": "needs-improvement",
            "delta": 120.0,
            "navigationType": "navigate"
        },
        "url": "https://app.example.com/dashboard"
    });
    let (status, body) = read_json(post_json(app, "/api/client-telemetry", payload).await).await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let envelopes = sink.envelopes();
    assert!(envelopes.iter().any(|e| matches!(
        &e.data,
        TelemetryData::Metric { name, value, .. } if name == "LCP" && *value == 2400.5
    )));
    assert!(envelopes.iter().any(|e| matches!(
        &e.data,
        TelemetryData::Event { name, properties, .. }
            if name == "WebVital" && properties["rating"] == "needs-improvement"
    )));
}

#[tokio::test]
async fn test_client_telemetry_error_report() {
    let (app, sink) = test_app(Environment::Production);
    let payload = json!({
        "error": {
            "message": "Cannot read properties of undefined",
            "name": "TypeError",
            "stack": "TypeError: Cannot read properties of undefined\n    at render"
        },
        "context": {"component": "Dashboard", "password": "should-not-matter"},
        "url": "https://app.example.com/dashboard",
        "userAgent": "test-browser/1.0"
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/client-telemetry")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let (status, body) = read_json(response).await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let envelopes = sink.envelopes();
    assert!(envelopes.iter().any(|e| matches!(
        &e.data,
        TelemetryData::Exception { message, properties, .. }
            if message == "Cannot read properties of undefined"
                && properties["source"] == "client"
                && properties["clientIp"] == "203.0.113.9"
                && properties["userAgent"] == "test-browser/1.0"
    )));
    assert!(envelopes.iter().any(|e| matches!(
        &e.data,
        TelemetryData::Event { name, .. } if name == "ClientError"
    )));
}

#[tokio::test]
async fn test_client_telemetry_malformed_body() {
    let (app, sink) = test_app(Environment::Production);
    let request = Request::builder()
        .method("POST")
        .uri("/api/client-telemetry")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let (status, body) = read_json(response).await;

    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
    assert!(sink.envelopes().is_empty());
}

#[tokio::test]
async fn test_performance_test_all_sections() {
    let (app, sink) = test_app(Environment::Development);
    let (status, body) = read_json(get(app, "/api/performance-test").await).await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["testType"], "all");
    for section in ["cpu", "memory", "async", "dependency"] {
        assert!(
            body["results"][section]["durationMs"].is_u64(),
            "missing section {}",
            section
        );
    }

    let envelopes = sink.envelopes();
    assert!(envelopes.iter().any(|e| matches!(
        &e.data,
        TelemetryData::Dependency { name, success: true, .. } if name == "ExternalAPI"
    )));
    assert!(envelopes.iter().any(|e| matches!(
        &e.data,
        TelemetryData::Event { name, .. } if name == "PerformanceTestCompleted"
    )));
}

#[tokio::test]
async fn test_performance_test_single_section() {
    let (app, _sink) = test_app(Environment::Development);
    let (status, body) = read_json(get(app, "/api/performance-test?type=cpu").await).await;

    assert_eq!(status, 200);
    assert!(body["results"]["cpu"]["durationMs"].is_u64());
    assert!(body["results"].get("memory").is_none());
}

#[tokio::test]
async fn test_performance_test_unknown_type() {
    let (app, _sink) = test_app(Environment::Development);
    let (status, body) = read_json(get(app, "/api/performance-test?type=gpu").await).await;

    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}
