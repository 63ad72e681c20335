//! Common test utilities for integration tests

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use vigil_core::Environment;
use vigil_observability::telemetry::{MemorySink, TelemetryClient, TelemetryConfig};
use vigil_observability::{CrashSupervisor, HealthState, LoggerConfig, StructuredLogger};
use vigil_server::app::{build_app, AppState};

/// Build the full application router backed by an in-memory sink.
#[allow(dead_code)]
pub fn test_app(environment: Environment) -> (Router, Arc<MemorySink>) {
    let sink = MemorySink::new();
    let config = TelemetryConfig {
        environment,
        app_version: "0.0.0-test".to_string(),
        ..TelemetryConfig::default()
    };
    let client = Arc::new(TelemetryClient::new(&config, Some(sink.clone())));
    let supervisor = CrashSupervisor::new(client.clone(), None);
    let logger = StructuredLogger::new(&LoggerConfig {
        environment,
        ..LoggerConfig::default()
    });

    let state = AppState {
        client: client.clone(),
        supervisor,
        logger,
        environment,
    };
    let health = HealthState::new(client, environment, "0.0.0-test".to_string());
    let app = build_app(state, health, Duration::from_secs(5));
    (app, sink)
}

#[allow(dead_code)]
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[allow(dead_code)]
pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

#[allow(dead_code)]
pub async fn read_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| panic!("non-JSON body: {}", String::from_utf8_lossy(&bytes)));
    (status, value)
}
