//! Health endpoints
//!
//! Two probes: `/api/health` is the cheap liveness answer, and
//! `/api/health/detailed` adds process and host snapshots plus
//! per-check verdicts. A probe reports unhealthy (503) when resident
//! memory crosses the configured threshold. Every probe is also
//! reported to telemetry as an availability result.

use crate::process::{ProcessHealth, SystemInfo};
use crate::spans::{add_span_attributes, with_route_span};
use crate::telemetry::{Properties, TelemetryClient};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use opentelemetry::KeyValue;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use vigil_core::Environment;

/// Resident memory above this many megabytes flips the probe to
/// unhealthy.
pub const DEFAULT_MEMORY_THRESHOLD_MB: u64 = 1024;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub client: Arc<TelemetryClient>,
    pub environment: Environment,
    pub version: String,
    pub memory_threshold_mb: u64,
    pub started_at: Instant,
}

impl HealthState {
    pub fn new(client: Arc<TelemetryClient>, environment: Environment, version: String) -> Self {
        Self {
            client,
            environment,
            version,
            memory_threshold_mb: DEFAULT_MEMORY_THRESHOLD_MB,
            started_at: Instant::now(),
        }
    }

    pub fn with_memory_threshold(mut self, threshold_mb: u64) -> Self {
        self.memory_threshold_mb = threshold_mb;
        self
    }
}

/// Build the health router, serving `/api/health` and
/// `/api/health/detailed`.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/health/detailed", get(health_detailed))
        .with_state(state)
}

fn health_response(status: StatusCode, body: Value) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

async fn health(State(state): State<HealthState>) -> Response {
    let result: Result<Response, Infallible> =
        with_route_span("GET", "/api/health", || async {
            let probe_start = Instant::now();
            let process = ProcessHealth::snapshot();
            let healthy = process.memory.rss_mb < state.memory_threshold_mb;
            let status_label = if healthy { "healthy" } else { "unhealthy" };

            add_span_attributes(vec![
                KeyValue::new("health.status", status_label),
                KeyValue::new("health.uptime", process.uptime_secs as i64),
            ]);

            let body = json!({
                "status": status_label,
                "timestamp": Utc::now().to_rfc3339(),
                "uptime": process.uptime_secs,
                "memory": {
                    "rssMb": process.memory.rss_mb,
                    "peakRssMb": process.memory.peak_rss_mb,
                    "virtualMb": process.memory.virtual_mb,
                },
                "pid": process.pid,
                "version": state.version,
            });

            let duration_ms = probe_start.elapsed().as_millis() as u64;
            state.client.track_availability(
                "HealthCheck",
                duration_ms,
                healthy,
                None,
                Properties::new(),
            );
            let mut properties = Properties::new();
            properties.insert("status".to_string(), status_label.to_string());
            state
                .client
                .track_event("HealthCheckCompleted", properties, None);

            let status = if healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok(health_response(status, body))
        })
        .await;
    match result {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

async fn health_detailed(State(state): State<HealthState>) -> Response {
    let result: Result<Response, Infallible> =
        with_route_span("GET", "/api/health/detailed", || async {
            let probe_start = Instant::now();
            let process = ProcessHealth::snapshot();
            let system = SystemInfo::snapshot();
            let memory_ok = process.memory.rss_mb < state.memory_threshold_mb;
            let healthy = memory_ok;
            let status_label = if healthy { "healthy" } else { "unhealthy" };

            add_span_attributes(vec![
                KeyValue::new("health.status", status_label),
                KeyValue::new("health.uptime", process.uptime_secs as i64),
            ]);

            let body = json!({
                "status": status_label,
                "timestamp": Utc::now().to_rfc3339(),
                "uptime": process.uptime_secs,
                "version": state.version,
                "environment": state.environment.as_str(),
                "checks": {
                    "memory": if memory_ok { "pass" } else { "warn" },
                    "process": "pass",
                    "telemetry": if state.client.is_enabled() { "pass" } else { "warn" },
                },
                "memory": process.memory,
                "cpu": process.cpu,
                "process": process,
                "system": system,
                "responseTime": probe_start.elapsed().as_millis() as u64,
            });

            let mut properties = Properties::new();
            properties.insert("status".to_string(), status_label.to_string());
            state
                .client
                .track_event("DetailedHealthCheck", properties, None);
            state.client.track_availability(
                "HealthCheck",
                probe_start.elapsed().as_millis() as u64,
                healthy,
                None,
                Properties::new(),
            );

            let status = if healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok(health_response(status, body))
        })
        .await;
    match result {
        Ok(response) => response,
        Err(never) => match never {},
    }
}
