//! Application assembly

use crate::middleware::{request_context_middleware, security_headers_middleware};
use crate::{actions, routes};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use vigil_core::Environment;
use vigil_observability::{CrashSupervisor, HealthState, StructuredLogger, TelemetryClient};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<TelemetryClient>,
    pub supervisor: Arc<CrashSupervisor>,
    pub logger: StructuredLogger,
    pub environment: Environment,
}

/// Build the application router: API routes, health probes, request
/// middleware, and the request timeout.
pub fn build_app(state: AppState, health: HealthState, request_timeout: Duration) -> Router {
    let api = Router::new()
        .route("/api/client-telemetry", post(routes::client_telemetry))
        .route(
            "/api/test-error",
            get(routes::test_error_get).post(routes::test_error_post),
        )
        .route("/api/performance-test", get(routes::performance_test))
        .route("/api/actions/{name}", post(actions::run_action))
        .with_state(state);

    api.merge(vigil_observability::health_router(health))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TimeoutLayer::new(request_timeout))
}
