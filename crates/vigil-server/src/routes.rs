//! API routes
//!
//! Every handler runs inside a route span. Failures funnel through
//! `handle_request_error`, so operational errors answer with their own
//! status and code while anything unexpected is sanitized according to
//! the environment posture.

use crate::app::AppState;
use crate::middleware::{client_ip, user_agent, RequestContext};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use opentelemetry::trace::SpanKind;
use opentelemetry::KeyValue;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};
use vigil_core::AppError;
use vigil_observability::logger::{redact_fields, LogLevel};
use vigil_observability::report::handle_request_error;
use vigil_observability::spans::{add_span_event, with_route_span, with_span};
use vigil_observability::telemetry::Properties;

/// Error carrier that keeps the already-built HTTP response alongside
/// the message the span records.
pub(crate) struct RouteFailure {
    message: String,
    response: Response,
}

impl std::fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Run a handler body inside a route span, mapping errors through the
/// boundary classifier.
pub(crate) async fn traced<F, Fut>(
    state: &AppState,
    request_id: &str,
    method: &str,
    route: &str,
    body: F,
) -> Response
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, anyhow::Error>>,
{
    let result = with_route_span(method, route, || async {
        match body().await {
            Ok(response) => Ok(response),
            Err(error) => {
                let message = error.to_string();
                let (status, error_response) =
                    handle_request_error(&state.client, &error, request_id, state.environment);
                Err(RouteFailure {
                    message,
                    response: (status, Json(error_response)).into_response(),
                })
            }
        }
    })
    .await;
    match result {
        Ok(response) => response,
        Err(failure) => failure.response,
    }
}

#[derive(Debug, Deserialize)]
pub struct ClientErrorReport {
    pub message: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebVitalMetric {
    pub id: String,
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub navigation_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTelemetryPayload {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub error: Option<ClientErrorReport>,
    #[serde(default)]
    pub metric: Option<WebVitalMetric>,
    #[serde(default)]
    pub context: Option<Value>,
    pub url: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `POST /api/client-telemetry`: relay browser-side errors and web
/// vitals into the backend telemetry stream.
pub async fn client_telemetry(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    payload: Result<Json<ClientTelemetryPayload>, JsonRejection>,
) -> Response {
    traced(
        &state,
        &ctx.request_id,
        "POST",
        "/api/client-telemetry",
        || async {
            let Json(payload) = match payload {
                Ok(payload) => payload,
                Err(rejection) => {
                    return Ok((
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "success": false, "error": rejection.body_text() })),
                    )
                        .into_response());
                }
            };

            let reported_by = payload
                .user_agent
                .clone()
                .or_else(|| user_agent(&headers));
            let ip = client_ip(&headers);

            if payload.kind.as_deref() == Some("web-vital") {
                if let Some(metric) = &payload.metric {
                    let mut properties = Properties::new();
                    properties.insert("metricId".to_string(), metric.id.clone());
                    properties.insert("url".to_string(), payload.url.clone());
                    if let Some(rating) = &metric.rating {
                        properties.insert("rating".to_string(), rating.clone());
                    }
                    if let Some(navigation_type) = &metric.navigation_type {
                        properties
                            .insert("navigationType".to_string(), navigation_type.clone());
                    }
                    state
                        .client
                        .track_metric(&metric.name, metric.value, properties.clone());

                    let mut measurements = BTreeMap::new();
                    measurements.insert("value".to_string(), metric.value);
                    if let Some(delta) = metric.delta {
                        measurements.insert("delta".to_string(), delta);
                    }
                    state
                        .client
                        .track_event("WebVital", properties, Some(measurements));
                }
            }

            if let Some(error) = &payload.error {
                let mut properties = Properties::new();
                properties.insert("source".to_string(), "client".to_string());
                properties.insert("url".to_string(), payload.url.clone());
                if let Some(name) = &error.name {
                    properties.insert("errorName".to_string(), name.clone());
                }
                if let Some(agent) = &reported_by {
                    properties.insert("userAgent".to_string(), agent.clone());
                }
                if let Some(ip) = &ip {
                    properties.insert("clientIp".to_string(), ip.clone());
                }
                if let Some(context) = &payload.context {
                    properties.insert("context".to_string(), context.to_string());
                }
                state
                    .client
                    .track_exception(&error.message, error.stack.as_deref(), properties.clone());
                state.client.track_event("ClientError", properties, None);

                let mut log_fields = json!({
                    "url": payload.url,
                    "userAgent": reported_by,
                    "context": payload.context,
                });
                redact_fields(&mut log_fields);
                state
                    .logger
                    .log(LogLevel::Warn, log_fields, "Client error reported");
            }

            Ok(Json(json!({ "success": true })).into_response())
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct TestErrorQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// `GET /api/test-error`: deliberately raise the selected error class
/// so the full reporting path can be exercised end to end.
pub async fn test_error_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<TestErrorQuery>,
) -> Response {
    let selector = query.kind.unwrap_or_else(|| "standard".to_string());
    let request_id = ctx.request_id.clone();

    traced(&state, &request_id, "GET", "/api/test-error", || async {
        let mut properties = Properties::new();
        properties.insert("errorType".to_string(), selector.clone());
        properties.insert("requestId".to_string(), request_id.clone());
        state
            .client
            .track_event("TestErrorTriggered", properties, None);
        add_span_event(
            "test-error-triggered",
            vec![KeyValue::new("error.selector", selector.clone())],
        );

        match selector.as_str() {
            "none" => Ok(Json(json!({
                "success": true,
                "message": "No error triggered",
                "requestId": request_id,
                "timestamp": Utc::now().to_rfc3339(),
            }))
            .into_response()),
            "standard" => Err(anyhow::anyhow!("This is a test error for monitoring")),
            "app" => Err(AppError::operational(
                "This is an application error",
                500,
                "TEST_APP_ERROR",
                Some(json!({ "testContext": "test value" })),
            )
            .into()),
            "validation" => Err(AppError::validation(
                "Invalid input provided",
                Some(json!({ "field": "type", "value": selector })),
            )
            .into()),
            "notfound" => {
                Err(AppError::not_found("TestResource", Some("test-123".to_string())).into())
            }
            unknown => Err(AppError::validation(
                format!("Unknown error type: {}", unknown),
                None,
            )
            .into()),
        }
    })
    .await
}

/// `POST /api/test-error`: echo back a payload, rejecting bodies
/// without a `data` field.
pub async fn test_error_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let request_id = ctx.request_id.clone();
    traced(&state, &request_id, "POST", "/api/test-error", || async {
        let body = match payload {
            Ok(Json(body)) => body,
            Err(rejection) => {
                return Err(AppError::validation(
                    format!("Invalid JSON body: {}", rejection.body_text()),
                    None,
                )
                .into());
            }
        };
        let Some(data) = body.get("data") else {
            return Err(AppError::validation(
                "Request body must contain a data field",
                None,
            )
            .into());
        };
        Ok(Json(json!({
            "success": true,
            "received": data,
            "requestId": request_id,
        }))
        .into_response())
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct PerformanceTestQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// `GET /api/performance-test`: nested-span showcase running synthetic
/// workloads and emitting a metric per section.
pub async fn performance_test(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<PerformanceTestQuery>,
) -> Response {
    let selector = query.kind.unwrap_or_else(|| "all".to_string());
    let request_id = ctx.request_id.clone();

    traced(
        &state,
        &request_id,
        "GET",
        "/api/performance-test",
        || async {
            let test_start = Instant::now();
            let mut results = serde_json::Map::new();

            if matches!(selector.as_str(), "cpu" | "all") {
                let duration_ms = cpu_test(&state).await?;
                results.insert("cpu".to_string(), json!({ "durationMs": duration_ms }));
            }
            if matches!(selector.as_str(), "memory" | "all") {
                let duration_ms = memory_test(&state).await?;
                results.insert("memory".to_string(), json!({ "durationMs": duration_ms }));
            }
            if matches!(selector.as_str(), "async" | "all") {
                let duration_ms = async_test(&state).await?;
                results.insert("async".to_string(), json!({ "durationMs": duration_ms }));
            }
            if matches!(selector.as_str(), "dependency" | "all") {
                let duration_ms = dependency_test(&state).await?;
                results.insert(
                    "dependency".to_string(),
                    json!({ "durationMs": duration_ms }),
                );
            }
            if results.is_empty() {
                return Err(AppError::validation(
                    format!("Unknown performance test type: {}", selector),
                    None,
                )
                .into());
            }

            let total_ms = test_start.elapsed().as_millis() as u64;
            let mut properties = Properties::new();
            properties.insert("testType".to_string(), selector.clone());
            let mut measurements = BTreeMap::new();
            measurements.insert("totalDurationMs".to_string(), total_ms as f64);
            state
                .client
                .track_event("PerformanceTestCompleted", properties, Some(measurements));

            Ok(Json(json!({
                "success": true,
                "testType": selector,
                "results": Value::Object(results),
                "totalDurationMs": total_ms,
                "requestId": request_id,
            }))
            .into_response())
        },
    )
    .await
}

async fn cpu_test(state: &AppState) -> Result<u64, anyhow::Error> {
    with_span("performance.cpu", SpanKind::Internal, vec![], || async {
        let start = Instant::now();
        let mut accumulator = 0.0_f64;
        for i in 0..1_000_000_u64 {
            accumulator += (i as f64).sqrt();
        }
        add_span_event(
            "cpu-work-done",
            vec![KeyValue::new("accumulator", accumulator)],
        );
        let duration_ms = start.elapsed().as_millis() as u64;
        state
            .client
            .track_metric("CPUOperationDuration", duration_ms as f64, Properties::new());
        state
            .logger
            .log_performance("cpu-test", duration_ms, Value::Null);
        Ok::<_, anyhow::Error>(duration_ms)
    })
    .await
}

async fn memory_test(state: &AppState) -> Result<u64, anyhow::Error> {
    with_span("performance.memory", SpanKind::Internal, vec![], || async {
        let start = Instant::now();
        let buffer: Vec<u64> = (0..1_000_000).collect();
        let checksum: u64 = buffer.iter().sum();
        add_span_event(
            "allocation-done",
            vec![KeyValue::new("checksum", checksum as i64)],
        );
        let duration_ms = start.elapsed().as_millis() as u64;
        state.client.track_metric(
            "MemoryOperationDuration",
            duration_ms as f64,
            Properties::new(),
        );
        state
            .logger
            .log_performance("memory-test", duration_ms, Value::Null);
        Ok::<_, anyhow::Error>(duration_ms)
    })
    .await
}

async fn async_test(state: &AppState) -> Result<u64, anyhow::Error> {
    with_span("performance.async", SpanKind::Internal, vec![], || async {
        let start = Instant::now();
        let waits = [10_u64, 20, 30].map(|millis| {
            with_span(
                format!("performance.async.sleep-{}ms", millis),
                SpanKind::Internal,
                vec![KeyValue::new("sleep.millis", millis as i64)],
                move || async move {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok::<_, anyhow::Error>(())
                },
            )
        });
        for outcome in futures::future::join_all(waits).await {
            outcome?;
        }
        let duration_ms = start.elapsed().as_millis() as u64;
        state.client.track_metric(
            "AsyncOperationDuration",
            duration_ms as f64,
            Properties::new(),
        );
        state
            .logger
            .log_performance("async-test", duration_ms, Value::Null);
        Ok::<_, anyhow::Error>(duration_ms)
    })
    .await
}

async fn dependency_test(state: &AppState) -> Result<u64, anyhow::Error> {
    with_span(
        "performance.dependency",
        SpanKind::Client,
        vec![],
        || async {
            let start = Instant::now();
            // Simulated call to an external service
            tokio::time::sleep(Duration::from_millis(25)).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            state.client.track_dependency(
                "ExternalAPI",
                "GET /api/external",
                duration_ms,
                true,
                "HTTP",
                Some("api.external.com"),
                Properties::new(),
            );
            state
                .logger
                .log_performance("dependency-test", duration_ms, Value::Null);
            Ok::<_, anyhow::Error>(duration_ms)
        },
    )
    .await
}
