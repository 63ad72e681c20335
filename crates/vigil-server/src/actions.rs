//! Background-action entry points
//!
//! Actions follow the server-action contract: the HTTP answer is
//! always 200 and the body carries either the action's result or an
//! `ActionFailure`. Classification happens in `handle_action_error`,
//! so the sanitization posture matches the request path.

use crate::app::AppState;
use crate::middleware::RequestContext;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use vigil_core::AppError;
use vigil_observability::report::handle_action_error;
use vigil_observability::spans::with_action_span;
use vigil_observability::spawn_supervised;
use vigil_observability::telemetry::Properties;

/// `POST /api/actions/{name}`: run a named demo action.
pub async fn run_action(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(name): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let input = match payload {
        Ok(Json(input)) => input,
        // Actions accept an empty body.
        Err(_) => Value::Null,
    };

    let result = with_action_span(&name, || async {
        dispatch(&state, &name, &input).await.map_err(|error| {
            ActionError(handle_action_error(
                &state.client,
                &error,
                &name,
                state.environment,
            ))
        })
    })
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(ActionError(failure)) => Json(failure).into_response(),
    }
}

/// Carries the classified failure out of the action span while giving
/// the span a printable error.
struct ActionError(vigil_core::ActionFailure);

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.error)
    }
}

async fn dispatch(state: &AppState, name: &str, input: &Value) -> Result<Value, anyhow::Error> {
    match name {
        "simulate-work" => simulate_work(state, input).await,
        "fail-validation" => Err(AppError::validation(
            "Simulated validation failure",
            Some(json!({ "action": "fail-validation" })),
        )
        .into()),
        "fail-unexpected" => Err(anyhow::anyhow!("Simulated unexpected action failure")),
        "background-failure" => background_failure(state).await,
        unknown => Err(AppError::validation(format!("Unknown action: {}", unknown), None).into()),
    }
}

/// Busy-waits through a configurable number of steps, reporting
/// progress as an event.
async fn simulate_work(state: &AppState, input: &Value) -> Result<Value, anyhow::Error> {
    let steps = input.get("steps").and_then(Value::as_u64).unwrap_or(3);
    if steps == 0 || steps > 100 {
        return Err(AppError::validation(
            "steps must be between 1 and 100",
            Some(json!({ "steps": steps })),
        )
        .into());
    }

    for _ in 0..steps {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut properties = Properties::new();
    properties.insert("steps".to_string(), steps.to_string());
    state
        .client
        .track_event("WorkSimulated", properties, None);

    Ok(json!({
        "success": true,
        "steps": steps,
        "completedAt": Utc::now().to_rfc3339(),
    }))
}

/// Spawns a supervised task that fails after a short delay. The action
/// itself succeeds; the failure is reported through the supervisor
/// without terminating the process.
async fn background_failure(state: &AppState) -> Result<Value, anyhow::Error> {
    spawn_supervised(state.supervisor.clone(), "demo-background-task", async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err::<(), _>(anyhow::anyhow!("Simulated background task failure"))
    });

    Ok(json!({
        "success": true,
        "message": "Background task spawned; its failure will be reported, not fatal",
    }))
}
