//! Boundary error handling
//!
//! The two functions here are the last stop for errors leaving a
//! request handler or a background action. Operational `AppError`s keep
//! their message, code, and status; everything else is classified
//! unexpected: internal code, 500 status, and in production a fixed
//! generic message so internals never leak to callers. Full detail goes
//! to the telemetry client and the active span either way.

use crate::spans::{add_span_attributes, record_span_exception};
use crate::telemetry::{Properties, TelemetryClient};
use http::StatusCode;
use opentelemetry::KeyValue;
use tracing::error;
use vigil_core::{
    ActionFailure, AppError, Environment, ErrorResponse, GENERIC_ERROR_MESSAGE,
    INTERNAL_ERROR_CODE,
};

/// Classify an error at a request boundary and produce the HTTP
/// response to send.
///
/// Operational errors pass through with their own status, code, and
/// message (context becomes the `details` field). Unexpected errors are
/// tracked as exceptions, recorded on the active span, and answered
/// with 500 `INTERNAL_ERROR`; in production the response message is the
/// generic one, elsewhere the real message is kept for debuggability.
pub fn handle_request_error(
    client: &TelemetryClient,
    error: &anyhow::Error,
    request_id: &str,
    environment: Environment,
) -> (StatusCode, ErrorResponse) {
    if let Some(app_error) = error.downcast_ref::<AppError>() {
        let status = app_error.status_code();

        let mut properties = Properties::new();
        properties.insert("requestId".to_string(), request_id.to_string());
        properties.insert("errorCode".to_string(), app_error.code().to_string());
        properties.insert("isOperational".to_string(), "true".to_string());
        client.track_exception(&app_error.to_string(), None, properties);

        add_span_attributes(vec![
            KeyValue::new("error.type", "operational"),
            KeyValue::new("error.code", app_error.code().to_string()),
            KeyValue::new("http.status_code", status.as_u16() as i64),
        ]);

        error!(
            request_id,
            code = app_error.code(),
            status = status.as_u16(),
            error = %app_error,
            "Operational error handled"
        );

        let response = ErrorResponse::new(
            app_error.to_string(),
            app_error.code(),
            status,
            Some(request_id.to_string()),
            app_error.context(),
        );
        return (status, response);
    }

    // Unexpected: full detail to telemetry, sanitized detail to the
    // caller when in production.
    let mut properties = Properties::new();
    properties.insert("requestId".to_string(), request_id.to_string());
    properties.insert("isOperational".to_string(), "false".to_string());
    let chain = format!("{:#}", error);
    client.track_exception(&error.to_string(), Some(&chain), properties);
    record_span_exception(error);

    error!(request_id, error = %error, "Unexpected error at request boundary");

    let message = if environment.is_production() {
        GENERIC_ERROR_MESSAGE.to_string()
    } else {
        error.to_string()
    };
    let response = ErrorResponse::new(
        message,
        INTERNAL_ERROR_CODE,
        StatusCode::INTERNAL_SERVER_ERROR,
        Some(request_id.to_string()),
        None,
    );
    (StatusCode::INTERNAL_SERVER_ERROR, response)
}

/// Classify an error at a background-action boundary.
///
/// Actions return a result value rather than an HTTP status, so the
/// outcome is an [`ActionFailure`]. The sanitization posture is the
/// same as for requests.
pub fn handle_action_error(
    client: &TelemetryClient,
    error: &anyhow::Error,
    action_name: &str,
    environment: Environment,
) -> ActionFailure {
    if let Some(app_error) = error.downcast_ref::<AppError>() {
        let mut properties = Properties::new();
        properties.insert("actionName".to_string(), action_name.to_string());
        properties.insert("errorCode".to_string(), app_error.code().to_string());
        properties.insert("isOperational".to_string(), "true".to_string());
        client.track_exception(&app_error.to_string(), None, properties.clone());
        client.track_event("ServerActionError", properties, None);

        error!(
            action = action_name,
            code = app_error.code(),
            error = %app_error,
            "Operational action error handled"
        );

        return ActionFailure::new(app_error.to_string(), app_error.code());
    }

    let mut properties = Properties::new();
    properties.insert("actionName".to_string(), action_name.to_string());
    properties.insert("isOperational".to_string(), "false".to_string());
    let chain = format!("{:#}", error);
    client.track_exception(&error.to_string(), Some(&chain), properties.clone());
    client.track_event("ServerActionError", properties, None);
    record_span_exception(error);

    error!(action = action_name, error = %error, "Unexpected error in action");

    let message = if environment.is_production() {
        GENERIC_ERROR_MESSAGE.to_string()
    } else {
        error.to_string()
    };
    ActionFailure::new(message, INTERNAL_ERROR_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{MemorySink, TelemetryConfig, TelemetryData};

    fn client() -> (TelemetryClient, std::sync::Arc<MemorySink>) {
        let sink = MemorySink::new();
        let client = TelemetryClient::new(&TelemetryConfig::default(), Some(sink.clone()));
        (client, sink)
    }

    #[test]
    fn test_operational_error_passes_through() {
        let (client, sink) = client();
        let error = anyhow::Error::new(AppError::validation("Invalid input provided", None));

        let (status, response) =
            handle_request_error(&client, &error, "req-1", Environment::Production);

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.error.message, "Invalid input provided");
        assert_eq!(response.error.code, "VALIDATION_ERROR");
        assert_eq!(response.error.status_code, 400);
        assert_eq!(response.error.request_id.as_deref(), Some("req-1"));

        let envelopes = sink.envelopes();
        assert_eq!(envelopes.len(), 1);
        let TelemetryData::Exception { message, properties, .. } = &envelopes[0].data else {
            panic!("expected exception envelope");
        };
        assert_eq!(message, "Invalid input provided");
        assert_eq!(properties["isOperational"], "true");
        assert_eq!(properties["errorCode"], "VALIDATION_ERROR");
    }

    #[test]
    fn test_not_found_keeps_status_and_details() {
        let (client, _sink) = client();
        let error =
            anyhow::Error::new(AppError::not_found("TestResource", Some("id-9".to_string())));

        let (status, response) =
            handle_request_error(&client, &error, "req-2", Environment::Production);

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(response.error.code, "NOT_FOUND");
        assert_eq!(
            response.error.message,
            "TestResource with identifier id-9 not found"
        );
        let details = response.error.details.unwrap();
        assert_eq!(details["resource"], "TestResource");
        assert_eq!(details["identifier"], "id-9");
    }

    #[test]
    fn test_unexpected_error_sanitized_in_production() {
        let (client, sink) = client();
        let error = anyhow::anyhow!("database password is hunter2");

        let (status, response) =
            handle_request_error(&client, &error, "req-3", Environment::Production);

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.error.message, GENERIC_ERROR_MESSAGE);
        assert_eq!(response.error.code, INTERNAL_ERROR_CODE);
        assert!(response.error.details.is_none());

        // Telemetry still carries the full message.
        let envelopes = sink.envelopes();
        let TelemetryData::Exception { message, properties, .. } = &envelopes[0].data else {
            panic!("expected exception envelope");
        };
        assert_eq!(message, "database password is hunter2");
        assert_eq!(properties["isOperational"], "false");
    }

    #[test]
    fn test_unexpected_error_chain_reaches_telemetry() {
        let (client, sink) = client();
        let error = anyhow::anyhow!("connection refused").context("loading dashboard");

        handle_request_error(&client, &error, "req-6", Environment::Production);

        let envelopes = sink.envelopes();
        let TelemetryData::Exception { message, stack, .. } = &envelopes[0].data else {
            panic!("expected exception envelope");
        };
        assert_eq!(message, "loading dashboard");
        let stack = stack.as_deref().unwrap();
        assert!(stack.contains("connection refused"));
    }

    #[test]
    fn test_unexpected_error_verbatim_outside_production() {
        let (client, _sink) = client();
        let error = anyhow::anyhow!("stack trace goes here");

        let (_status, response) =
            handle_request_error(&client, &error, "req-4", Environment::Development);

        assert_eq!(response.error.message, "stack trace goes here");
        assert_eq!(response.error.code, INTERNAL_ERROR_CODE);
    }

    #[test]
    fn test_action_operational_failure() {
        let (client, sink) = client();
        let error = anyhow::Error::new(AppError::validation("Count must be positive", None));

        let failure =
            handle_action_error(&client, &error, "simulate-work", Environment::Production);

        assert!(!failure.success);
        assert_eq!(failure.error, "Count must be positive");
        assert_eq!(failure.code, "VALIDATION_ERROR");

        let envelopes = sink.envelopes();
        assert!(envelopes.iter().any(|e| matches!(
            &e.data,
            TelemetryData::Event { name, properties, .. }
                if name == "ServerActionError" && properties["actionName"] == "simulate-work"
        )));
        assert!(envelopes.iter().any(|e| matches!(
            &e.data,
            TelemetryData::Exception { properties, .. }
                if properties["isOperational"] == "true"
        )));
    }

    #[test]
    fn test_action_unexpected_failure_sanitized() {
        let (client, _sink) = client();
        let error = anyhow::anyhow!("internal invariant violated");

        let failure =
            handle_action_error(&client, &error, "background-job", Environment::Production);
        assert_eq!(failure.error, GENERIC_ERROR_MESSAGE);
        assert_eq!(failure.code, INTERNAL_ERROR_CODE);

        let failure =
            handle_action_error(&client, &error, "background-job", Environment::Development);
        assert_eq!(failure.error, "internal invariant violated");
    }
}
