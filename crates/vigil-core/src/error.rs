//! Operational error taxonomy and error response shapes
//!
//! Every `AppError` variant is "operational": an anticipated failure
//! that is safe to describe to the caller verbatim. Anything else caught
//! at a request or action boundary is treated as unexpected and is
//! sanitized before leaving the process in production.

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable machine-readable code for unexpected errors.
pub const INTERNAL_ERROR_CODE: &str = "INTERNAL_ERROR";

/// The fixed message shown for unexpected errors in production.
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Operational errors raised deliberately at the point of detection.
///
/// The kind/status/code triple is closed: dispatch never needs to look
/// past it, so this is a tagged enum rather than a trait hierarchy.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        message: String,
        context: Option<Value>,
    },

    #[error("{resource}{} not found", identifier.as_ref().map(|id| format!(" with identifier {}", id)).unwrap_or_default())]
    NotFound {
        resource: String,
        identifier: Option<String>,
    },

    #[error("{message}")]
    Authentication { message: String },

    #[error("{message}")]
    Authorization { message: String },

    /// Generic operational error carrying its own status and code.
    #[error("{message}")]
    Operational {
        message: String,
        status_code: u16,
        code: String,
        context: Option<Value>,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>, context: Option<Value>) -> Self {
        AppError::Validation {
            message: message.into(),
            context,
        }
    }

    pub fn not_found(resource: impl Into<String>, identifier: Option<String>) -> Self {
        AppError::NotFound {
            resource: resource.into(),
            identifier,
        }
    }

    pub fn authentication() -> Self {
        AppError::Authentication {
            message: "Authentication required".to_string(),
        }
    }

    pub fn authentication_with(message: impl Into<String>) -> Self {
        AppError::Authentication {
            message: message.into(),
        }
    }

    pub fn authorization() -> Self {
        AppError::Authorization {
            message: "Insufficient permissions".to_string(),
        }
    }

    pub fn operational(
        message: impl Into<String>,
        status_code: u16,
        code: impl Into<String>,
        context: Option<Value>,
    ) -> Self {
        AppError::Operational {
            message: message.into(),
            status_code,
            code: code.into(),
            context,
        }
    }

    /// HTTP status for this error, always in the valid range.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            AppError::Authorization { .. } => StatusCode::FORBIDDEN,
            AppError::Operational { status_code, .. } => {
                StatusCode::from_u16(*status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Stable machine-readable code string.
    pub fn code(&self) -> &str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::Authentication { .. } => "AUTHENTICATION_ERROR",
            AppError::Authorization { .. } => "AUTHORIZATION_ERROR",
            AppError::Operational { code, .. } => code,
        }
    }

    /// Context details attached at the point of detection.
    pub fn context(&self) -> Option<Value> {
        match self {
            AppError::Validation { context, .. } => context.clone(),
            AppError::NotFound {
                resource,
                identifier,
            } => Some(serde_json::json!({
                "resource": resource,
                "identifier": identifier,
            })),
            AppError::Operational { context, .. } => context.clone(),
            _ => None,
        }
    }

    /// All AppError variants are expected, handled failures.
    pub fn is_operational(&self) -> bool {
        true
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Wire shape returned to HTTP callers on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResponse {
    pub fn new(
        message: impl Into<String>,
        code: impl Into<String>,
        status_code: StatusCode,
        request_id: Option<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                code: code.into(),
                status_code: status_code.as_u16(),
                timestamp: Utc::now(),
                request_id,
                details,
            },
        }
    }
}

/// Result shape for background actions, which have no HTTP status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionFailure {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ActionFailure {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
        }
    }
}
