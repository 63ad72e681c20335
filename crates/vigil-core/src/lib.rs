//! Vigil Core
//!
//! Shared types for the Vigil monitoring demo service:
//! - Operational error taxonomy and wire-level error responses
//! - Environment posture (development/production behavior switch)

pub mod environment;
pub mod error;

pub use environment::Environment;
pub use error::{
    ActionFailure, AppError, ErrorBody, ErrorResponse, GENERIC_ERROR_MESSAGE, INTERNAL_ERROR_CODE,
};
