use thiserror::Error;

use crate::domain::instance::InstanceStatus;

/// Typed failure modes of the approval engine. Every variant is surfaced to
/// the caller as a distinct, catchable condition; only notification and
/// audit dispatch failures are logged instead of raised.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid state: {reason} (current status {status:?})")]
    InvalidState { status: InstanceStatus, reason: String },
    #[error("not authorized: {0}")]
    Authorization(String),
    #[error("validation failed: {message}")]
    Validation { message: String, missing_fields: Vec<String> },
    #[error("invalid or expired token")]
    Token,
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn invalid_state(status: InstanceStatus, reason: impl Into<String>) -> Self {
        Self::InvalidState { status, reason: reason.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), missing_fields: Vec::new() }
    }

    pub fn missing_fields(labels: Vec<String>) -> Self {
        Self::Validation {
            message: format!("missing mandatory fields: {}", labels.join(", ")),
            missing_fields: labels,
        }
    }

    pub fn persistence(source: impl ToString) -> Self {
        Self::Persistence(source.to_string())
    }
}
