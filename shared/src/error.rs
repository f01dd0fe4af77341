//! Domain error taxonomy shared by the workflow rules and the backend

use thiserror::Error;

/// Failure of a workflow rule.
///
/// Every rule in this crate returns one of these; the backend maps them onto
/// HTTP responses without reinterpreting them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or missing input. Recoverable by correcting the input.
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    /// The resource is already in an incompatible state (e.g. a line already packed).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The requested transition is not legal from the current state.
    #[error("Invalid state transition: {0}")]
    State(String),

    /// The actor lacks the role or warehouse assignment the action needs.
    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DomainError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
