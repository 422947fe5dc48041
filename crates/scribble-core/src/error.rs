//! Error taxonomy shared by the repository, engines and orchestrator.

use std::fmt;
use thiserror::Error;

/// Broad error category, used to pick HTTP status codes and reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    InvalidInput,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    /// Stable lower-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Room, member or game absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller lacks the right to perform the action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Action conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed payload or out-of-range value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing or invalid identity.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoreError::Unauthorized(_) => ErrorKind::Unauthorized,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        CoreError::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        CoreError::InvalidInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(CoreError::not_found("room").kind(), ErrorKind::NotFound);
        assert_eq!(CoreError::forbidden("x").kind(), ErrorKind::Forbidden);
        assert_eq!(CoreError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(CoreError::invalid("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(
            CoreError::Unauthorized("x".into()).kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(CoreError::internal("x").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::conflict("room is full");
        assert_eq!(err.to_string(), "Conflict: room is full");
        assert_eq!(err.kind().to_string(), "conflict");
    }
}
