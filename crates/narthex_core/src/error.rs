//! Core error types for NARTHEX.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Entity lookup miss
    NotFound {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Entity registered twice
    AlreadyExists {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Validation failure
    Validation {
        /// What was being validated
        field: String,
        /// Why it failed
        reason: String,
    },

    /// Internal error (for unexpected errors)
    Internal {
        /// Error message
        message: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::AlreadyExists { kind, id } => write!(f, "{} already exists: {}", kind, id),
            Self::Validation { field, reason } => {
                write!(f, "Validation failed for {}: {}", field, reason)
            }
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl CoreError {
    /// Lookup-miss constructor
    #[must_use]
    pub fn not_found(kind: &str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Duplicate-registration constructor
    #[must_use]
    pub fn already_exists(kind: &str, id: impl fmt::Display) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::not_found("Task", "tsk_123");
        assert_eq!(format!("{}", err), "Task not found: tsk_123");

        let err = CoreError::Validation {
            field: "table".to_string(),
            reason: "bad index".to_string(),
        };
        assert_eq!(format!("{}", err), "Validation failed for table: bad index");
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(
            CoreError::not_found("Task", "a"),
            CoreError::not_found("Task", "a")
        );
        assert_ne!(
            CoreError::not_found("Task", "a"),
            CoreError::not_found("Field", "a")
        );
    }
}
