//! Domain errors for the infrasync engine.

use thiserror::Error;

/// Domain-level errors that can occur while managing and running tasks.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: task '{name}' {reason}")]
    Conflict { name: String, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Task '{name}' timed out rendering after {elapsed_secs}s")]
    RenderTimeout { name: String, elapsed_secs: u64 },

    #[error("Unexpected condition for task '{name}': {reason}")]
    UnexpectedCondition { name: String, reason: String },

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Operation canceled")]
    Canceled,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Whether the error is worth retrying. Only transient driver errors
    /// qualify; everything else surfaces to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn conflict(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<cron::error::Error> for DomainError {
    fn from(err: cron::error::Error) -> Self {
        DomainError::InvalidConfig(format!("invalid cron expression: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DomainError::Transient("connection reset".into()).is_transient());
        assert!(!DomainError::Fatal("init failed".into()).is_transient());
        assert!(!DomainError::NotFound("t1".into()).is_transient());
        assert!(!DomainError::Canceled.is_transient());
    }
}
