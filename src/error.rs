//! Error types for Code Dock

use thiserror::Error;

/// Result type alias using Code Dock's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Code Dock
///
/// Guest programs that crash, exit non-zero or trip a kernel-enforced
/// resource ceiling are *not* errors: they produce a normal
/// [`ExecutionResult`](crate::core::ExecutionResult). Only the categories
/// below are surfaced to the caller as service-level failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Static scan rejected the submission, no process was launched
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Submission failed schema-level checks (empty program, size ceilings)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A deadline elapsed and the process group was terminated
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Workspace could not be created or materialized
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::PolicyViolation(_) | Error::InvalidInput(_))
    }

    /// Check if error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Stable category name reported to callers alongside the message
    pub fn category(&self) -> &'static str {
        match self {
            Error::PolicyViolation(_) => "policy_violation",
            Error::InvalidInput(_) => "invalid_input",
            Error::Timeout(_) => "timeout",
            Error::Workspace(_) => "workspace_failure",
            Error::Config(_) => "configuration",
            Error::Json(_) | Error::Io(_) | Error::Internal(_) => "internal",
        }
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Self {
        Error::Internal(format!("system call failed: {}", err))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_distinct_for_caller_facing_errors() {
        let errors = [
            Error::PolicyViolation("x".into()),
            Error::InvalidInput("x".into()),
            Error::Timeout("x".into()),
            Error::Workspace("x".into()),
            Error::Internal("x".into()),
        ];
        let mut categories: Vec<_> = errors.iter().map(|e| e.category()).collect();
        categories.dedup();
        assert_eq!(categories.len(), errors.len());
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::PolicyViolation("import os".into()).is_client_error());
        assert!(Error::InvalidInput("empty".into()).is_client_error());
        assert!(!Error::Timeout("late".into()).is_client_error());
        assert!(Error::Timeout("late".into()).is_timeout());
    }

    #[test]
    fn test_io_errors_are_internal() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.category(), "internal");
    }
}
