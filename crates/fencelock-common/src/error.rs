//! Error types for fencelock
//!
//! This module defines:
//! - `BackendError`: a single storage node or coordination service call failed
//! - `LockError`: lock-level faults (misconfiguration, misuse, lost session)
//!
//! Failing to acquire a contended lock is not an error. Strategies report it
//! through their `Acquisition::NotAcquired` outcome instead.

use std::time::Duration;

/// Failure of one backend call
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend '{0}' unavailable: {1}")]
    Unavailable(String, String),

    #[error("backend '{0}' timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("backend '{0}' protocol error: {1}")]
    Protocol(String, String),

    #[error("session {0} expired")]
    SessionExpired(u64),
}

impl BackendError {
    /// Name of the backend the failure came from, if it names one
    pub fn backend(&self) -> Option<&str> {
        match self {
            BackendError::Unavailable(name, _)
            | BackendError::Timeout(name, _)
            | BackendError::Protocol(name, _) => Some(name),
            BackendError::SessionExpired(_) => None,
        }
    }
}

/// Lock-level error types
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("coordination session {0} lost")]
    SessionLost(u64),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result alias used by the lock core
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Unavailable("node-1".to_string(), "connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "backend 'node-1' unavailable: connection refused"
        );

        let err = BackendError::Timeout("node-2".to_string(), Duration::from_millis(500));
        assert_eq!(err.to_string(), "backend 'node-2' timed out after 500ms");
    }

    #[test]
    fn test_backend_error_name() {
        let err = BackendError::Protocol("node-3".to_string(), "bad reply".to_string());
        assert_eq!(err.backend(), Some("node-3"));
        assert_eq!(BackendError::SessionExpired(7).backend(), None);
    }

    #[test]
    fn test_lock_error_from_backend() {
        let err: LockError = BackendError::SessionExpired(3).into();
        assert!(matches!(err, LockError::Backend(_)));
        assert_eq!(err.to_string(), "session 3 expired");
    }

    #[test]
    fn test_config_error_display() {
        let err = LockError::ConfigError("at least one backend is required".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: at least one backend is required"
        );
    }
}
