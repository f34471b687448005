//! Error types for shell-bridge.

use thiserror::Error;

use crate::session::ConnectionState;

/// Main error type for shell-bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Connection with the given ID was not found.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Invalid connection state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Backend could not be attached or created.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,

    /// Malformed or unexpected protocol message.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Client transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure to attach to or create a backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Remote credentials were missing or ambiguous.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The remote host rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The remote connection did not come up in time.
    #[error("connection timed out after {0} seconds")]
    Timeout(u64),

    /// The remote host could not be reached.
    #[error("connection failed: {0}")]
    Network(String),

    /// PTY allocation or spawn failed.
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error talking to the backend.
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Wire code sent to clients in `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            Self::Authentication(_) => "AUTH_FAILED",
            Self::Timeout(_) => "CONNECT_TIMEOUT",
            Self::Network(_) => "CONNECT_FAILED",
            Self::Pty(_) | Self::Io(_) => "BACKEND_ERROR",
        }
    }

    /// Whether retrying the same request can never succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::InvalidCredentials(_) | Self::Authentication(_))
    }
}

/// Convenience Result type for shell-bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_not_found_display() {
        let err = BridgeError::ConnectionNotFound("conn-00000001".into());
        assert!(err.to_string().contains("conn-00000001"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BridgeError = io_err.into();
        assert!(matches!(err, BridgeError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_backend_error_codes() {
        assert_eq!(
            BackendError::InvalidCredentials("both".into()).code(),
            "INVALID_CREDENTIALS"
        );
        assert_eq!(BackendError::Authentication("x".into()).code(), "AUTH_FAILED");
        assert_eq!(BackendError::Timeout(30).code(), "CONNECT_TIMEOUT");
        assert_eq!(BackendError::Network("x".into()).code(), "CONNECT_FAILED");
    }

    #[test]
    fn test_timeout_is_distinct_from_auth() {
        let timeout = BackendError::Timeout(30);
        assert!(timeout.to_string().contains("timed out"));
        assert!(timeout.is_retriable());
        assert!(!BackendError::Authentication("denied".into()).is_retriable());
    }

    #[test]
    fn test_backend_error_is_transparent() {
        let err: BridgeError = BackendError::Network("unreachable".into()).into();
        assert_eq!(err.to_string(), "connection failed: unreachable");
    }
}
