//! Error types for the helper-backed storage backend

use crate::backend::BackendState;
use http::StatusCode;
use pipelink_transport::TransportError;
use std::process::ExitStatus;
use thiserror::Error;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the backend.
#[derive(Debug, Error)]
pub enum Error {
    /// Launching, dialing or talking to the helper failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid or unparseable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The command override could not be split into arguments.
    #[error("invalid command line: {0}")]
    ShellArgs(String),

    /// A file handle that cannot be addressed.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// The requested file does not exist.
    #[error("{0} does not exist")]
    NotFound(String),

    /// The helper answered with a status the operation does not accept.
    #[error("unexpected HTTP response ({status}) for {target}")]
    UnexpectedStatus {
        /// Status returned by the helper
        status: StatusCode,
        /// What the request was about
        target: String,
    },

    /// The helper exited unsuccessfully during close.
    #[error("helper exited with {0}")]
    ChildExit(ExitStatus),

    /// The operation is not allowed in the backend's current state.
    #[error("cannot {operation} a backend that is {state}")]
    InvalidState {
        /// State the backend was in
        state: BackendState,
        /// What was attempted
        operation: &'static str,
    },

    /// `close` was called on an already closed backend.
    #[error("backend already closed")]
    AlreadyClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error means the file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Status of a rejected handshake, if that is what this error is.
    pub fn handshake_status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport(err) => err.handshake_status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_status_passes_through() {
        let err: Error = TransportError::HandshakeStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
        .into();

        assert_eq!(err.handshake_status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert!(err.to_string().contains("503"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_unexpected_status_message() {
        let err = Error::UnexpectedStatus {
            status: StatusCode::FORBIDDEN,
            target: "data/abcd".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected HTTP response (403 Forbidden) for data/abcd"
        );
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::InvalidState {
            state: BackendState::Closed,
            operation: "start",
        };
        assert_eq!(err.to_string(), "cannot start a backend that is closed");
    }
}
