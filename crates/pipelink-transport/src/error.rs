//! Transport error types

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// The helper process could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that was executed
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// I/O error on the pipes or while waiting for the process
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP/2 protocol error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Connection setup or teardown error
    #[error("Connection error: {0}")]
    Connection(String),

    /// A request did not complete in time
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The helper answered the handshake with a non-success status
    #[error("invalid HTTP response from helper: {status}")]
    HandshakeStatus {
        /// Status observed on `GET /`
        status: http::StatusCode,
    },

    /// The connection or process has already been closed
    #[error("{0} already closed")]
    Closed(&'static str),

    /// A second dial was attempted on a single-connection transport
    #[error("redial requested for {0}, but the pipe connection is already in use")]
    Redial(String),
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<http::Error> for TransportError {
    fn from(err: http::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl TransportError {
    /// Status code of a failed handshake, if this is one
    pub fn handshake_status(&self) -> Option<http::StatusCode> {
        match self {
            Self::HandshakeStatus { status } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_status_display_mentions_code() {
        let err = TransportError::HandshakeStatus {
            status: http::StatusCode::SERVICE_UNAVAILABLE,
        };
        assert!(err.to_string().contains("503"));
        assert_eq!(
            err.handshake_status(),
            Some(http::StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        let err = TransportError::Spawn {
            program: "missing-helper".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("missing-helper"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
