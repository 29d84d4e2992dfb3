//! Error types for the netchat messaging layer
//!
//! Specific error families (frame, connection) are folded into the single
//! `NetchatError` that every public operation returns.

use crate::types::ConnectionType;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised while reading or writing wire frames
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame too large: {size} bytes (max: {max_size})")]
    TooLarge { size: usize, max_size: usize },
    #[error("Payload size mismatch: header says {declared}, got {actual}")]
    PayloadSizeMismatch { declared: usize, actual: usize },
    #[error("Payload type mismatch: expected {expected}, got {actual}")]
    PayloadTypeMismatch { expected: String, actual: String },
}

/// Errors raised while establishing or using a connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection to {endpoint} failed: {reason}")]
    EstablishFailed { endpoint: String, reason: String },
    #[error("Connection to {endpoint} timed out after {duration_ms}ms")]
    Timeout { endpoint: String, duration_ms: u64 },
    #[error("Connection {connection} is closed")]
    Closed { connection: String },
    #[error("{connection_type} connections are not supported by this build")]
    UnsupportedConnectionType { connection_type: ConnectionType },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for netchat
#[derive(Debug, thiserror::Error)]
pub enum NetchatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Invalid endpoint '{input}': {reason}")]
    InvalidEndpoint { input: String, reason: String },

    #[error("Invalid Bluetooth address '{input}'")]
    InvalidAddress { input: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Comms manager has been shut down")]
    ShutDown,
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl NetchatError {
    /// Create an invalid endpoint error
    pub fn invalid_endpoint<I: Into<String>, R: Into<String>>(input: I, reason: R) -> Self {
        NetchatError::InvalidEndpoint {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        NetchatError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a connection establishment error
    pub fn establish_failed<E: ToString, R: Into<String>>(endpoint: E, reason: R) -> Self {
        NetchatError::Connection(ConnectionError::EstablishFailed {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        })
    }

    /// Create a closed-connection error
    pub fn connection_closed<C: ToString>(connection: C) -> Self {
        NetchatError::Connection(ConnectionError::Closed {
            connection: connection.to_string(),
        })
    }

    /// Create an unsupported connection type error
    pub fn unsupported(connection_type: ConnectionType) -> Self {
        NetchatError::Connection(ConnectionError::UnsupportedConnectionType { connection_type })
    }

    /// True when the error means the peer went away rather than a local fault
    pub fn is_disconnect(&self) -> bool {
        match self {
            NetchatError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            NetchatError::Connection(ConnectionError::Closed { .. }) => true,
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, NetchatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_names_type() {
        let err = NetchatError::unsupported(ConnectionType::Bluetooth);
        assert_eq!(
            err.to_string(),
            "Connection error: Bluetooth connections are not supported by this build"
        );
    }

    #[test]
    fn test_disconnect_classification() {
        let eof = NetchatError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(eof.is_disconnect());
        assert!(NetchatError::connection_closed("x").is_disconnect());
        assert!(!NetchatError::ShutDown.is_disconnect());
    }
}
