//! Error types for AtlasMC
//!
//! Provides a unified error type for all client operations.
//!
//! A cache miss is *not* an error: lookups report it as `Ok(None)` and
//! `delete` as `Ok(false)`. Everything below is a genuine failure.

use thiserror::Error;

use crate::protocol::Status;

/// Result type alias using McError
pub type Result<T> = std::result::Result<T, McError>;

/// Unified error type for AtlasMC operations
#[derive(Debug, Error)]
pub enum McError {
    // -------------------------------------------------------------------------
    // Local Validation Errors (no I/O performed)
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("Connection to {server} lost: {reason}")]
    ConnectionLost { server: String, reason: String },

    #[error("Connection to {server} unavailable ({state})")]
    ConnectionUnavailable { server: String, state: String },

    #[error("operation timeout")]
    Timeout,

    #[error("Client closed")]
    ClientClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Server-Reported Errors
    // -------------------------------------------------------------------------
    #[error("Server error: {}", .0.as_str())]
    Server(Status),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Internal Consistency Errors
    // -------------------------------------------------------------------------
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McError {
    /// True for failures of the transport rather than of the request itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            McError::ConnectionLost { .. }
                | McError::ConnectionUnavailable { .. }
                | McError::Timeout
                | McError::Io(_)
        )
    }

    /// True if the request's deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McError::Timeout)
    }

    /// The status code, if the server rejected the request.
    pub fn server_status(&self) -> Option<Status> {
        match self {
            McError::Server(status) => Some(*status),
            _ => None,
        }
    }
}
