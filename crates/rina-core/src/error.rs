//! Error types for the IPC process registry.
//!
//! Every failure is scoped to the single request or SDU being processed; none
//! of these variants leaves the registry in a partially-mutated state.

use crate::config::DifType;
use thiserror::Error;

/// Main error type for the registry, control channel and data plane.
#[derive(Debug, Error)]
pub enum RinaError {
    // Control protocol errors
    #[error("Malformed control message: {message}")]
    BadMessage { message: String },

    #[error("Unsupported control message type {msg_type}")]
    Unsupported { msg_type: u16 },

    // Registry errors
    #[error("Factory already registered for DIF type {0}")]
    AlreadyRegistered(DifType),

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("No factory registered for DIF type {0}")]
    NoFactory(DifType),

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Identifier space exhausted ({capacity} ids in use)")]
    OutOfIds { capacity: usize },

    #[error("Allocation failed: {message}")]
    AllocationFailure { message: String },

    #[error("{dif_type} IPC process does not implement {operation}")]
    OperationNotSupported {
        dif_type: DifType,
        operation: &'static str,
    },

    // Control session errors
    #[error("No response pending")]
    WouldBlock,

    #[error("Buffer too small: response needs {needed} bytes, {available} available")]
    InsufficientBuffer { needed: usize, available: usize },

    #[error("Operation was cancelled")]
    Cancelled,

    // Data plane errors
    #[error("Port {0} is not bound to this IPC process")]
    InvalidPort(u32),

    #[error("PDU would carry {depth} headers, limit is {max}")]
    LayerDepthExceeded { depth: usize, max: usize },

    #[error("Malformed PDU: {message}")]
    MalformedPdu { message: String },

    // Control device errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Lost connection to control device at {addr}")]
    ConnectionLost { addr: String },

    #[error("Request {event_id} timed out")]
    Timeout { event_id: u32 },

    #[error("Control device rejected request {event_id} (errno {errno})")]
    Rejected { event_id: u32, errno: i32 },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RinaError>;

impl From<std::io::Error> for RinaError {
    fn from(err: std::io::Error) -> Self {
        RinaError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RinaError {
    pub(crate) fn bad_message(message: impl Into<String>) -> Self {
        RinaError::BadMessage {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        RinaError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn malformed_pdu(message: impl Into<String>) -> Self {
        RinaError::MalformedPdu {
            message: message.into(),
        }
    }

    /// Convert to the negative errno a control device write/read reports.
    ///
    /// - `-EINVAL` (22): malformed or unrecognized messages, bad arguments
    /// - `-EBUSY` (16): duplicate factory registration
    /// - `-ENOSPC` (28): id space exhausted
    /// - `-ENOMEM` (12): instance creation failed
    /// - `-EAGAIN` (11): nothing queued on a non-blocking read
    /// - `-ENOBUFS` (105): caller buffer smaller than the queued response
    /// - `-EINTR` (4): blocked read cancelled
    pub fn errno(&self) -> i32 {
        match self {
            RinaError::BadMessage { .. }
            | RinaError::Unsupported { .. }
            | RinaError::InvalidArgument { .. }
            | RinaError::NoFactory(_)
            | RinaError::InvalidPort(_)
            | RinaError::MalformedPdu { .. } => -22,

            RinaError::AlreadyRegistered(_) => -16,
            RinaError::NotFound { .. } => -2,
            RinaError::OutOfIds { .. } => -28,
            RinaError::AllocationFailure { .. } => -12,
            RinaError::OperationNotSupported { .. } => -95,
            RinaError::WouldBlock => -11,
            RinaError::InsufficientBuffer { .. } => -105,
            RinaError::Cancelled => -4,
            RinaError::LayerDepthExceeded { .. } => -40,
            RinaError::ConnectionLost { .. } => -32,
            RinaError::Timeout { .. } => -110,
            RinaError::Rejected { errno, .. } => *errno,

            RinaError::Io { .. } | RinaError::Other(_) => -5,
        }
    }

    /// Check if the same call may succeed when simply repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RinaError::WouldBlock | RinaError::InsufficientBuffer { .. } | RinaError::Cancelled
        )
    }
}
