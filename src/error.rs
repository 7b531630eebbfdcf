//! Error types and handling for the ENS runtime

use crate::sessions::SessionId;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, EnsError>;

/// Errors reported by the runtime.
///
/// None of these are fatal to the runtime itself: every failure is scoped to
/// a single call or a single session.
#[derive(Debug, thiserror::Error)]
pub enum EnsError {
    /// No buffer of a fitting size class is free
    #[error("Buffer pool exhausted: requested {requested} bytes, {in_use} of {capacity} buffers in use")]
    PoolExhausted {
        requested: usize,
        in_use: usize,
        capacity: usize,
    },

    /// Requested length exceeds the largest size class
    #[error("Buffer too large: requested {requested} bytes, largest block is {max} bytes")]
    BufferTooLarge { requested: usize, max: usize },

    /// Buffer ownership violation (double free, foreign pointer, use after hand-off)
    #[error("Invalid buffer: {message}")]
    InvalidBuffer { message: String },

    /// The target session has no bound event function
    #[error("No event function bound to session {session_id}")]
    NoEventFunction { session_id: SessionId },

    /// The dispatch engine refused the event (queue full or shut down)
    #[error("Dispatch rejected: {message}")]
    DispatchRejected { message: String },

    /// Unknown session identifier
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },

    /// Session is ending or has ended
    #[error("Session {session_id} terminated")]
    SessionTerminated { session_id: SessionId },

    /// Session was lost to a transport failure
    #[error("Session {session_id} disconnected")]
    Disconnected { session_id: SessionId },

    /// Sequence number already pending on this session
    #[error("Sequence number {sqn} already pending on session {session_id}")]
    SequenceInUse { session_id: SessionId, sqn: u32 },

    /// Sequence number 0 is reserved for lifecycle events
    #[error("Invalid sequence number {sqn}: data transfers require a non-zero sequence number")]
    InvalidSequence { sqn: u32 },

    /// No response arrived within the configured request timeout
    #[error("Request {sqn} on session {session_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        session_id: SessionId,
        sqn: u32,
        timeout_ms: u64,
    },

    /// Interface not registered
    #[error("Interface not found: {name}")]
    InterfaceNotFound { name: String },

    /// Interface already registered
    #[error("Interface already registered: {name}")]
    InterfaceExists { name: String },

    /// Interface name is not of the form `<microservice>.<interface>`
    #[error("Invalid interface name '{name}': {message}")]
    InvalidInterfaceName { name: String, message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Platform-specific errors (memory mapping, thread creation)
    #[error("Platform error: {message}")]
    Platform {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl EnsError {
    /// Create a pool exhausted error
    pub fn pool_exhausted(requested: usize, in_use: usize, capacity: usize) -> Self {
        Self::PoolExhausted {
            requested,
            in_use,
            capacity,
        }
    }

    /// Create a buffer too large error
    pub fn buffer_too_large(requested: usize, max: usize) -> Self {
        Self::BufferTooLarge { requested, max }
    }

    /// Create an invalid buffer error
    pub fn invalid_buffer(message: impl Into<String>) -> Self {
        Self::InvalidBuffer {
            message: message.into(),
        }
    }

    /// Create a dispatch rejected error
    pub fn dispatch_rejected(message: impl Into<String>) -> Self {
        Self::DispatchRejected {
            message: message.into(),
        }
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound { session_id }
    }

    /// Create a session terminated error
    pub fn session_terminated(session_id: SessionId) -> Self {
        Self::SessionTerminated { session_id }
    }

    /// Create an interface not found error
    pub fn interface_not_found(name: impl Into<String>) -> Self {
        Self::InterfaceNotFound { name: name.into() }
    }

    /// Create an invalid interface name error
    pub fn invalid_interface_name(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInterfaceName {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a platform error from an I/O error
    pub fn platform(source: std::io::Error, context: &str) -> Self {
        Self::Platform {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Whether the error means the session can no longer carry traffic
    pub fn is_session_closed(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound { .. } | Self::SessionTerminated { .. } | Self::Disconnected { .. }
        )
    }
}

impl From<std::io::Error> for EnsError {
    fn from(err: std::io::Error) -> Self {
        Self::platform(err, "I/O operation failed")
    }
}
