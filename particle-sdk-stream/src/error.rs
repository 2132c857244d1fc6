//! Error types for the particle-sdk-stream crate.
//!
//! Only [`StreamError`] is ever returned from the registry API. The other
//! types describe failures that happen later on a background connection and
//! are reported through [`StreamObserver`](crate::observer::StreamObserver)
//! and `tracing` instead of crossing `subscribe`/`unsubscribe`.

/// Errors returned synchronously by the stream registry.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The optional connection bound has been reached
    #[error("Connection limit reached: {max_connections} event streams already open")]
    ConnectionLimit {
        /// The configured maximum
        max_connections: usize,
    },

    /// The registry has been shut down and accepts no new subscriptions
    #[error("Stream registry has been shut down")]
    Shutdown,

    /// No tokio runtime was available to run connection tasks
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Transport-level failure opening or reading an event stream.
///
/// Terminates only the connection of the affected path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Network or HTTP communication error
    #[error("Transport error: {0}")]
    Transport(String),

    /// The cloud rejected the stream request with 401
    #[error("Unauthorized: event stream request was rejected")]
    Unauthorized,

    /// Any other unsuccessful HTTP status
    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    /// The stream URL could not be built from the subscription path
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    /// A line exceeded the reader's length limit
    #[error("Stream line longer than {max} bytes")]
    LineTooLong { max: usize },
}

/// Malformed frame on an otherwise healthy stream. The frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The `data:` payload could not be decoded
    #[error("Invalid payload for event '{event}': {message}")]
    InvalidPayload {
        /// Name taken from the preceding `event:` line
        event: String,
        /// Decoder message
        message: String,
    },
}

/// A registered callback failed during delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The callback returned an error
    #[error("Event handler failed: {0}")]
    Failed(String),

    /// The callback panicked
    #[error("Event handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Convenience constructor for callbacks reporting a failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Result type returned by event callbacks
pub type HandlerResult = std::result::Result<(), HandlerError>;
