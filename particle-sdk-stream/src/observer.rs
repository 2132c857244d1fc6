//! Observability hook for background stream activity
//!
//! Connection failures, dropped frames and failing callbacks never surface
//! through `subscribe`/`unsubscribe`. They are logged with `tracing` and
//! reported to the registry's [`StreamObserver`].

use crate::connection::ConnectionState;
use crate::error::{ConnectionError, HandlerError, ProtocolError};
use crate::group::SubscriptionHandle;
use crate::path::SubscriptionPath;

/// Why a stream connection reached `Closed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server ended the response body
    EndOfStream,
    /// The loop found the handler group empty
    NoHandlers,
    /// The group was closed while a read was in flight
    Cancelled,
    /// The stream could not be opened
    OpenFailed(ConnectionError),
    /// Reading from an open stream failed
    ReadFailed(ConnectionError),
}

impl CloseReason {
    /// Whether the connection closed because it was no longer needed
    pub fn is_teardown(&self) -> bool {
        matches!(self, Self::NoHandlers | Self::Cancelled)
    }

    /// Whether the cloud rejected the stream's credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::OpenFailed(ConnectionError::Unauthorized)
                | Self::ReadFailed(ConnectionError::Unauthorized)
        )
    }
}

/// Receives diagnostics from connections and the dispatcher.
///
/// Methods run on the connection task (or the delivery context for handler
/// errors) and must not block.
pub trait StreamObserver: Send + Sync {
    fn on_state_change(&self, _path: &SubscriptionPath, _state: ConnectionState) {}

    fn on_protocol_error(&self, _path: &SubscriptionPath, _error: &ProtocolError) {}

    fn on_handler_error(
        &self,
        _path: &SubscriptionPath,
        _handle: SubscriptionHandle,
        _error: &HandlerError,
    ) {
    }

    fn on_connection_closed(&self, _path: &SubscriptionPath, _reason: &CloseReason) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}
