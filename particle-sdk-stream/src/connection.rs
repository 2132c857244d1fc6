//! Per-path stream connection
//!
//! A [`StreamConnection`] is one background tokio task that opens the event
//! stream for a path, decodes its lines and hands events to the dispatcher. It
//! runs until the body ends, a read fails, or its handler group is emptied or
//! closed. A finished connection is never restarted.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::{CancellationMode, StreamConfig};
use crate::dispatch::Dispatcher;
use crate::error::ConnectionError;
use crate::group::HandlerGroup;
use crate::observer::{CloseReason, StreamObserver};
use crate::parser::{Frame, FrameDecoder};
use crate::path::SubscriptionPath;
use crate::transport::{CredentialProvider, LineStream, StreamOpener};

/// Lifecycle of a stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Spawned but not yet started
    Idle,
    /// Waiting for response headers
    Connecting,
    /// Reading events
    Streaming,
    /// Leaving the read loop and releasing the body
    Draining,
    /// Finished; never restarted
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Registry-side view of a running connection
#[derive(Debug)]
pub struct ConnectionHandle {
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// Result of waiting for one line
enum ReadOutcome {
    Line(String),
    TimedOut,
    Cancelled,
    End,
    Failed(ConnectionError),
}

impl From<Result<Option<String>, ConnectionError>> for ReadOutcome {
    fn from(result: Result<Option<String>, ConnectionError>) -> Self {
        match result {
            Ok(Some(line)) => ReadOutcome::Line(line),
            Ok(None) => ReadOutcome::End,
            Err(e) => ReadOutcome::Failed(e),
        }
    }
}

/// Background task serving a single subscription path
pub(crate) struct StreamConnection {
    pub(crate) path: SubscriptionPath,
    pub(crate) group: Arc<HandlerGroup>,
    pub(crate) opener: Arc<dyn StreamOpener>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) observer: Arc<dyn StreamObserver>,
    pub(crate) config: StreamConfig,
}

impl StreamConnection {
    /// Start the connection task on `runtime`
    pub(crate) fn spawn(self, runtime: &Handle) -> ConnectionHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        // Detached: the task ends on its own once the group closes
        runtime.spawn(self.run(state_tx));

        ConnectionHandle { state: state_rx }
    }

    async fn run(self, state: watch::Sender<ConnectionState>) {
        let reason = self.stream_events(&state).await;

        match &reason {
            CloseReason::NoHandlers | CloseReason::Cancelled => {
                tracing::debug!("Event stream for {} closed: {:?}", self.path, reason);
            }
            CloseReason::EndOfStream => {
                tracing::info!("Event stream for {} ended by server", self.path);
            }
            CloseReason::OpenFailed(e) => {
                tracing::error!("Failed to open event stream for {}: {}", self.path, e);
            }
            CloseReason::ReadFailed(e) => {
                tracing::warn!("Event stream for {} failed: {}", self.path, e);
            }
        }

        self.transition(&state, ConnectionState::Closed);
        self.observer.on_connection_closed(&self.path, &reason);
    }

    async fn stream_events(&self, state: &watch::Sender<ConnectionState>) -> CloseReason {
        let mut closed = self.group.closed_signal();

        if self.should_stop() {
            return CloseReason::NoHandlers;
        }

        self.transition(state, ConnectionState::Connecting);
        let access_token = self.credentials.access_token();

        let opened = match self.config.cancellation {
            CancellationMode::Immediate => {
                tokio::select! {
                    biased;
                    _ = wait_closed(&mut closed) => return CloseReason::Cancelled,
                    opened = self.opener.open(&self.path, access_token) => opened,
                }
            }
            CancellationMode::Cooperative => self.opener.open(&self.path, access_token).await,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return CloseReason::OpenFailed(e),
        };

        self.transition(state, ConnectionState::Streaming);
        tracing::debug!("Event stream for {} open", self.path);

        let mut decoder = FrameDecoder::new();
        let reason = loop {
            if self.should_stop() {
                break CloseReason::NoHandlers;
            }

            let line = match self.read_line(&mut stream, &mut closed).await {
                ReadOutcome::Line(line) => line,
                ReadOutcome::TimedOut => continue,
                ReadOutcome::Cancelled => break CloseReason::Cancelled,
                ReadOutcome::End => break CloseReason::EndOfStream,
                ReadOutcome::Failed(e) => break CloseReason::ReadFailed(e),
            };

            match decoder.decode(&line) {
                Frame::Event(event) => {
                    tracing::trace!("Event '{}' on {}", event.name, self.path);
                    self.dispatcher.dispatch(&self.group, event);
                }
                Frame::Rejected(e) => {
                    tracing::warn!("Dropping frame on {}: {}", self.path, e);
                    self.observer.on_protocol_error(&self.path, &e);
                }
                Frame::Pending(_) | Frame::Ignored => {}
            }
        };

        if reason.is_teardown() {
            self.transition(state, ConnectionState::Draining);
        }
        drop(stream);

        reason
    }

    /// Wait for the next line, honouring the read timeout and, in immediate
    /// mode, the group's close signal
    async fn read_line(
        &self,
        stream: &mut Box<dyn LineStream>,
        closed: &mut watch::Receiver<bool>,
    ) -> ReadOutcome {
        let read_timeout = self.config.read_timeout;
        let read = async move {
            match read_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next_line()).await {
                    Ok(result) => ReadOutcome::from(result),
                    Err(_) => ReadOutcome::TimedOut,
                },
                None => ReadOutcome::from(stream.next_line().await),
            }
        };

        match self.config.cancellation {
            CancellationMode::Immediate => {
                tokio::select! {
                    biased;
                    _ = wait_closed(closed) => ReadOutcome::Cancelled,
                    outcome = read => outcome,
                }
            }
            CancellationMode::Cooperative => read.await,
        }
    }

    fn should_stop(&self) -> bool {
        self.group.is_closed() || self.group.is_empty()
    }

    fn transition(&self, state: &watch::Sender<ConnectionState>, next: ConnectionState) {
        let previous = state.send_replace(next);
        if previous != next {
            tracing::trace!("Connection {} {} -> {}", self.path, previous, next);
            self.observer.on_state_change(&self.path, next);
        }
    }
}

/// Resolve once the close flag is set
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed {
            return;
        }
        if closed.changed().await.is_err() {
            // Sender lives in the group, which this connection keeps alive
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_and_terminal() {
        assert_eq!(ConnectionState::Streaming.to_string(), "streaming");
        assert_eq!(ConnectionState::Draining.to_string(), "draining");
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Draining.is_terminal());
    }

    #[tokio::test]
    async fn test_wait_closed_resolves_on_close() {
        let group = HandlerGroup::new(SubscriptionPath::from("v1/events"));
        let mut signal = group.closed_signal();

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            wait_closed(&mut signal),
        )
        .await;
        assert!(pending.is_err());

        group.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), wait_closed(&mut signal))
            .await
            .expect("close signal should resolve");
    }
}
