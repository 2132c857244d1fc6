//! Configuration types for the particle-sdk-stream crate
//!
//! [`StreamConfig`] controls how stream connections are torn down and bounded.

use std::time::Duration;

use crate::error::StreamError;

/// How a connection reacts when its last handler is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancellationMode {
    /// Abort the in-flight read as soon as the handler group is closed
    #[default]
    Immediate,
    /// Only notice an empty handler group after the next line arrives
    /// (or the read timeout expires)
    Cooperative,
}

/// Configuration for the stream registry and its connections
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Teardown behaviour when a path loses its last handler
    /// Default: `CancellationMode::Immediate`
    pub cancellation: CancellationMode,

    /// Longest wait for a single line before the loop re-checks its exit
    /// conditions. Expiry does not close a connection that still has handlers.
    /// Default: 60 seconds
    pub read_timeout: Option<Duration>,

    /// Upper bound on simultaneously open event streams (distinct paths)
    /// Default: unbounded
    pub max_connections: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            cancellation: CancellationMode::Immediate,
            read_timeout: Some(Duration::from_secs(60)),
            max_connections: None,
        }
    }
}

impl StreamConfig {
    /// Create a new StreamConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference teardown behaviour: cooperative cancellation and no read
    /// timeout, so a connection only exits after the next line or socket close
    pub fn compatible() -> Self {
        Self {
            cancellation: CancellationMode::Cooperative,
            read_timeout: None,
            max_connections: None,
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationMode) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.read_timeout == Some(Duration::ZERO) {
            return Err(StreamError::Configuration(
                "Read timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_connections == Some(0) {
            return Err(StreamError::Configuration(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
