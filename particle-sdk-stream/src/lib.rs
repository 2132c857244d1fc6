//! # Particle Stream
//!
//! Event subscription and stream multiplexing core for the Particle cloud SDK.
//!
//! ## Overview
//!
//! Applications register any number of callbacks against event paths such as
//! `v1/devices/events/temp`. Every distinct path is served by exactly one
//! long-lived streaming connection, no matter how many callbacks listen to it.
//! Each received event is fanned out to the path's callbacks in registration
//! order.
//!
//! ## Key Features
//!
//! - **One connection per path**: concurrent subscribers share a single stream
//! - **Dynamic fan-out**: callbacks can be added or removed while events flow,
//!   including from inside a callback
//! - **Automatic teardown**: removing the last callback of a path closes its
//!   connection, immediately or cooperatively depending on [`StreamConfig`]
//! - **Failure isolation**: a failing or panicking callback never blocks the
//!   others, and a failing path never affects other paths
//! - **Pluggable transport**: streams are opened through the [`StreamOpener`]
//!   trait, with credentials supplied by a [`CredentialProvider`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use particle_stream::prelude::*;
//!
//! let registry = StreamRegistry::builder(opener)
//!     .credentials(Arc::new(StaticToken::new("token")))
//!     .build()?;
//!
//! let handle = registry.subscribe("v1/devices/events/temp", |event: &Event| {
//!     println!("{} from {}: {}", event.name, event.device_id, event.data);
//!     Ok(())
//! })?;
//!
//! // Last subscriber gone, the connection for the path closes
//! registry.unsubscribe(handle);
//! ```
//!
//! ## Architecture
//!
//! 1. **Registry**: maps paths to handler groups and handles to paths
//! 2. **Handler group**: ordered callbacks for one path plus its close signal
//! 3. **Connection**: one tokio task per path reading and decoding lines
//! 4. **Parser**: turns `event:`/`data:` line pairs into [`Event`]s
//! 5. **Dispatcher**: delivers events inline or through a [`DeliveryContext`]
//!
//! Delivery is best effort and at most once. Connections are never
//! reestablished after they close.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod group;
pub mod observer;
pub mod parser;
pub mod path;
pub mod registry;
pub mod transport;

// Re-export main types for convenience
pub use config::{CancellationMode, StreamConfig};
pub use connection::{ConnectionHandle, ConnectionState};
pub use dispatch::{DeliveryContext, DeliveryJob, Dispatcher, ThreadContext};
pub use error::{ConnectionError, HandlerError, HandlerResult, ProtocolError, Result, StreamError};
pub use event::Event;
pub use group::{EventCallback, HandlerEntry, HandlerGroup, SubscriptionHandle};
pub use observer::{CloseReason, NoopObserver, StreamObserver};
pub use parser::{parse_line, Frame, FrameDecoder};
pub use path::SubscriptionPath;
pub use registry::{StreamRegistry, StreamRegistryBuilder};
pub use transport::{CredentialProvider, LineStream, NoCredentials, StaticToken, StreamOpener};

/// Prelude module for convenient imports
///
/// ```rust
/// use particle_stream::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CancellationMode, ConnectionState, CredentialProvider, DeliveryContext, Event,
        HandlerError, HandlerResult, StaticToken, StreamConfig, StreamError, StreamOpener,
        StreamRegistry, SubscriptionHandle, SubscriptionPath,
    };
}
