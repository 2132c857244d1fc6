//! # Particle SDK
//!
//! Client for the Particle device cloud's server-pushed event feed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use particle_sdk::prelude::*;
//!
//! let cloud = ParticleCloud::with_token("token")?;
//!
//! cloud.on_unauthorized(|| eprintln!("Access token rejected, log in again"));
//!
//! let handle = cloud.subscribe_to_device_events_with_prefix("0123abc", "temp", |event| {
//!     println!("{} = {}", event.name, event.data);
//!     Ok(())
//! })?;
//!
//! cloud.wait_for_device_online("4567def").await?;
//! cloud.publish_event("calibrate", "now", true, 60).await?;
//!
//! cloud.unsubscribe_from_event(handle);
//! ```
//!
//! Every distinct feed is served by one streaming connection shared by all
//! of its subscribers; see [`particle_stream`] for the multiplexing rules.

pub mod cloud;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod scope;

pub use cloud::{ParticleCloud, ParticleCloudBuilder, STATUS_EVENT, STATUS_ONLINE};
pub use config::{CloudConfig, DEFAULT_API_URL};
pub use error::{Result, SdkError};
pub use http::{HttpLineStream, HttpStreamOpener};
pub use scope::{EventScope, API_VERSION};

// Re-export commonly used types from the stream core
pub use particle_stream;
pub use particle_stream::{
    CancellationMode, CredentialProvider, Event, HandlerError, HandlerResult, StaticToken,
    StreamConfig, SubscriptionHandle, ThreadContext,
};

/// Prelude module for convenient imports
///
/// ```rust
/// use particle_sdk::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CloudConfig, Event, EventScope, HandlerError, HandlerResult, ParticleCloud, Result,
        SdkError, StreamConfig, SubscriptionHandle,
    };
}
