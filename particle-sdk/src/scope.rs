//! Event feed scopes and the stream paths they map to

use particle_stream::SubscriptionPath;

/// API version segment of every path
pub const API_VERSION: &str = "v1";

/// Which slice of the cloud's event feed to follow
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventScope {
    /// All public events
    All,
    /// Events from devices owned by the caller
    MyDevices,
    /// Events from a single device
    Device(String),
}

impl EventScope {
    /// Stream path for this scope, optionally narrowed to an event name
    /// prefix. A blank prefix means no narrowing.
    ///
    /// ```rust
    /// use particle_sdk::EventScope;
    ///
    /// assert_eq!(EventScope::All.path("").as_str(), "v1/events");
    /// assert_eq!(EventScope::MyDevices.path("temp").as_str(), "v1/devices/events/temp");
    /// ```
    pub fn path(&self, prefix: &str) -> SubscriptionPath {
        let base = match self {
            Self::All => format!("{}/events", API_VERSION),
            Self::MyDevices => format!("{}/devices/events", API_VERSION),
            Self::Device(id) => format!("{}/devices/{}/events", API_VERSION, id.trim()),
        };

        let prefix = prefix.trim();
        if prefix.is_empty() {
            SubscriptionPath::new(base)
        } else {
            SubscriptionPath::new(format!("{}/{}", base, prefix))
        }
    }
}
