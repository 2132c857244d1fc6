//! The event record delivered to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One event received from the cloud event stream.
///
/// `name` always comes from the protocol's `event:` line; the JSON payload
/// carries the remaining fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Event name from the `event:` line
    pub name: String,
    /// Event data published by the device (empty when none was sent)
    pub data: String,
    /// Time to live in seconds
    pub ttl: u32,
    /// When the cloud accepted the event
    pub published_at: DateTime<Utc>,
    /// Identifier of the publishing device
    pub device_id: String,
}

/// Wire representation of a `data:` line
#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    data: Option<String>,
    #[serde(deserialize_with = "ttl_seconds")]
    ttl: u32,
    published_at: DateTime<Utc>,
    coreid: String,
}

impl Event {
    /// Decode a `data:` payload and stamp it with the pending event name
    pub fn from_payload(name: impl Into<String>, json: &str) -> Result<Self, serde_json::Error> {
        let payload: EventPayload = serde_json::from_str(json.trim())?;

        Ok(Self {
            name: name.into(),
            data: payload.data.unwrap_or_default(),
            ttl: payload.ttl,
            published_at: payload.published_at,
            device_id: payload.coreid,
        })
    }
}

/// Older stream endpoints send `ttl` as a numeric string.
fn ttl_seconds<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Ttl {
        Seconds(u32),
        Text(String),
    }

    match Ttl::deserialize(deserializer)? {
        Ttl::Seconds(seconds) => Ok(seconds),
        Ttl::Text(text) => text
            .trim()
            .parse()
            .map_err(<D::Error as serde::de::Error>::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_payload() {
        let event = Event::from_payload(
            "temp",
            r#" {"data":"72","ttl":60,"published_at":"2024-01-01T00:00:00Z","coreid":"abc"}"#,
        )
        .unwrap();

        assert_eq!(event.name, "temp");
        assert_eq!(event.data, "72");
        assert_eq!(event.ttl, 60);
        assert_eq!(
            event.published_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(event.device_id, "abc");
    }

    #[test]
    fn test_string_ttl_and_null_data() {
        let event = Event::from_payload(
            "spark/status",
            r#"{"data":null,"ttl":"60","published_at":"2024-05-02T10:11:12.345Z","coreid":"0123"}"#,
        )
        .unwrap();

        assert_eq!(event.data, "");
        assert_eq!(event.ttl, 60);
    }

    #[test]
    fn test_payload_name_is_ignored() {
        let event = Event::from_payload(
            "from-line",
            r#"{"name":"from-payload","data":"x","ttl":1,"published_at":"2024-01-01T00:00:00Z","coreid":"d"}"#,
        )
        .unwrap();
        assert_eq!(event.name, "from-line");
    }

    #[test]
    fn test_malformed_payload() {
        assert!(Event::from_payload("temp", "{not json").is_err());
        assert!(Event::from_payload("temp", r#"{"data":"1","ttl":"soon","published_at":"2024-01-01T00:00:00Z","coreid":"d"}"#).is_err());
        assert!(Event::from_payload("temp", r#"{"data":"1","ttl":60}"#).is_err());
    }
}
