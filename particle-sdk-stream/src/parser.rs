//! Event frame parser for the line-oriented stream protocol
//!
//! Each event arrives as two lines followed by a blank line:
//!
//! ```text
//! event: temperature
//! data: {"data":"72","ttl":60,"published_at":"2024-01-01T00:00:00Z","coreid":"abc"}
//! ```
//!
//! Keep-alive comments (`:ok`), blank lines and unknown prefixes are ignored.

use crate::error::ProtocolError;
use crate::event::Event;

pub const EVENT_PREFIX: &str = "event:";
pub const DATA_PREFIX: &str = "data:";

/// Outcome of feeding one line to the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Line carried nothing of interest
    Ignored,
    /// An `event:` line set the pending event name
    Pending(String),
    /// A `data:` line completed an event
    Event(Event),
    /// A `data:` line completed a frame whose payload could not be decoded
    Rejected(ProtocolError),
}

/// Parse a single line given the current pending event name.
///
/// Stateless: the caller owns the pending name. A `data:` line without a
/// pending name is ignored.
pub fn parse_line(pending: Option<&str>, line: &str) -> Frame {
    let line = line.strip_suffix('\r').unwrap_or(line);

    if let Some(rest) = line.strip_prefix(EVENT_PREFIX) {
        return Frame::Pending(rest.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
        return match pending {
            Some(name) if !name.trim().is_empty() => match Event::from_payload(name, rest) {
                Ok(event) => Frame::Event(event),
                Err(e) => Frame::Rejected(ProtocolError::InvalidPayload {
                    event: name.to_string(),
                    message: e.to_string(),
                }),
            },
            _ => Frame::Ignored,
        };
    }

    Frame::Ignored
}

/// Stateful wrapper around [`parse_line`] tracking the pending event name
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The event name waiting for its `data:` line, if any
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Feed one line, updating the pending name
    pub fn decode(&mut self, line: &str) -> Frame {
        let frame = parse_line(self.pending.as_deref(), line);

        match &frame {
            Frame::Pending(name) => {
                self.pending = if name.is_empty() {
                    None
                } else {
                    Some(name.clone())
                };
            }
            Frame::Event(_) | Frame::Rejected(_) => self.pending = None,
            Frame::Ignored => {}
        }

        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    const TEMP_PAYLOAD: &str =
        r#"{"data":"72","ttl":60,"published_at":"2024-01-01T00:00:00Z","coreid":"abc"}"#;

    #[test]
    fn test_reference_frame() {
        let mut decoder = FrameDecoder::new();

        assert_eq!(decoder.decode("event: temp"), Frame::Pending("temp".to_string()));
        assert_eq!(decoder.pending(), Some("temp"));

        match decoder.decode(&format!("data: {}", TEMP_PAYLOAD)) {
            Frame::Event(event) => {
                assert_eq!(event.name, "temp");
                assert_eq!(event.data, "72");
                assert_eq!(event.ttl, 60);
                assert_eq!(event.device_id, "abc");
            }
            other => panic!("Expected event, got {:?}", other),
        }
        assert!(decoder.pending().is_none());
    }

    #[test]
    fn test_data_without_pending_name_is_ignored() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            decoder.decode(&format!("data: {}", TEMP_PAYLOAD)),
            Frame::Ignored
        );
    }

    #[test]
    fn test_blank_event_name_does_not_arm_data() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.decode("event:   "), Frame::Pending(String::new()));
        assert!(decoder.pending().is_none());
        assert_eq!(
            decoder.decode(&format!("data: {}", TEMP_PAYLOAD)),
            Frame::Ignored
        );
    }

    #[test]
    fn test_interleaved_noise_keeps_pending_name() {
        let mut decoder = FrameDecoder::new();
        decoder.decode("event: temp");
        assert_eq!(decoder.decode(":ok"), Frame::Ignored);
        assert_eq!(decoder.decode(""), Frame::Ignored);
        assert_eq!(decoder.decode("id: 12"), Frame::Ignored);
        assert!(matches!(
            decoder.decode(&format!("data:{}", TEMP_PAYLOAD)),
            Frame::Event(_)
        ));
    }

    #[test]
    fn test_later_event_line_replaces_pending_name() {
        let mut decoder = FrameDecoder::new();
        decoder.decode("event: first");
        decoder.decode("event: second");
        match decoder.decode(&format!("data: {}", TEMP_PAYLOAD)) {
            Frame::Event(event) => assert_eq!(event.name, "second"),
            other => panic!("Expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_crlf_lines() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.decode("event: temp\r"), Frame::Pending("temp".to_string()));
        assert!(matches!(
            decoder.decode(&format!("data: {}\r", TEMP_PAYLOAD)),
            Frame::Event(_)
        ));
    }

    #[test]
    fn test_malformed_payload_is_rejected_and_clears_pending() {
        let mut decoder = FrameDecoder::new();
        decoder.decode("event: temp");

        match decoder.decode("data: {broken") {
            Frame::Rejected(ProtocolError::InvalidPayload { event, .. }) => {
                assert_eq!(event, "temp")
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
        assert!(decoder.pending().is_none());

        // The decoder keeps working afterwards
        decoder.decode("event: temp");
        assert!(matches!(
            decoder.decode(&format!("data: {}", TEMP_PAYLOAD)),
            Frame::Event(_)
        ));
    }

    #[rstest]
    #[case("")]
    #[case(":ok")]
    #[case("retry: 1000")]
    #[case(" event: indented")]
    #[case("EVENT: upper")]
    fn test_non_protocol_lines(#[case] line: &str) {
        assert_eq!(parse_line(Some("temp"), line), Frame::Ignored);
    }

    proptest! {
        #[test]
        fn prop_event_line_sets_trimmed_name(name in "[a-zA-Z0-9/_ -]{0,24}") {
            let frame = parse_line(None, &format!("event:{}", name));
            prop_assert_eq!(frame, Frame::Pending(name.trim().to_string()));
        }

        #[test]
        fn prop_unprefixed_lines_are_ignored(line in "[^ed].*") {
            prop_assert_eq!(parse_line(Some("temp"), &line), Frame::Ignored);
        }
    }
}
