//! Normalized subscription path keys

use std::fmt;

/// Normalized key identifying one logical event feed.
///
/// Normalization trims surrounding whitespace and drops empty segments, so
/// `"/v1/events/"`, `"v1//events"` and `" v1/events "` all name the same feed
/// and share one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionPath(String);

impl SubscriptionPath {
    /// Create a normalized path from any string
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized = raw
            .as_ref()
            .trim()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self(normalized)
    }

    /// Get the normalized path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether normalization left nothing behind
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SubscriptionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubscriptionPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionPath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for SubscriptionPath {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&SubscriptionPath> for SubscriptionPath {
    fn from(path: &SubscriptionPath) -> Self {
        path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("v1/events", "v1/events")]
    #[case("/v1/events/", "v1/events")]
    #[case("  v1/events  ", "v1/events")]
    #[case("v1//devices///events", "v1/devices/events")]
    #[case("v1/devices/abc/events/temp", "v1/devices/abc/events/temp")]
    #[case("", "")]
    fn test_normalization(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(SubscriptionPath::new(raw).as_str(), expected);
    }

    #[test]
    fn test_equal_after_normalization() {
        assert_eq!(
            SubscriptionPath::from("/v1/events/"),
            SubscriptionPath::from("v1/events".to_string())
        );
        assert_ne!(
            SubscriptionPath::from("v1/events"),
            SubscriptionPath::from("v1/events/temp")
        );
    }

    #[test]
    fn test_case_is_preserved() {
        assert_ne!(
            SubscriptionPath::from("v1/events/Temp"),
            SubscriptionPath::from("v1/events/temp")
        );
        assert!(SubscriptionPath::new(" / ").is_empty());
    }
}
