//! Configuration for the cloud client

use std::time::Duration;

use particle_stream::StreamConfig;
use url::Url;

use crate::error::{Result, SdkError};

/// Production API endpoint
pub const DEFAULT_API_URL: &str = "https://api.particle.io/";

/// Configuration for [`ParticleCloud`](crate::ParticleCloud)
#[derive(Debug, Clone, PartialEq)]
pub struct CloudConfig {
    /// Base URL every API and stream path is joined onto
    /// Default: `https://api.particle.io/`
    pub api_url: String,

    /// Timeout for establishing TCP connections
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Timeout for regular request/response calls such as publishing.
    /// Event streams are long-lived and never use it.
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Event stream behaviour
    pub stream: StreamConfig,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            stream: StreamConfig::default(),
        }
    }
}

impl CloudConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Parsed base URL, always ending in `/` so relative joins keep its path
    pub fn base_url(&self) -> Result<Url> {
        let mut raw = self.api_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(Url::parse(&raw)?)
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SdkError::Configuration(format!(
                "API URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.connect_timeout.is_zero() {
            return Err(SdkError::Configuration(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(SdkError::Configuration(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        self.stream.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config() {
        let config = CloudConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_url().unwrap().as_str(), DEFAULT_API_URL);
    }

    #[rstest]
    #[case("http://127.0.0.1:1234", "http://127.0.0.1:1234/")]
    #[case("https://example.com/particle", "https://example.com/particle/")]
    #[case(" https://example.com/api/ ", "https://example.com/api/")]
    fn test_base_url_gets_trailing_slash(#[case] raw: &str, #[case] expected: &str) {
        let config = CloudConfig::new().with_api_url(raw);
        assert_eq!(config.base_url().unwrap().as_str(), expected);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            CloudConfig::new().with_api_url("not a url").validate(),
            Err(SdkError::InvalidUrl(_))
        ));
        assert!(matches!(
            CloudConfig::new().with_api_url("ftp://example.com").validate(),
            Err(SdkError::Configuration(_))
        ));
        assert!(matches!(
            CloudConfig::new()
                .with_connect_timeout(Duration::ZERO)
                .validate(),
            Err(SdkError::Configuration(_))
        ));
        assert!(matches!(
            CloudConfig::new()
                .with_stream(StreamConfig::new().with_max_connections(0))
                .validate(),
            Err(SdkError::Stream(_))
        ));
    }
}
