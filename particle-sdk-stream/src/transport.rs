//! Seams to the collaborators a stream connection depends on
//!
//! - [`StreamOpener`] opens the long-lived streaming request for a path
//! - [`LineStream`] reads the response body one line at a time
//! - [`CredentialProvider`] supplies the access token when a stream is opened

use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::path::SubscriptionPath;

/// A line-readable streaming response body.
#[async_trait]
pub trait LineStream: Send {
    /// Read the next line without its terminator.
    ///
    /// Returns `Ok(None)` once the stream has ended. Implementations must be
    /// cancel safe: dropping the returned future before it completes must not
    /// lose buffered data.
    async fn next_line(&mut self) -> Result<Option<String>, ConnectionError>;
}

/// Opens the streaming request backing one subscription path.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    /// Issue the request and return once response headers have arrived.
    async fn open(
        &self,
        path: &SubscriptionPath,
        access_token: Option<String>,
    ) -> Result<Box<dyn LineStream>, ConnectionError>;
}

/// Supplies the access token used when a connection is opened.
pub trait CredentialProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn access_token(&self) -> Option<String> {
        self()
    }
}

/// A fixed access token
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Opens streams without credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn access_token(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_providers() {
        assert_eq!(StaticToken::new("abc").access_token().as_deref(), Some("abc"));
        assert!(NoCredentials.access_token().is_none());

        let closure = || Some("from-closure".to_string());
        assert_eq!(closure.access_token().as_deref(), Some("from-closure"));
    }
}
