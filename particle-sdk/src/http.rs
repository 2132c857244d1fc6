//! HTTP transport for event streams
//!
//! Streams are plain `GET` requests whose response body stays open and
//! carries `event:`/`data:` lines. The body is adapted into an `AsyncRead`
//! and framed with a length-limited [`LinesCodec`].

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use particle_stream::{ConnectionError, LineStream, StreamOpener, SubscriptionPath};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response, StatusCode};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use url::Url;

use crate::error::Result;

/// Longest line accepted from an event stream before the stream is failed
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Opens event streams against the cloud API with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpStreamOpener {
    client: Client,
    base_url: Url,
    max_line_length: usize,
}

impl HttpStreamOpener {
    /// Opener with its own client
    pub fn new(base_url: Url, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Opener sharing an existing client.
    ///
    /// The client must not have a total request timeout, since it would cut
    /// off long-lived streams.
    pub fn with_client(client: Client, base_url: Url) -> Self {
        Self {
            client,
            base_url,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// URL of the stream for `path`.
    ///
    /// Every path segment is percent-encoded, so an event prefix containing
    /// `#`, `?` or spaces stays part of the path.
    pub fn stream_url(&self, path: &SubscriptionPath) -> std::result::Result<Url, ConnectionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ConnectionError::InvalidUrl(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(path.as_str().split('/'));
        Ok(url)
    }
}

#[async_trait]
impl StreamOpener for HttpStreamOpener {
    async fn open(
        &self,
        path: &SubscriptionPath,
        access_token: Option<String>,
    ) -> std::result::Result<Box<dyn LineStream>, ConnectionError> {
        let url = self.stream_url(path)?;
        tracing::debug!("GET {}", url);

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(Box::new(HttpLineStream::new(
                response,
                self.max_line_length,
            ))),
            StatusCode::UNAUTHORIZED => Err(ConnectionError::Unauthorized),
            status => Err(ConnectionError::Status(status.as_u16())),
        }
    }
}

type BodyReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

/// Line reader over a streaming response body
pub struct HttpLineStream {
    lines: FramedRead<BodyReader, LinesCodec>,
    max_line_length: usize,
}

impl HttpLineStream {
    pub fn new(response: Response, max_line_length: usize) -> Self {
        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .boxed();
        Self::from_reader(StreamReader::new(body), max_line_length)
    }

    fn from_reader(reader: BodyReader, max_line_length: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length)),
            max_line_length,
        }
    }
}

#[async_trait]
impl LineStream for HttpLineStream {
    /// `FramedRead` keeps partial lines in its own buffer, so a cancelled
    /// read loses nothing.
    async fn next_line(&mut self) -> std::result::Result<Option<String>, ConnectionError> {
        match self.lines.next().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                Err(ConnectionError::LineTooLong {
                    max: self.max_line_length,
                })
            }
            Some(Err(LinesCodecError::Io(e))) => Err(ConnectionError::Transport(e.to_string())),
            None => Ok(None),
        }
    }
}
