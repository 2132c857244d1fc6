use particle_stream::StreamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unauthorized: the cloud rejected the access token")]
    Unauthorized,

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Online watcher closed before the device came online")]
    WatcherClosed,
}

pub type Result<T> = std::result::Result<T, SdkError>;
