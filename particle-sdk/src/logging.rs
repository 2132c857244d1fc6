//! Logging setup for applications using the SDK
//!
//! The SDK itself only emits `tracing` events. Applications that do not
//! install their own subscriber can use [`init_logging`] or
//! [`init_logging_from_env`].

use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable selecting the logging mode
pub const LOG_MODE_ENV: &str = "PARTICLE_LOG_MODE";
/// Environment variable overriding the filter directive
pub const LOG_LEVEL_ENV: &str = "PARTICLE_LOG_LEVEL";

/// Where and how log output is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// No subscriber is installed
    #[default]
    Silent,
    /// Compact stderr output at `info`
    Development,
    /// Pretty stderr output at `debug` with thread ids and source locations
    Debug,
    /// One JSON object per line at `info`, for log collectors
    Json,
}

impl FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" | "off" => Ok(Self::Silent),
            "development" | "dev" => Ok(Self::Development),
            "debug" => Ok(Self::Debug),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::InvalidEnv(format!(
                "{}={} is not a logging mode",
                LOG_MODE_ENV, other
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Install a global subscriber for `mode`.
///
/// Fails if another subscriber was installed first.
///
/// ```rust,ignore
/// particle_sdk::logging::init_logging(LoggingMode::Development)?;
/// ```
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let result = match mode {
        LoggingMode::Silent => return Ok(()),
        LoggingMode::Development => Registry::default()
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .with(env_filter("info"))
            .try_init(),
        LoggingMode::Debug => Registry::default()
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(env_filter("debug"))
            .try_init(),
        LoggingMode::Json => Registry::default()
            .with(fmt::layer().json().with_current_span(false))
            .with(env_filter("info"))
            .try_init(),
    };

    result.map_err(|e| LoggingError::TracingInit(e.to_string()))
}

/// Install a subscriber chosen by `PARTICLE_LOG_MODE`.
///
/// Unset means [`LoggingMode::Silent`]; an unknown value is an error.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    init_logging(mode_from_env()?)
}

fn mode_from_env() -> Result<LoggingMode, LoggingError> {
    match std::env::var(LOG_MODE_ENV) {
        Ok(value) => value.parse(),
        Err(_) => Ok(LoggingMode::Silent),
    }
}

/// `PARTICLE_LOG_LEVEL`, then `RUST_LOG`, then `default_level`
fn env_filter(default_level: &str) -> EnvFilter {
    if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
        EnvFilter::new(level)
    } else if let Ok(rust_log) = std::env::var("RUST_LOG") {
        EnvFilter::new(rust_log)
    } else {
        EnvFilter::new(default_level)
    }
}

/// Whether a global subscriber has already been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
