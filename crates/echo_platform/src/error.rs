//! Platform Error Types

use thiserror::Error;

/// Errors from audio-session and route operations
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Platform not supported")]
    UnsupportedPlatform,

    #[error("Failed to apply session policy: {0}")]
    PolicyRejected(String),

    #[error("Failed to change session activation: {0}")]
    ActivationFailed(String),

    #[error("No output device available")]
    NoOutputDevice,

    #[error("Failed to query audio host: {0}")]
    HostQueryFailed(String),

    #[error("Failed to start route watcher: {0}")]
    WatcherFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
