//! Engine Error Types

use thiserror::Error;

/// Errors that can occur in the audio engine
///
/// None of these are fatal: every failure path converges the session back
/// to Idle.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Audio session configuration failed: {0}")]
    SessionConfig(String),

    #[error("Headphones required: connect wired or Bluetooth headphones to avoid feedback")]
    HeadphonesRequired,

    #[error("Audio engine failed to start: {0}")]
    EngineStart(String),

    #[error("Output route lost")]
    RouteLost,

    #[error("Start cancelled")]
    StartCancelled,

    #[error("Engine already running")]
    AlreadyRunning,

    #[error("No audio devices found")]
    NoDevicesFound,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to play audio stream: {0}")]
    StreamPlayError(String),

    #[error("Stream configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    #[error("DSP error: {0}")]
    Dsp(#[from] echo_dsp::DspError),

    #[error("Platform error: {0}")]
    Platform(#[from] echo_platform::PlatformError),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
