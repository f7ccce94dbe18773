//! EchoHeart Core - Pass-through Engine
//!
//! This crate provides the engine behind live listening:
//! - Audio device enumeration and the capture/playback driver (via CPAL)
//! - The audio graph: EQ, master gain and the analysis tap
//! - The session state machine with headphone gating and route-loss handling
//! - Settings persistence and the now-playing port
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Control Threads                         │
//! │  display ──Command──▶ SessionController ◀──RouteChange──   │
//! │          ◀──Event───        │              AudioSession     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ atomics (gains, spectrum, level)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Audio Thread                           │
//! │   Capture ──▶ EQ ──▶ Mix ──▶ Tap ──rtrb──▶ Output          │
//! │              (Zero allocation in this path)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod device;
mod error;
mod graph;
mod message;
mod now_playing;
mod sampler;
mod session;
mod settings;
mod stream;

pub use config::{EngineConfig, StreamConfig};
pub use device::{AudioDevice, DeviceType};
pub use error::{EngineError, EngineResult};
pub use graph::{AudioGraph, GraphShared};
pub use message::{Command, Event};
pub use now_playing::{LogNowPlaying, NoopNowPlaying, NowPlaying, NowPlayingInfo};
pub use sampler::LevelSampler;
pub use session::{Collaborators, ModeChange, SessionController, SessionState, StartHandle, Started};
pub use settings::{
    band_key, EchoSettings, JsonFileSettings, MemorySettings, SettingsPort, KEY_HIGH_GAIN,
    KEY_LISTEN_MODE, KEY_LOW_GAIN, KEY_MASTER_GAIN, KEY_MID_GAIN,
};
pub use stream::{AudioDriver, CpalDriver, StreamStats};

// Re-export the types callers need to drive the controller
pub use echo_dsp::{EqBand, NUM_BANDS, NUM_EQ_BANDS};
pub use echo_platform::{AudioRoute, AudioSession, ListenMode, PortType};
