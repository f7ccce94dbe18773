//! Engine and Stream Configuration
//!
//! `StreamConfig` describes one capture/playback format; `EngineConfig`
//! adds the analysis, metering and route-watch timings around it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::now_playing::NowPlayingInfo;

/// Format the graph runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Hz; the capture device's native rate wins when it differs
    pub sample_rate: u32,

    /// Interleaved channels, at most `MAX_CHANNELS`
    pub channels: u16,

    /// Frames per callback
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            buffer_size: 1024,
        }
    }
}

impl StreamConfig {
    /// One buffer's worth of delay
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Samples in one interleaved buffer
    pub fn samples_per_buffer(&self) -> usize {
        self.buffer_size as usize * self.channels as usize
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("Sample rate out of range: {} Hz", self.sample_rate));
        }
        if self.channels == 0 || self.channels as usize > echo_dsp::MAX_CHANNELS {
            return Err(format!("Unsupported channel count: {}", self.channels));
        }
        if self.buffer_size < 32 || self.buffer_size > 8192 {
            return Err(format!("Buffer size out of range: {} frames", self.buffer_size));
        }
        Ok(())
    }
}

/// Everything the session controller needs besides its collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Preferred stream settings; the capture device's native rate and
    /// channel count win when they differ
    pub stream: StreamConfig,

    /// Samples of one channel per spectrum/level analysis block
    pub tap_frame_size: usize,

    /// How often the published level is refreshed
    pub level_rate_hz: u32,

    /// How often the default output device is checked for route changes
    pub route_poll_ms: u64,

    /// Ring buffer capacity between capture and output, in buffers
    pub ring_buffers: usize,

    /// Shown by the now-playing collaborator while running
    pub now_playing: NowPlayingInfo,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            tap_frame_size: echo_dsp::TAP_FRAME_SIZE,
            level_rate_hz: 30,
            route_poll_ms: 500,
            ring_buffers: 4,
            now_playing: NowPlayingInfo::default(),
        }
    }
}

impl EngineConfig {
    /// Small buffers for tight monitoring
    pub fn low_latency() -> Self {
        Self {
            stream: StreamConfig {
                buffer_size: 128, // ~2.7ms latency
                ..StreamConfig::default()
            },
            ring_buffers: 8,
            ..Self::default()
        }
    }

    /// Large buffers for slow or busy machines
    pub fn stable() -> Self {
        Self {
            stream: StreamConfig {
                buffer_size: 2048, // ~43ms latency
                ..StreamConfig::default()
            },
            ring_buffers: 4,
            ..Self::default()
        }
    }

    pub fn level_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.level_rate_hz.max(1) as f64)
    }

    pub fn route_poll_interval(&self) -> Duration {
        Duration::from_millis(self.route_poll_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        self.stream.validate().map_err(EngineError::ConfigError)?;
        if !self.tap_frame_size.is_power_of_two() || self.tap_frame_size < 64 {
            return Err(EngineError::ConfigError(format!(
                "Tap frame size must be a power of two >= 64: {}",
                self.tap_frame_size
            )));
        }
        if self.level_rate_hz == 0 || self.level_rate_hz > 1000 {
            return Err(EngineError::ConfigError(format!(
                "Invalid level rate: {} Hz",
                self.level_rate_hz
            )));
        }
        if self.route_poll_ms == 0 {
            return Err(EngineError::ConfigError("Route poll interval must be > 0".into()));
        }
        if self.ring_buffers < 2 {
            return Err(EngineError::ConfigError(format!(
                "Ring buffer must hold at least 2 buffers: {}",
                self.ring_buffers
            )));
        }
        Ok(())
    }
}
