//! Message Types for Thread Communication
//!
//! Commands flow from the display collaborator -> SessionController
//! Events flow from SessionController -> display collaborator

use std::str::FromStr;

use echo_dsp::{EqBand, NUM_BANDS, NUM_EQ_BANDS};
use echo_platform::{AudioRoute, ListenMode};
use serde::{Deserialize, Serialize};

use crate::config::StreamConfig;
use crate::error::EngineError;
use crate::session::SessionState;

/// Commands issued to the session controller
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start pass-through
    Start,

    /// Stop pass-through
    Stop,

    /// Set gain for one EQ band, in dB
    SetGain { band: EqBand, gain_db: f32 },

    /// Set master gain (0.0 - 10.0)
    SetMasterGain(f32),

    /// Switch listen mode (restarts if running)
    SetListenMode(ListenMode),

    /// Request current state (triggers StateUpdate event)
    RequestState,
}

/// Parses one text line, e.g. `start`, `gain low -6`, `master 2.5`,
/// `mode conversation`, `status`
impl FromStr for Command {
    type Err = EngineError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = |msg: &str| EngineError::InvalidCommand(format!("{} ('{}')", msg, line.trim()));
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| invalid("empty command"))?;

        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "status" | "state" => Command::RequestState,
            "gain" | "eq" => {
                let band = words
                    .next()
                    .ok_or_else(|| invalid("missing band"))?
                    .parse::<EqBand>()
                    .map_err(|_| invalid("band must be low, mid, high or 0-2"))?;
                let gain_db = words
                    .next()
                    .ok_or_else(|| invalid("missing gain"))?
                    .parse::<f32>()
                    .map_err(|_| invalid("gain must be a number"))?;
                Command::SetGain { band, gain_db }
            }
            "master" | "volume" => {
                let gain = words
                    .next()
                    .ok_or_else(|| invalid("missing gain"))?
                    .parse::<f32>()
                    .map_err(|_| invalid("gain must be a number"))?;
                Command::SetMasterGain(gain)
            }
            "mode" => {
                let mode = words
                    .next()
                    .ok_or_else(|| invalid("missing mode"))?
                    .parse::<ListenMode>()
                    .map_err(|_| invalid("mode must be ambient or conversation"))?;
                Command::SetListenMode(mode)
            }
            _ => return Err(invalid("unknown command")),
        };

        if words.next().is_some() {
            return Err(invalid("unexpected trailing arguments"));
        }
        Ok(command)
    }
}

/// Events sent from the session controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Every session state transition
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// Pass-through is running
    Started {
        mode: ListenMode,
        format: StreamConfig,
    },

    /// Pass-through stopped
    Stopped,

    /// Error occurred
    Error { message: String },

    /// Headphones went away while running
    RouteLost,

    /// Output route changed
    RouteChanged { route: AudioRoute },

    /// Listen mode adopted
    ModeChanged { mode: ListenMode },

    /// EQ band gain stored (clamped value)
    GainChanged { band: usize, gain_db: f32 },

    /// Master gain stored (clamped value)
    MasterGainChanged { gain: f32 },

    /// Current state snapshot
    StateUpdate {
        state: SessionState,
        mode: ListenMode,
        eq_gains_db: [f32; NUM_EQ_BANDS],
        master_gain: f32,
        level: f32,
        spectrum: Vec<f32>,
    },
}

impl Event {
    /// Create an error event from any error type
    pub fn error<E: std::fmt::Display>(err: E) -> Self {
        Event::Error {
            message: err.to_string(),
        }
    }

    /// Snapshot event; `spectrum` is copied out of its fixed-size frame
    pub fn state_update(
        state: SessionState,
        mode: ListenMode,
        eq_gains_db: [f32; NUM_EQ_BANDS],
        master_gain: f32,
        level: f32,
        spectrum: [f32; NUM_BANDS],
    ) -> Self {
        Event::StateUpdate {
            state,
            mode,
            eq_gains_db,
            master_gain,
            level,
            spectrum: spectrum.to_vec(),
        }
    }
}
