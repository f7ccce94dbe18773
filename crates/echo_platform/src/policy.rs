//! Session Policy
//!
//! The listen mode decides how the OS audio session may route capture and
//! playback. Both modes record and play at the same time; they differ in the
//! Bluetooth profile they allow and in where output falls back to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// User-selectable listening mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenMode {
    /// Music-quality output, Bluetooth A2DP allowed
    #[default]
    Ambient,
    /// Voice-chat processing, Bluetooth hands-free allowed, speaker fallback
    Conversation,
}

impl ListenMode {
    pub const ALL: [ListenMode; 2] = [ListenMode::Ambient, ListenMode::Conversation];

    /// Persisted string form
    pub fn as_str(self) -> &'static str {
        match self {
            ListenMode::Ambient => "ambient",
            ListenMode::Conversation => "conversation",
        }
    }

    /// Session policy this mode asks for
    pub fn policy(self) -> SessionPolicy {
        SessionPolicy::for_mode(self)
    }
}

impl fmt::Display for ListenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListenMode {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ambient" => Ok(ListenMode::Ambient),
            "conversation" => Ok(ListenMode::Conversation),
            other => Err(PlatformError::InvalidConfiguration(format!(
                "unknown listen mode '{}'",
                other
            ))),
        }
    }
}

/// Session category: capture and playback are always both active here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCategory {
    PlayAndRecord,
}

/// Signal processing mode requested from the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    Default,
    VoiceChat,
}

/// Bluetooth profile the session may route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BluetoothProfile {
    /// High-quality stereo output only
    A2dp,
    /// Hands-free profile (bidirectional, narrowband)
    HandsFree,
}

/// Routing policy applied to the audio session before the graph starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub category: SessionCategory,
    pub mode: SessionMode,
    pub bluetooth: BluetoothProfile,
    /// Route output to the built-in speaker when nothing else is connected
    pub default_to_speaker: bool,
}

impl SessionPolicy {
    pub fn for_mode(mode: ListenMode) -> Self {
        match mode {
            ListenMode::Ambient => Self {
                category: SessionCategory::PlayAndRecord,
                mode: SessionMode::Default,
                bluetooth: BluetoothProfile::A2dp,
                default_to_speaker: false,
            },
            ListenMode::Conversation => Self {
                category: SessionCategory::PlayAndRecord,
                mode: SessionMode::VoiceChat,
                bluetooth: BluetoothProfile::HandsFree,
                default_to_speaker: true,
            },
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::for_mode(ListenMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip_through_str() {
        for mode in ListenMode::ALL {
            assert_eq!(mode.as_str().parse::<ListenMode>().unwrap(), mode);
        }
        assert_eq!(" Conversation ".parse::<ListenMode>().unwrap(), ListenMode::Conversation);
        assert!("party".parse::<ListenMode>().is_err());
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        let json = serde_json::to_string(&ListenMode::Conversation).unwrap();
        assert_eq!(json, "\"conversation\"");
        let mode: ListenMode = serde_json::from_str("\"ambient\"").unwrap();
        assert_eq!(mode, ListenMode::Ambient);
    }

    #[test]
    fn test_ambient_policy() {
        let policy = ListenMode::Ambient.policy();
        assert_eq!(policy.category, SessionCategory::PlayAndRecord);
        assert_eq!(policy.mode, SessionMode::Default);
        assert_eq!(policy.bluetooth, BluetoothProfile::A2dp);
        assert!(!policy.default_to_speaker);
        assert_eq!(SessionPolicy::default(), policy);
    }

    #[test]
    fn test_conversation_policy() {
        let policy = ListenMode::Conversation.policy();
        assert_eq!(policy.mode, SessionMode::VoiceChat);
        assert_eq!(policy.bluetooth, BluetoothProfile::HandsFree);
        assert!(policy.default_to_speaker);
    }
}
