//! Now-playing indicator
//!
//! Purely informational: tells the OS (or a log) that live listening is on.
//! Nothing here feeds back into the signal path.

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlayingInfo {
    pub title: String,
    pub subtitle: String,
}

impl Default for NowPlayingInfo {
    fn default() -> Self {
        Self {
            title: "EchoHeart".to_string(),
            subtitle: "Live listening".to_string(),
        }
    }
}

pub trait NowPlaying: Send + Sync {
    /// Called when the session reaches Running
    fn publish(&self, info: &NowPlayingInfo);

    /// Called when the session has stopped
    fn clear(&self);
}

/// Does nothing
#[derive(Debug, Default)]
pub struct NoopNowPlaying;

impl NowPlaying for NoopNowPlaying {
    fn publish(&self, _info: &NowPlayingInfo) {}

    fn clear(&self) {}
}

/// Writes the indicator to the log
#[derive(Debug, Default)]
pub struct LogNowPlaying;

impl NowPlaying for LogNowPlaying {
    fn publish(&self, info: &NowPlayingInfo) {
        info!("Now playing: {} - {}", info.title, info.subtitle);
    }

    fn clear(&self) {
        info!("Now playing cleared");
    }
}
