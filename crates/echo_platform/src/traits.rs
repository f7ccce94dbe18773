//! Audio Session Traits
//!
//! Defines the interface the engine uses to talk to the OS audio session:
//! applying a routing policy, activating the session and following the
//! output route.

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::policy::SessionPolicy;
use crate::route::AudioRoute;

/// Why the route changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteChangeReason {
    /// An output appeared (e.g. headphones plugged in)
    NewDeviceAvailable,
    /// An output went away (e.g. headphones unplugged)
    OldDeviceUnavailable,
    /// Something else changed the route (policy, override)
    Other,
}

/// Notification that the output route is different from before
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteChange {
    pub previous: AudioRoute,
    pub current: AudioRoute,
    pub reason: RouteChangeReason,
}

impl RouteChange {
    /// Build a change, inferring the reason from the two routes
    pub fn between(previous: AudioRoute, current: AudioRoute) -> Self {
        let reason = if current.outputs.len() > previous.outputs.len()
            || (current.has_headphones() && !previous.has_headphones())
        {
            RouteChangeReason::NewDeviceAvailable
        } else if current.outputs.len() < previous.outputs.len()
            || (previous.has_headphones() && !current.has_headphones())
        {
            RouteChangeReason::OldDeviceUnavailable
        } else {
            RouteChangeReason::Other
        };
        Self {
            previous,
            current,
            reason,
        }
    }

    /// True when headphones were present before and are gone now
    pub fn lost_headphones(&self) -> bool {
        self.previous.has_headphones() && !self.current.has_headphones()
    }
}

/// OS audio session
///
/// Implementations are owned by the session controller and only called from
/// its worker, never from the real-time callback.
pub trait AudioSession: Send {
    /// Name of this session backend (e.g. "cpal", "stub")
    fn name(&self) -> &'static str;

    /// Apply the routing policy; takes effect on the next activation
    fn configure(&mut self, policy: &SessionPolicy) -> Result<(), PlatformError>;

    /// Activate or deactivate the session
    fn set_active(&mut self, active: bool) -> Result<(), PlatformError>;

    /// Whether the session is currently active
    fn is_active(&self) -> bool;

    /// Outputs the session currently plays to
    fn current_route(&self) -> AudioRoute;

    /// Subscribe to route changes
    ///
    /// Each call returns a new receiver; every subscriber sees every change.
    fn route_changes(&self) -> Receiver<RouteChange>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::PortType;

    #[test]
    fn test_route_change_reason() {
        let speaker = AudioRoute::single("Speaker", PortType::BuiltInSpeaker);
        let phones = AudioRoute::single("Headphones", PortType::Headphones);

        let plugged = RouteChange::between(speaker.clone(), phones.clone());
        assert_eq!(plugged.reason, RouteChangeReason::NewDeviceAvailable);
        assert!(!plugged.lost_headphones());

        let unplugged = RouteChange::between(phones, speaker.clone());
        assert_eq!(unplugged.reason, RouteChangeReason::OldDeviceUnavailable);
        assert!(unplugged.lost_headphones());

        let same = RouteChange::between(speaker.clone(), speaker);
        assert_eq!(same.reason, RouteChangeReason::Other);
    }

    #[test]
    fn test_route_change_serialization() {
        let change = RouteChange::between(
            AudioRoute::empty(),
            AudioRoute::single("Buds", PortType::BluetoothA2dp),
        );
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("Buds"));
        let back: RouteChange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, change);
    }
}
