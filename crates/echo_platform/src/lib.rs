//! EchoHeart Platform - Audio Session and Route Environment
//!
//! This crate provides the OS-facing side of the pass-through engine:
//! - Listen modes and the session policy each one asks for
//! - Output route description and headphone-class detection
//! - The `AudioSession` trait the engine drives
//!
//! # Backends
//!
//! | Backend        | Policy           | Route source                    |
//! |----------------|------------------|---------------------------------|
//! | `CpalSession`  | Logged only      | Default output device, polled   |
//! | `StubSession`  | Recorded         | Set by the caller               |

mod cpal_session;
mod error;
mod policy;
mod route;
mod stub;
mod traits;

use std::time::Duration;

pub use cpal_session::{default_output_route, CpalSession};
pub use error::PlatformError;
pub use policy::{BluetoothProfile, ListenMode, SessionCategory, SessionMode, SessionPolicy};
pub use route::{classify_device_name, AudioRoute, PortType, RoutePort};
pub use stub::StubSession;
pub use traits::{AudioSession, RouteChange, RouteChangeReason};

/// Get the audio session for the current OS
///
/// `poll` is how often the default output device is checked for changes.
pub fn get_session(poll: Duration) -> Result<Box<dyn AudioSession>, PlatformError> {
    #[cfg(any(target_os = "linux", target_os = "windows", target_os = "macos"))]
    {
        Ok(Box::new(CpalSession::new(poll)?))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        let _ = poll;
        Err(PlatformError::UnsupportedPlatform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_session_is_object_safe() {
        let session: Box<dyn AudioSession> = Box::new(StubSession::with_headphones());
        assert_eq!(session.name(), "stub");
        assert!(session.current_route().has_headphones());
    }
}
