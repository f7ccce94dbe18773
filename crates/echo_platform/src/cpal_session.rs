//! Desktop audio session backed by cpal
//!
//! Desktop hosts have no session category or Bluetooth profile switch, so
//! the policy is recorded and logged only. The route is the default output
//! device, classified by its name. A watcher thread polls the default device
//! and fans out a [`RouteChange`] whenever it changes.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::PlatformError;
use crate::policy::SessionPolicy;
use crate::route::{AudioRoute, RoutePort};
use crate::traits::{AudioSession, RouteChange};

type Subscribers = Arc<Mutex<Vec<Sender<RouteChange>>>>;

/// Default output device as a route (empty when there is none)
pub fn default_output_route() -> AudioRoute {
    let host = cpal::default_host();
    match host.default_output_device() {
        Some(device) => match device.name() {
            Ok(name) => AudioRoute::new(vec![RoutePort::from_device_name(name)]),
            Err(e) => {
                warn!("Failed to read default output device name: {}", e);
                AudioRoute::new(vec![RoutePort::from_device_name("unknown")])
            }
        },
        None => AudioRoute::empty(),
    }
}

pub struct CpalSession {
    policy: Option<SessionPolicy>,
    active: bool,
    subscribers: Subscribers,
    shutdown_tx: Option<Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl CpalSession {
    /// Create the session and start watching the default output every `poll`
    pub fn new(poll: Duration) -> Result<Self, PlatformError> {
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let watcher_subscribers = Arc::clone(&subscribers);
        let watcher = thread::Builder::new()
            .name("echo-route-poll".into())
            .spawn(move || watch_default_output(poll, shutdown_rx, watcher_subscribers))
            .map_err(|e| PlatformError::WatcherFailed(e.to_string()))?;

        Ok(Self {
            policy: None,
            active: false,
            subscribers,
            shutdown_tx: Some(shutdown_tx),
            watcher: Some(watcher),
        })
    }

    /// Policy applied by the last `configure`
    pub fn policy(&self) -> Option<SessionPolicy> {
        self.policy
    }
}

fn watch_default_output(poll: Duration, shutdown: Receiver<()>, subscribers: Subscribers) {
    let mut last = default_output_route();
    debug!("Route watcher started on {:?}", last.primary_name());

    loop {
        match shutdown.recv_timeout(poll) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let current = default_output_route();
        if current == last {
            continue;
        }

        info!(
            "Default output changed: {:?} -> {:?}",
            last.primary_name(),
            current.primary_name()
        );
        let change = RouteChange::between(last, current.clone());
        // Drop subscribers whose receiver is gone
        subscribers
            .lock()
            .retain(|tx| tx.send(change.clone()).is_ok());
        last = current;
    }

    debug!("Route watcher stopped");
}

impl AudioSession for CpalSession {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn configure(&mut self, policy: &SessionPolicy) -> Result<(), PlatformError> {
        info!(
            "Session policy: {:?}/{:?}, bluetooth {:?}, speaker fallback {}",
            policy.category, policy.mode, policy.bluetooth, policy.default_to_speaker
        );
        self.policy = Some(*policy);
        Ok(())
    }

    fn set_active(&mut self, active: bool) -> Result<(), PlatformError> {
        if active && cpal::default_host().default_output_device().is_none() {
            return Err(PlatformError::NoOutputDevice);
        }
        if self.active != active {
            debug!("Session {}", if active { "activated" } else { "deactivated" });
        }
        self.active = active;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn current_route(&self) -> AudioRoute {
        default_output_route()
    }

    fn route_changes(&self) -> Receiver<RouteChange> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        // Dropping the sender wakes the watcher
        self.shutdown_tx.take();
        if let Some(handle) = self.watcher.take() {
            let _ = handle.join();
        }
    }
}
