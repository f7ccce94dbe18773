//! Scriptable session for tests and headless runs
//!
//! Clones share state, so a test can keep one handle while the controller
//! owns another, then change the route or inject failures from outside.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::PlatformError;
use crate::policy::SessionPolicy;
use crate::route::{AudioRoute, PortType};
use crate::traits::{AudioSession, RouteChange};

#[derive(Default)]
struct StubState {
    route: AudioRoute,
    active: bool,
    policies: Vec<SessionPolicy>,
    activations: usize,
    fail_configure: bool,
    fail_activate: bool,
    subscribers: Vec<Sender<RouteChange>>,
}

#[derive(Clone, Default)]
pub struct StubSession {
    state: Arc<Mutex<StubState>>,
}

impl StubSession {
    pub fn new(route: AudioRoute) -> Self {
        let session = Self::default();
        session.state.lock().route = route;
        session
    }

    /// Session whose route is a pair of wired headphones
    pub fn with_headphones() -> Self {
        Self::new(AudioRoute::single("Headphones", PortType::Headphones))
    }

    /// Session whose route is the built-in speaker
    pub fn with_speaker() -> Self {
        Self::new(AudioRoute::single("Speaker", PortType::BuiltInSpeaker))
    }

    /// Replace the route and notify subscribers
    pub fn set_route(&self, route: AudioRoute) {
        let mut state = self.state.lock();
        let change = RouteChange::between(state.route.clone(), route.clone());
        state.route = route;
        state.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn fail_configure(&self, fail: bool) {
        self.state.lock().fail_configure = fail;
    }

    pub fn fail_activate(&self, fail: bool) {
        self.state.lock().fail_activate = fail;
    }

    /// Every policy applied so far, oldest first
    pub fn policies(&self) -> Vec<SessionPolicy> {
        self.state.lock().policies.clone()
    }

    pub fn last_policy(&self) -> Option<SessionPolicy> {
        self.state.lock().policies.last().copied()
    }

    /// Number of successful activations
    pub fn activations(&self) -> usize {
        self.state.lock().activations
    }
}

impl AudioSession for StubSession {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn configure(&mut self, policy: &SessionPolicy) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if state.fail_configure {
            return Err(PlatformError::PolicyRejected("stub configured to fail".into()));
        }
        debug!("Stub session policy: {:?}", policy);
        state.policies.push(*policy);
        Ok(())
    }

    fn set_active(&mut self, active: bool) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if active {
            if state.fail_activate {
                return Err(PlatformError::ActivationFailed("stub configured to fail".into()));
            }
            state.activations += 1;
        }
        state.active = active;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.lock().active
    }

    fn current_route(&self) -> AudioRoute {
        self.state.lock().route.clone()
    }

    fn route_changes(&self) -> Receiver<RouteChange> {
        let (tx, rx) = unbounded();
        self.state.lock().subscribers.push(tx);
        rx
    }
}
