//! Session controller integration tests
//!
//! The driver here holds the processing chain instead of opening devices,
//! and the stub session stands in for the OS, so every lifecycle path can
//! run without audio hardware.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use echo_core::{
    AudioDriver, Collaborators, EngineConfig, EngineError, EngineResult, Event, MemorySettings,
    ModeChange, NoopNowPlaying, SessionController, SessionState, SettingsPort, StreamConfig,
    KEY_LISTEN_MODE, KEY_LOW_GAIN, KEY_MASTER_GAIN,
};
use echo_dsp::{EqBand, ProcessorChain};
use echo_platform::{AudioRoute, AudioSession, ListenMode, PortType, SessionPolicy, StubSession};
use parking_lot::Mutex;

#[derive(Default)]
struct DriverState {
    chain: Option<ProcessorChain>,
    starts: usize,
    entered: bool,
    fail_start: bool,
    gate: Option<Receiver<()>>,
    policies_at_start: Vec<Option<SessionPolicy>>,
}

/// Driver double; clones share state
#[derive(Clone)]
struct FakeDriver {
    state: Arc<Mutex<DriverState>>,
    session: StubSession,
}

impl FakeDriver {
    fn new(session: &StubSession) -> Self {
        Self {
            state: Arc::new(Mutex::new(DriverState::default())),
            session: session.clone(),
        }
    }

    /// Make the next start block until the returned sender fires
    fn hold_next_start(&self) -> Sender<()> {
        let (tx, rx) = bounded(1);
        self.state.lock().gate = Some(rx);
        tx
    }

    fn fail_start(&self) {
        self.state.lock().fail_start = true;
    }

    fn starts(&self) -> usize {
        self.state.lock().starts
    }

    fn entered(&self) -> bool {
        self.state.lock().entered
    }

    fn policies_at_start(&self) -> Vec<Option<SessionPolicy>> {
        self.state.lock().policies_at_start.clone()
    }

    /// Run one buffer through the chain, as a capture callback would
    fn pump(&self, buffer: &mut [f32]) {
        if let Some(chain) = self.state.lock().chain.as_mut() {
            chain.process(buffer);
        }
    }
}

impl AudioDriver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn capture_format(&mut self) -> EngineResult<StreamConfig> {
        Ok(StreamConfig {
            sample_rate: 48000,
            channels: 1,
            buffer_size: 256,
        })
    }

    fn start(&mut self, _config: &StreamConfig, chain: ProcessorChain) -> EngineResult<()> {
        let gate = {
            let mut state = self.state.lock();
            state.starts += 1;
            state.entered = true;
            state.policies_at_start.push(self.session.last_policy());
            state.gate.take()
        };
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        }

        let mut state = self.state.lock();
        if state.fail_start {
            return Err(EngineError::StreamPlayError("device busy".into()));
        }
        state.chain = Some(chain);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().chain.take();
    }

    fn is_running(&self) -> bool {
        self.state.lock().chain.is_some()
    }
}

struct Harness {
    controller: SessionController,
    session: StubSession,
    driver: FakeDriver,
    settings: Arc<MemorySettings>,
    events: Receiver<Event>,
}

fn harness_with(session: StubSession, settings: Arc<MemorySettings>) -> Harness {
    let driver = FakeDriver::new(&session);
    let controller = SessionController::new(
        EngineConfig::default(),
        Collaborators {
            driver: Box::new(driver.clone()),
            session: Box::new(session.clone()),
            settings: settings.clone(),
            now_playing: Arc::new(NoopNowPlaying),
        },
    )
    .unwrap();
    let events = controller.events();
    Harness {
        controller,
        session,
        driver,
        settings,
        events,
    }
}

fn harness(session: StubSession) -> Harness {
    harness_with(session, Arc::new(MemorySettings::new()))
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn drain(events: &Receiver<Event>) -> Vec<Event> {
    events.try_iter().collect()
}

fn transitions(events: &[Event]) -> Vec<(SessionState, SessionState)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

use SessionState::{Idle, Running, Starting, Stopping};

#[test]
fn test_start_without_headphones_is_refused() {
    let h = harness(StubSession::with_speaker());
    let policies_before = h.session.policies().len();

    let err = h.controller.start().unwrap().wait().unwrap_err();

    assert!(matches!(err, EngineError::HeadphonesRequired));
    assert_eq!(h.controller.state(), Idle);
    assert_eq!(h.session.activations(), 0);
    assert_eq!(h.session.policies().len(), policies_before);
    assert_eq!(h.driver.starts(), 0);

    let events = drain(&h.events);
    assert_eq!(transitions(&events), vec![(Idle, Starting), (Starting, Idle)]);
    assert!(events.iter().any(|e| matches!(e, Event::Error { .. })));
}

#[test]
fn test_start_reaches_running_and_stop_returns_idle() {
    let h = harness(StubSession::with_headphones());

    let started = h.controller.start().unwrap().wait().unwrap();
    assert_eq!(started.mode, ListenMode::Ambient);
    assert_eq!(started.format.sample_rate, 48000);
    assert_eq!(h.controller.state(), Running);
    assert!(h.session.is_active());
    assert_eq!(h.driver.starts(), 1);

    // Tone through the running chain shows up on the meter and spectrum
    let mut buffer: Vec<f32> = (0..1024)
        .map(|i| (2.0 * std::f32::consts::PI * 5000.0 * i as f32 / 48000.0).sin() * 0.5)
        .collect();
    h.driver.pump(&mut buffer);
    assert!(wait_until(|| h.controller.level() > 0.0));
    assert!(h.controller.spectrum().iter().any(|&b| b > 0.0));

    h.controller.stop();
    assert_eq!(h.controller.state(), Idle);
    assert_eq!(h.controller.level(), 0.0);
    assert!(!h.session.is_active());
    assert!(!h.driver.is_running());

    let events = drain(&h.events);
    assert_eq!(
        transitions(&events),
        vec![(Idle, Starting), (Starting, Running), (Running, Stopping), (Stopping, Idle)]
    );
    assert!(events.iter().any(|e| matches!(e, Event::Started { .. })));
    assert!(events.iter().any(|e| matches!(e, Event::Stopped)));

    // Idempotent
    h.controller.stop();
    assert!(drain(&h.events).is_empty());
}

#[test]
fn test_start_while_running_is_rejected() {
    let h = harness(StubSession::with_headphones());
    h.controller.start().unwrap().wait().unwrap();
    assert!(matches!(h.controller.start(), Err(EngineError::AlreadyRunning)));
    assert_eq!(h.controller.state(), Running);
}

#[test]
fn test_mode_change_while_running_restarts_with_new_policy() {
    let h = harness(StubSession::with_headphones());
    h.controller.start().unwrap().wait().unwrap();
    drain(&h.events);

    let handle = match h.controller.set_listen_mode(ListenMode::Conversation).unwrap() {
        ModeChange::Restarting(handle) => handle,
        other => panic!("expected restart, got {:?}", other),
    };
    let started = handle.wait().unwrap();

    assert_eq!(started.mode, ListenMode::Conversation);
    assert_eq!(h.controller.state(), Running);
    assert_eq!(h.controller.listen_mode(), ListenMode::Conversation);
    assert_eq!(h.driver.starts(), 2);

    // Policy was applied before the driver was started again
    let policies = h.driver.policies_at_start();
    assert_eq!(policies[0], Some(ListenMode::Ambient.policy()));
    assert_eq!(policies[1], Some(ListenMode::Conversation.policy()));

    let events = drain(&h.events);
    assert_eq!(
        transitions(&events),
        vec![(Running, Stopping), (Stopping, Starting), (Starting, Running)]
    );
    assert!(events.contains(&Event::ModeChanged {
        mode: ListenMode::Conversation
    }));
    assert_eq!(
        h.settings.get_str(KEY_LISTEN_MODE, ""),
        ListenMode::Conversation.as_str()
    );
}

#[test]
fn test_ignored_mode_change_still_restarts() {
    let h = harness(StubSession::with_headphones());
    h.controller.start().unwrap().wait().unwrap();
    drain(&h.events);

    let _ = h.controller.set_listen_mode(ListenMode::Conversation).unwrap();

    assert!(wait_until(|| h.driver.starts() == 2 && h.controller.state() == Running));
    assert_eq!(h.controller.listen_mode(), ListenMode::Conversation);
    assert!(h.session.is_active());
    assert!(wait_until(|| transitions(&drain(&h.events))
        .contains(&(Starting, Running))));
}

#[test]
fn test_failed_restart_returns_to_idle() {
    let h = harness(StubSession::with_headphones());
    h.controller.start().unwrap().wait().unwrap();
    h.driver.fail_start();
    drain(&h.events);

    let handle = match h.controller.set_listen_mode(ListenMode::Conversation).unwrap() {
        ModeChange::Restarting(handle) => handle,
        other => panic!("expected restart, got {:?}", other),
    };
    let err = handle.wait().unwrap_err();

    assert!(matches!(err, EngineError::EngineStart(_)));
    assert_eq!(h.controller.state(), Idle);
    assert!(!h.session.is_active());
    assert_eq!(h.driver.starts(), 2);

    let events = drain(&h.events);
    assert_eq!(
        transitions(&events),
        vec![(Running, Stopping), (Stopping, Starting), (Starting, Idle)]
    );
    assert!(events.iter().any(|e| matches!(e, Event::Error { .. })));
}

#[test]
fn test_same_mode_while_running_is_a_no_op() {
    let h = harness(StubSession::with_headphones());
    h.controller.start().unwrap().wait().unwrap();

    assert!(matches!(
        h.controller.set_listen_mode(ListenMode::Ambient).unwrap(),
        ModeChange::Applied
    ));
    assert_eq!(h.driver.starts(), 1);
}

#[test]
fn test_mode_change_while_idle_applies_policy() {
    let h = harness(StubSession::with_headphones());

    assert!(matches!(
        h.controller.set_listen_mode(ListenMode::Conversation).unwrap(),
        ModeChange::Applied
    ));
    assert_eq!(h.controller.state(), Idle);
    assert_eq!(h.session.last_policy(), Some(ListenMode::Conversation.policy()));
    assert_eq!(h.driver.starts(), 0);
}

#[test]
fn test_route_loss_stops_running_session() {
    let h = harness(StubSession::with_headphones());
    h.controller.start().unwrap().wait().unwrap();
    drain(&h.events);

    h.session
        .set_route(AudioRoute::single("Speaker", PortType::BuiltInSpeaker));

    assert!(wait_until(|| h.controller.state() == Idle));
    assert_eq!(h.controller.level(), 0.0);
    assert!(!h.driver.is_running());
    assert!(!h.session.is_active());

    assert!(wait_until(|| {
        let events: Vec<Event> = h.events.try_iter().collect();
        events.iter().any(|e| matches!(e, Event::RouteLost))
    }));
}

#[test]
fn test_route_to_other_headphones_keeps_running() {
    let h = harness(StubSession::with_headphones());
    h.controller.start().unwrap().wait().unwrap();

    h.session
        .set_route(AudioRoute::single("AirPods", PortType::BluetoothA2dp));

    assert!(wait_until(|| h.controller.route().primary_name() == Some("AirPods")));
    assert_eq!(h.controller.state(), Running);
}

#[test]
fn test_stop_during_start_cancels() {
    let h = harness(StubSession::with_headphones());
    let release = h.driver.hold_next_start();

    let handle = h.controller.start().unwrap();
    assert!(wait_until(|| h.driver.entered()));
    assert_eq!(h.controller.state(), Starting);

    h.controller.stop();
    release.send(()).unwrap();

    let err = handle.wait().unwrap_err();
    assert!(matches!(err, EngineError::StartCancelled));
    assert_eq!(h.controller.state(), Idle);
    assert!(!h.driver.is_running());
    assert!(!h.session.is_active());
}

#[test]
fn test_dropped_handle_cancels_start() {
    let h = harness(StubSession::with_headphones());
    let release = h.driver.hold_next_start();

    let handle = h.controller.start().unwrap();
    assert!(wait_until(|| h.driver.entered()));
    drop(handle);
    release.send(()).unwrap();

    assert!(wait_until(|| h.controller.state() == Idle));
    assert!(!h.driver.is_running());
}

#[test]
fn test_mode_change_during_start_is_queued() {
    let h = harness(StubSession::with_headphones());
    let release = h.driver.hold_next_start();

    let handle = h.controller.start().unwrap();
    assert!(wait_until(|| h.driver.entered()));

    assert!(matches!(
        h.controller.set_listen_mode(ListenMode::Conversation).unwrap(),
        ModeChange::Queued
    ));
    release.send(()).unwrap();

    let started = handle.wait().unwrap();
    assert_eq!(started.mode, ListenMode::Ambient);

    // Queued mode is applied as a restart once Running
    assert!(wait_until(|| h.driver.starts() == 2 && h.controller.state() == Running));
    assert_eq!(h.controller.listen_mode(), ListenMode::Conversation);
    assert_eq!(
        h.driver.policies_at_start()[1],
        Some(ListenMode::Conversation.policy())
    );
}

#[test]
fn test_driver_failure_returns_to_idle() {
    let h = harness(StubSession::with_headphones());
    h.driver.fail_start();

    let err = h.controller.start().unwrap().wait().unwrap_err();

    assert!(matches!(err, EngineError::EngineStart(_)));
    assert_eq!(h.controller.state(), Idle);
    assert_eq!(h.session.activations(), 1);
    assert!(!h.session.is_active());

    // A later start is allowed
    assert!(h.controller.start().is_ok());
}

#[test]
fn test_session_config_failure_returns_to_idle() {
    let h = harness(StubSession::with_headphones());
    h.session.fail_configure(true);

    let err = h.controller.start().unwrap().wait().unwrap_err();

    assert!(matches!(err, EngineError::SessionConfig(_)));
    assert_eq!(h.controller.state(), Idle);
    assert_eq!(h.session.activations(), 0);
    assert_eq!(h.driver.starts(), 0);
}

#[test]
fn test_gains_are_clamped_and_persisted() {
    let settings = Arc::new(MemorySettings::new());
    {
        let h = harness_with(StubSession::with_headphones(), Arc::clone(&settings));
        assert_eq!(h.controller.set_gain(EqBand::Low, 30.0).unwrap(), 24.0);
        assert_eq!(h.controller.set_master_gain(12.0).unwrap(), 10.0);
        assert_eq!(h.controller.eq_gains(), [24.0, 0.0, 0.0]);

        let events = drain(&h.events);
        assert!(events.contains(&Event::GainChanged {
            band: 0,
            gain_db: 24.0
        }));
        assert!(events.contains(&Event::MasterGainChanged { gain: 10.0 }));
    }

    assert_eq!(settings.get_f32(KEY_LOW_GAIN, 0.0), 24.0);
    assert_eq!(settings.get_f32(KEY_MASTER_GAIN, 1.0), 10.0);

    // A new controller starts from the stored values
    let h = harness_with(StubSession::with_headphones(), settings);
    assert_eq!(h.controller.eq_gains(), [24.0, 0.0, 0.0]);
    assert_eq!(h.controller.master_gain(), 10.0);
}

#[test]
fn test_request_state_emits_snapshot() {
    let h = harness(StubSession::with_headphones());
    h.controller.dispatch("status".parse().unwrap()).unwrap();

    let events = drain(&h.events);
    match events.last() {
        Some(Event::StateUpdate {
            state,
            mode,
            spectrum,
            ..
        }) => {
            assert_eq!(*state, Idle);
            assert_eq!(*mode, ListenMode::Ambient);
            assert_eq!(spectrum.len(), echo_core::NUM_BANDS);
        }
        other => panic!("expected StateUpdate, got {:?}", other),
    }
}

#[test]
fn test_dispatch_start_runs_in_background() {
    let h = harness(StubSession::with_headphones());
    h.controller.dispatch("start".parse().unwrap()).unwrap();
    assert!(wait_until(|| h.controller.state() == Running));

    h.controller.dispatch("stop".parse().unwrap()).unwrap();
    assert_eq!(h.controller.state(), Idle);
}
