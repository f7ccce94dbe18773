//! Session Controller
//!
//! The state machine around the audio graph:
//!
//! ```text
//!            start()                 graph started
//!   Idle ─────────────▶ Starting ─────────────────────▶ Running
//!    ▲                     │ failure / cancel              │ stop() / route lost
//!    │◀────────────────────┘                               ▼
//!    └────────────────────────────────────────────── Stopping
//!
//!   Running ──set_listen_mode──▶ Stopping ──▶ Starting ──▶ Running (or Idle)
//! ```
//!
//! # Threads
//!
//! - Hardware negotiation runs on an `echo-session` worker per start/restart,
//!   so callers never block on the driver.
//! - `echo-route` follows the session's route changes.
//! - `echo-level` (see [`LevelSampler`]) republishes the level at 30 Hz.
//!
//! # Locking
//!
//! Two locks, always taken in this order: `hw` (graph and OS session, held
//! for the length of a start or stop) then `machine` (state, mode, route;
//! never held across a blocking call). Every transition happens under
//! `machine`, and a stop holds both from Stopping to Idle so no caller ever
//! observes Stopping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use echo_dsp::{EqBand, NUM_BANDS, NUM_EQ_BANDS};
use echo_platform::{AudioRoute, AudioSession, ListenMode, RouteChange};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, StreamConfig};
use crate::error::{EngineError, EngineResult};
use crate::graph::{AudioGraph, GraphShared};
use crate::message::{Command, Event};
use crate::now_playing::NowPlaying;
use crate::sampler::LevelSampler;
use crate::settings::{band_key, EchoSettings, SettingsPort, KEY_LISTEN_MODE, KEY_MASTER_GAIN};
use crate::stream::AudioDriver;

/// Lifecycle state of the pass-through session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Successful start
#[derive(Debug, Clone, PartialEq)]
pub struct Started {
    pub mode: ListenMode,
    pub format: StreamConfig,
    pub route: AudioRoute,
}

/// Outcome of `set_listen_mode`
#[derive(Debug)]
#[must_use = "a restart reports its outcome through the handle"]
pub enum ModeChange {
    /// Adopted right away (Idle, or already the current mode)
    Applied,
    /// Held until the pending start finishes
    Queued,
    /// Running session is restarting in the new mode
    Restarting(StartHandle),
}

/// Injected collaborators
pub struct Collaborators {
    pub driver: Box<dyn AudioDriver>,
    pub session: Box<dyn AudioSession>,
    pub settings: Arc<dyn SettingsPort>,
    pub now_playing: Arc<dyn NowPlaying>,
}

/// Pending start or restart
///
/// Dropping a handle from `start` before it finishes cancels the start,
/// unless it was detached. Restart handles from `set_listen_mode` are
/// detached from the outset so an ignored mode change still ends Running;
/// call `cancel` to abandon one.
#[derive(Debug)]
#[must_use = "dropping a start handle cancels the start; call detach() to let it finish"]
pub struct StartHandle {
    result_rx: Receiver<EngineResult<Started>>,
    cancel: Arc<AtomicBool>,
    finished: bool,
    detached: bool,
}

impl StartHandle {
    /// Block until the start finishes
    pub fn wait(mut self) -> EngineResult<Started> {
        self.finished = true;
        self.result_rx
            .recv()
            .unwrap_or_else(|_| Err(EngineError::EngineStart("session worker exited".into())))
    }

    /// Wait at most `timeout`; `None` while the start is still pending
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<EngineResult<Started>> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(result) => {
                self.finished = true;
                Some(result)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                Some(Err(EngineError::EngineStart("session worker exited".into())))
            }
        }
    }

    /// Ask the worker to abandon the start; it converges to Idle
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Let the start run to completion without anyone waiting
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for StartHandle {
    fn drop(&mut self) {
        if !self.finished && !self.detached {
            self.cancel();
        }
    }
}

enum Job {
    Start,
    Restart(ListenMode),
}

enum StopReason {
    Requested,
    RouteLost,
    Shutdown,
}

struct Hardware {
    graph: AudioGraph,
    session: Box<dyn AudioSession>,
}

struct Machine {
    state: SessionState,
    mode: ListenMode,
    pending_mode: Option<ListenMode>,
    route: AudioRoute,
    cancel: Option<Arc<AtomicBool>>,
}

struct Inner {
    config: EngineConfig,
    hw: Mutex<Hardware>,
    machine: Mutex<Machine>,
    shared: GraphShared,
    sampler: LevelSampler,
    settings: Arc<dyn SettingsPort>,
    now_playing: Arc<dyn NowPlaying>,
    event_tx: Sender<Event>,
}

/// Drives start/stop, headphone gating, route loss and listen-mode switches
///
/// Construct one at the composition root and pass it by reference.
pub struct SessionController {
    inner: Arc<Inner>,
    event_rx: Receiver<Event>,
    route_shutdown: Option<Sender<()>>,
    route_thread: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> EngineResult<Self> {
        config.validate()?;

        let Collaborators {
            driver,
            mut session,
            settings,
            now_playing,
        } = collaborators;

        let saved = EchoSettings::load(settings.as_ref());
        info!(
            "Loaded settings: eq {:?} dB, master {}, mode {}",
            saved.eq_gains_db, saved.master_gain, saved.listen_mode
        );

        let shared = GraphShared::new(saved.eq_gains_db, saved.master_gain);
        let graph = AudioGraph::new(driver, shared.clone(), config.tap_frame_size);
        let sampler = LevelSampler::spawn(Arc::clone(&shared.level), config.level_interval())?;

        // Policy is applied up front so the OS routes correctly before the first start
        if let Err(e) = session.configure(&saved.listen_mode.policy()) {
            warn!("Initial session policy rejected: {}", e);
        }
        let route_rx = session.route_changes();
        let route = session.current_route();
        info!(
            "Audio session '{}' on {:?} (headphones: {})",
            session.name(),
            route.primary_name(),
            route.has_headphones()
        );

        let (event_tx, event_rx) = unbounded();
        let inner = Arc::new(Inner {
            config,
            hw: Mutex::new(Hardware { graph, session }),
            machine: Mutex::new(Machine {
                state: SessionState::Idle,
                mode: saved.listen_mode,
                pending_mode: None,
                route,
                cancel: None,
            }),
            shared,
            sampler,
            settings,
            now_playing,
            event_tx,
        });

        let (route_shutdown, shutdown_rx) = bounded::<()>(1);
        let route_inner = Arc::clone(&inner);
        let route_thread = thread::Builder::new()
            .name("echo-route".into())
            .spawn(move || route_inner.watch_routes(route_rx, shutdown_rx))
            .map_err(|e| EngineError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            inner,
            event_rx,
            route_shutdown: Some(route_shutdown),
            route_thread: Some(route_thread),
        })
    }

    /// Begin Idle -> Starting; the hardware work runs on a worker
    pub fn start(&self) -> EngineResult<StartHandle> {
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut m = self.inner.machine.lock();
            if m.state != SessionState::Idle {
                return Err(EngineError::AlreadyRunning);
            }
            m.cancel = Some(Arc::clone(&cancel));
            self.inner.transition(&mut m, SessionState::Starting);
        }
        self.spawn_worker(Job::Start, cancel, true)
    }

    /// Stop pass-through; cancels a pending start. Idempotent.
    pub fn stop(&self) {
        self.inner.stop(StopReason::Requested);
    }

    /// Switch listen mode
    ///
    /// Idle reconfigures the session at once, Running restarts in place,
    /// Starting queues the request (last one wins).
    pub fn set_listen_mode(&self, mode: ListenMode) -> EngineResult<ModeChange> {
        {
            let mut m = self.inner.machine.lock();
            match m.state {
                SessionState::Starting => {
                    info!("Listen mode {} queued until start completes", mode);
                    m.pending_mode = Some(mode);
                    return Ok(ModeChange::Queued);
                }
                SessionState::Running => {
                    if m.mode == mode {
                        return Ok(ModeChange::Applied);
                    }
                    drop(m);
                    let cancel = Arc::new(AtomicBool::new(false));
                    let handle = self.spawn_worker(Job::Restart(mode), cancel, false)?;
                    return Ok(ModeChange::Restarting(handle));
                }
                SessionState::Idle | SessionState::Stopping => {}
            }
        }

        let mut hw = self.inner.hw.lock();
        let mut m = self.inner.machine.lock();
        if m.state != SessionState::Idle {
            // A start slipped in between the two locks
            drop(m);
            drop(hw);
            return self.set_listen_mode(mode);
        }
        self.inner.adopt_mode_idle(&mut hw, &mut m, mode)?;
        Ok(ModeChange::Applied)
    }

    /// Set one band's gain (clamped), apply it live and persist it
    pub fn set_gain(&self, band: EqBand, gain_db: f32) -> EngineResult<f32> {
        let stored = self.inner.shared.gains.set(band, gain_db);
        debug!("EQ {} = {} dB", band.name(), stored);
        self.inner.emit(Event::GainChanged {
            band: band.index(),
            gain_db: stored,
        });
        self.inner.settings.set(band_key(band), Value::from(stored))?;
        Ok(stored)
    }

    /// Set master gain (clamped to 0 - 10), apply it live and persist it
    pub fn set_master_gain(&self, gain: f32) -> EngineResult<f32> {
        let stored = self.inner.shared.master.set(gain);
        debug!("Master gain = {}", stored);
        self.inner.emit(Event::MasterGainChanged { gain: stored });
        self.inner.settings.set(KEY_MASTER_GAIN, Value::from(stored))?;
        Ok(stored)
    }

    /// Apply a command from the display collaborator
    ///
    /// Starts and restarts are detached; their outcome arrives as events.
    pub fn dispatch(&self, command: Command) -> EngineResult<()> {
        match command {
            Command::Start => self.start()?.detach(),
            Command::Stop => self.stop(),
            Command::SetGain { band, gain_db } => {
                self.set_gain(band, gain_db)?;
            }
            Command::SetMasterGain(gain) => {
                self.set_master_gain(gain)?;
            }
            Command::SetListenMode(mode) => {
                if let ModeChange::Restarting(handle) = self.set_listen_mode(mode)? {
                    handle.detach();
                }
            }
            Command::RequestState => {
                self.inner.emit(Event::state_update(
                    self.state(),
                    self.listen_mode(),
                    self.eq_gains(),
                    self.master_gain(),
                    self.level(),
                    self.spectrum(),
                ));
            }
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.inner.machine.lock().state
    }

    pub fn listen_mode(&self) -> ListenMode {
        self.inner.machine.lock().mode
    }

    /// Current output route as last reported by the session
    pub fn route(&self) -> AudioRoute {
        self.inner.machine.lock().route.clone()
    }

    /// Latest spectrum (15 bands, 0..1)
    pub fn spectrum(&self) -> [f32; NUM_BANDS] {
        self.inner.shared.spectrum.snapshot()
    }

    /// Latest published level (0..1), refreshed at the sampler rate
    pub fn level(&self) -> f32 {
        self.inner.sampler.level()
    }

    pub fn eq_gains(&self) -> [f32; NUM_EQ_BANDS] {
        self.inner.shared.gains.snapshot()
    }

    pub fn master_gain(&self) -> f32 {
        self.inner.shared.master.get()
    }

    /// Change notifications; every clone competes for the same events
    pub fn events(&self) -> Receiver<Event> {
        self.event_rx.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn spawn_worker(
        &self,
        job: Job,
        cancel: Arc<AtomicBool>,
        cancel_on_drop: bool,
    ) -> EngineResult<StartHandle> {
        let (result_tx, result_rx) = bounded(1);
        let inner = Arc::clone(&self.inner);
        let worker_cancel = Arc::clone(&cancel);

        let spawned = thread::Builder::new()
            .name("echo-session".into())
            .spawn(move || inner.run(job, worker_cancel, result_tx));

        if let Err(e) = spawned {
            error!("Failed to spawn session worker: {}", e);
            let mut m = self.inner.machine.lock();
            if m.state == SessionState::Starting {
                m.cancel = None;
                self.inner.transition(&mut m, SessionState::Idle);
            }
            return Err(EngineError::WorkerSpawn(e.to_string()));
        }

        Ok(StartHandle {
            result_rx,
            cancel,
            finished: false,
            detached: !cancel_on_drop,
        })
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.inner.stop(StopReason::Shutdown);
        self.route_shutdown.take();
        if let Some(handle) = self.route_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Inner {
    fn emit(&self, event: Event) {
        // Receiver lives as long as the controller
        let _ = self.event_tx.send(event);
    }

    fn transition(&self, m: &mut Machine, to: SessionState) {
        let from = m.state;
        m.state = to;
        debug!("Session {:?} -> {:?}", from, to);
        self.emit(Event::StateChanged { from, to });
    }

    /// Worker body for a start or restart, plus any restart queued meanwhile
    fn run(&self, job: Job, cancel: Arc<AtomicBool>, reply: Sender<EngineResult<Started>>) {
        let mut hw = self.hw.lock();
        let mut job = job;
        let mut cancel = cancel;
        let mut reply = Some(reply);

        loop {
            if let Job::Restart(mode) = job {
                let mut m = self.machine.lock();
                if m.state != SessionState::Running {
                    // Stopped before the restart got the lock; just switch mode
                    let result = self.adopt_mode_idle(&mut hw, &mut m, mode);
                    if let Some(tx) = reply.take() {
                        let _ = tx.send(result.and(Err(EngineError::StartCancelled)));
                    }
                    return;
                }
                info!("Restarting in {} mode", mode);
                self.transition(&mut m, SessionState::Stopping);
                self.halt(&mut hw);
                self.adopt_mode(&mut m, mode);
                m.cancel = Some(Arc::clone(&cancel));
                self.transition(&mut m, SessionState::Starting);
            }

            let result = self.start_sequence(&mut hw, &cancel);
            let (result, next) = {
                let mut m = self.machine.lock();
                self.finish_start(&mut hw, &mut m, result, &cancel)
            };

            if let Some(tx) = reply.take() {
                let _ = tx.send(result);
            }

            match next {
                Some(mode) => {
                    job = Job::Restart(mode);
                    cancel = Arc::new(AtomicBool::new(false));
                }
                None => return,
            }
        }
    }

    /// Hardware steps of a start; cancellation is checked after each one
    fn start_sequence(&self, hw: &mut Hardware, cancel: &AtomicBool) -> EngineResult<Started> {
        let check = || {
            if cancel.load(Ordering::Acquire) {
                Err(EngineError::StartCancelled)
            } else {
                Ok(())
            }
        };

        let route = hw.session.current_route();
        if !route.has_headphones() {
            info!("Start refused: no headphones on {:?}", route.primary_name());
            return Err(EngineError::HeadphonesRequired);
        }
        check()?;

        let mode = self.machine.lock().mode;
        hw.session
            .configure(&mode.policy())
            .map_err(|e| EngineError::SessionConfig(e.to_string()))?;
        check()?;

        hw.session
            .set_active(true)
            .map_err(|e| EngineError::SessionConfig(e.to_string()))?;
        check()?;

        hw.graph.start(&route)?;
        check()?;

        let format = hw
            .graph
            .format()
            .ok_or_else(|| EngineError::EngineStart("graph has no format".into()))?;
        Ok(Started {
            mode,
            format,
            route,
        })
    }

    /// Settle a start into Running or Idle; returns a queued mode to restart into
    fn finish_start(
        &self,
        hw: &mut Hardware,
        m: &mut Machine,
        result: EngineResult<Started>,
        cancel: &AtomicBool,
    ) -> (EngineResult<Started>, Option<ListenMode>) {
        m.cancel = None;

        // The cancel flag is only set under `machine`, so this check cannot miss one
        let result = match result {
            Ok(_) if cancel.load(Ordering::Acquire) => Err(EngineError::StartCancelled),
            other => other,
        };

        match result {
            Ok(started) => {
                m.route = started.route.clone();
                hw.graph.install_tap();
                self.sampler.enable();
                self.now_playing.publish(&self.config.now_playing);
                self.transition(m, SessionState::Running);
                self.emit(Event::Started {
                    mode: started.mode,
                    format: started.format,
                });
                info!("Pass-through running in {} mode", started.mode);

                let next = m.pending_mode.take().filter(|mode| *mode != m.mode);
                (Ok(started), next)
            }
            Err(e) => {
                match &e {
                    EngineError::StartCancelled => info!("Start cancelled"),
                    other => warn!("Start failed: {}", other),
                }
                self.teardown(hw);
                self.transition(m, SessionState::Idle);
                self.emit(Event::error(&e));

                if let Some(mode) = m.pending_mode.take() {
                    if let Err(err) = self.adopt_mode_idle(hw, m, mode) {
                        warn!("Queued listen mode not applied: {}", err);
                    }
                }
                (Err(e), None)
            }
        }
    }

    /// Stop the signal path but leave the OS session alone
    fn halt(&self, hw: &mut Hardware) {
        hw.graph.remove_tap();
        hw.graph.stop();
        self.sampler.disable();
        self.now_playing.clear();
    }

    /// Halt and deactivate the session if a start activated it
    fn teardown(&self, hw: &mut Hardware) {
        self.halt(hw);
        if hw.session.is_active() {
            if let Err(e) = hw.session.set_active(false) {
                warn!("Failed to deactivate audio session: {}", e);
            }
        }
    }

    fn stop(&self, reason: StopReason) {
        {
            let m = self.machine.lock();
            match m.state {
                SessionState::Idle => return,
                SessionState::Starting => {
                    if let Some(cancel) = &m.cancel {
                        debug!("Cancelling pending start");
                        cancel.store(true, Ordering::Release);
                    }
                    return;
                }
                SessionState::Running | SessionState::Stopping => {}
            }
        }

        let mut hw = self.hw.lock();
        let mut m = self.machine.lock();
        match m.state {
            SessionState::Running => {}
            SessionState::Starting => {
                // A new start queued up behind us
                if let Some(cancel) = &m.cancel {
                    cancel.store(true, Ordering::Release);
                }
                return;
            }
            SessionState::Idle | SessionState::Stopping => return,
        }

        self.transition(&mut m, SessionState::Stopping);
        self.teardown(&mut hw);
        self.transition(&mut m, SessionState::Idle);
        self.emit(Event::Stopped);

        match reason {
            StopReason::Requested => info!("Pass-through stopped"),
            StopReason::Shutdown => info!("Pass-through stopped for shutdown"),
            StopReason::RouteLost => {
                warn!("Headphones disconnected, pass-through stopped");
                self.emit(Event::RouteLost);
                self.emit(Event::error(EngineError::HeadphonesRequired));
            }
        }
    }

    fn adopt_mode(&self, m: &mut Machine, mode: ListenMode) {
        if m.mode == mode {
            return;
        }
        m.mode = mode;
        self.emit(Event::ModeChanged { mode });
        if let Err(e) = self.settings.set(KEY_LISTEN_MODE, Value::from(mode.as_str())) {
            warn!("Failed to persist listen mode: {}", e);
        }
    }

    /// Adopt `mode` while Idle and reconfigure the session policy right away
    fn adopt_mode_idle(&self, hw: &mut Hardware, m: &mut Machine, mode: ListenMode) -> EngineResult<()> {
        if m.mode == mode {
            return Ok(());
        }
        self.adopt_mode(m, mode);
        info!("Listen mode set to {}", mode);
        hw.session.configure(&mode.policy()).map_err(|e| {
            let err = EngineError::SessionConfig(e.to_string());
            self.emit(Event::error(&err));
            err
        })
    }

    fn watch_routes(&self, changes: Receiver<RouteChange>, shutdown: Receiver<()>) {
        loop {
            select! {
                recv(changes) -> change => match change {
                    Ok(change) => self.on_route_change(change),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        }
        debug!("Route watcher stopped");
    }

    fn on_route_change(&self, change: RouteChange) {
        let state = {
            let mut m = self.machine.lock();
            m.route = change.current.clone();
            m.state
        };
        info!(
            "Route changed ({:?}): {:?}, headphones: {}",
            change.reason,
            change.current.primary_name(),
            change.current.has_headphones()
        );
        self.emit(Event::RouteChanged {
            route: change.current.clone(),
        });

        if change.current.has_headphones() {
            return;
        }
        match state {
            SessionState::Running => self.stop(StopReason::RouteLost),
            // Pending start re-checks nothing after the headphone check
            SessionState::Starting => self.stop(StopReason::Requested),
            SessionState::Idle | SessionState::Stopping => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SessionState::Running).unwrap();
        assert_eq!(json, "\"Running\"");
    }

    #[test]
    fn test_dropping_handle_cancels() {
        let (_tx, rx) = bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = StartHandle {
            result_rx: rx,
            cancel: Arc::clone(&cancel),
            finished: false,
            detached: false,
        };
        drop(handle);
        assert!(cancel.load(Ordering::Acquire));
    }

    #[test]
    fn test_detached_handle_does_not_cancel() {
        let (_tx, rx) = bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        StartHandle {
            result_rx: rx,
            cancel: Arc::clone(&cancel),
            finished: false,
            detached: false,
        }
        .detach();
        assert!(!cancel.load(Ordering::Acquire));
    }

    #[test]
    fn test_finished_handle_does_not_cancel() {
        let (tx, rx) = bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let mut handle = StartHandle {
            result_rx: rx,
            cancel: Arc::clone(&cancel),
            finished: false,
            detached: false,
        };
        tx.send(Err(EngineError::HeadphonesRequired)).unwrap();
        let result = handle.wait_timeout(Duration::from_millis(100)).unwrap();
        assert!(matches!(result, Err(EngineError::HeadphonesRequired)));
        drop(handle);
        assert!(!cancel.load(Ordering::Acquire));
    }

    #[test]
    fn test_restart_handle_survives_drop_but_honors_cancel() {
        let (_tx, rx) = bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = StartHandle {
            result_rx: rx,
            cancel: Arc::clone(&cancel),
            finished: false,
            detached: true,
        };
        handle.cancel();
        assert!(cancel.load(Ordering::Acquire));

        cancel.store(false, Ordering::Release);
        drop(handle);
        assert!(!cancel.load(Ordering::Acquire));
    }
}
