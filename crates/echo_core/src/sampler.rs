//! Level Sampler
//!
//! The meter writes a new reading on every tap block, far more often than a
//! display needs. This ticker republishes the newest reading at a fixed UI
//! rate, and publishes 0.0 whenever it is disabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use echo_dsp::LevelReading;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

pub struct LevelSampler {
    published: Arc<LevelReading>,
    enabled: Arc<AtomicBool>,
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LevelSampler {
    /// Spawn the `echo-level` ticker reading `source` every `interval`
    pub fn spawn(source: Arc<LevelReading>, interval: Duration) -> EngineResult<Self> {
        let published = Arc::new(LevelReading::new());
        let enabled = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let thread_published = Arc::clone(&published);
        let thread_enabled = Arc::clone(&enabled);

        let handle = thread::Builder::new()
            .name("echo-level".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            if thread_enabled.load(Ordering::Acquire) {
                                thread_published.store(source.load());
                                // disable() may have raced the store
                                if !thread_enabled.load(Ordering::Acquire) {
                                    thread_published.reset();
                                }
                            } else {
                                thread_published.reset();
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("Level sampler stopped");
            })
            .map_err(|e| EngineError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            published,
            enabled,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Start republishing readings
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop republishing and zero the published level immediately
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.published.reset();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Latest published level
    pub fn level(&self) -> f32 {
        self.published.load()
    }

    pub fn published(&self) -> &Arc<LevelReading> {
        &self.published
    }
}

impl Drop for LevelSampler {
    fn drop(&mut self) {
        self.shutdown_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
