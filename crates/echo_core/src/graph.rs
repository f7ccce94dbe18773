//! Audio Graph
//!
//! Owns the pass-through topology:
//!
//! ```text
//! capture ──▶ EqualizerStage ──▶ MixStage (master gain) ──▶ output
//!                                     │
//!                                     └─▶ AnalysisTap ──▶ SpectrumFrame, LevelReading
//! ```
//!
//! The chain is assembled here and moved into the driver's capture callback
//! on start. Control values reach it only through the shared atomics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use echo_dsp::{
    AnalysisTap, EqBand, EqGains, EqualizerStage, LevelReading, MasterGain, MixStage,
    ProcessorChain, SpectrumFrame,
};
use echo_platform::AudioRoute;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::{EngineError, EngineResult};
use crate::stream::AudioDriver;

/// Values shared between the graph, the real-time chain and readers
#[derive(Clone)]
pub struct GraphShared {
    pub gains: Arc<EqGains>,
    pub master: Arc<MasterGain>,
    pub spectrum: Arc<SpectrumFrame>,
    pub level: Arc<LevelReading>,
}

impl GraphShared {
    pub fn new(initial_gains_db: [f32; echo_dsp::NUM_EQ_BANDS], master_gain: f32) -> Self {
        Self {
            gains: Arc::new(EqGains::new(initial_gains_db)),
            master: Arc::new(MasterGain::new(master_gain)),
            spectrum: Arc::new(SpectrumFrame::new()),
            level: Arc::new(LevelReading::new()),
        }
    }
}

impl Default for GraphShared {
    fn default() -> Self {
        Self::new([0.0; echo_dsp::NUM_EQ_BANDS], 1.0)
    }
}

pub struct AudioGraph {
    driver: Box<dyn AudioDriver>,
    shared: GraphShared,
    tap_installed: Arc<AtomicBool>,
    tap_frame_size: usize,
    format: Option<StreamConfig>,
    chain: Option<ProcessorChain>,
    running: bool,
}

impl AudioGraph {
    pub fn new(driver: Box<dyn AudioDriver>, shared: GraphShared, tap_frame_size: usize) -> Self {
        Self {
            driver,
            shared,
            tap_installed: Arc::new(AtomicBool::new(false)),
            tap_frame_size,
            format: None,
            chain: None,
            running: false,
        }
    }

    /// Assemble capture -> EQ -> mix (-> tap) at the capture device's native format
    pub fn build(&mut self) -> EngineResult<()> {
        let format = self.driver.capture_format()?;
        format.validate().map_err(EngineError::ConfigError)?;

        let sample_rate = format.sample_rate as f32;
        let eq = EqualizerStage::configure(sample_rate, Arc::clone(&self.shared.gains))?;

        let mut chain = ProcessorChain::new(
            sample_rate,
            format.channels as usize,
            format.buffer_size as usize,
        );
        chain.add(eq);
        chain.add(MixStage::new(Arc::clone(&self.shared.master)));
        chain.add(AnalysisTap::new(
            self.tap_frame_size,
            Arc::clone(&self.shared.spectrum),
            Arc::clone(&self.shared.level),
            Arc::clone(&self.tap_installed),
        ));

        debug!("Graph assembled: {:?} at {:?}", chain.names(), format);
        self.chain = Some(chain);
        self.format = Some(format);
        Ok(())
    }

    /// Start pass-through on `route`
    ///
    /// Refuses without touching the driver unless the route has a
    /// headphone-class output, since capture and playback run at once.
    pub fn start(&mut self, route: &AudioRoute) -> EngineResult<()> {
        if !route.has_headphones() {
            return Err(EngineError::HeadphonesRequired);
        }
        if self.running {
            return Ok(());
        }

        if self.chain.is_none() {
            if let Err(e) = self.build() {
                self.teardown();
                return Err(EngineError::EngineStart(e.to_string()));
            }
        }

        let (Some(chain), Some(format)) = (self.chain.take(), self.format) else {
            return Err(EngineError::EngineStart("graph not assembled".into()));
        };

        match self.driver.start(&format, chain) {
            Ok(()) => {
                self.running = true;
                info!(
                    "Graph running via {} on {:?} ({} Hz, {} ch)",
                    self.driver.name(),
                    route.primary_name(),
                    format.sample_rate,
                    format.channels
                );
                Ok(())
            }
            Err(e) => {
                warn!("Driver failed to start: {}", e);
                self.driver.stop();
                self.teardown();
                Err(EngineError::EngineStart(e.to_string()))
            }
        }
    }

    /// Enable the analysis tap
    pub fn install_tap(&self) {
        self.tap_installed.store(true, Ordering::Release);
    }

    /// Disable the analysis tap
    pub fn remove_tap(&self) {
        self.tap_installed.store(false, Ordering::Release);
    }

    pub fn is_tap_installed(&self) -> bool {
        self.tap_installed.load(Ordering::Acquire)
    }

    /// Remove the tap, halt the driver and drop all node state. Idempotent.
    pub fn stop(&mut self) {
        self.remove_tap();
        if self.running {
            self.driver.stop();
            info!("Graph stopped");
        }
        self.running = false;
        self.teardown();
    }

    fn teardown(&mut self) {
        self.chain = None;
        self.format = None;
        self.shared.level.reset();
    }

    /// Set master gain (clamped to 0 - 10); takes effect on the next buffer
    pub fn set_master_gain(&self, gain: f32) -> f32 {
        self.shared.master.set(gain)
    }

    /// Set one band's gain (clamped to +/-24 dB); takes effect on the next buffer
    pub fn set_gain(&self, band: EqBand, gain_db: f32) -> f32 {
        self.shared.gains.set(band, gain_db)
    }

    /// Whether nodes are attached (assembled or running)
    pub fn is_assembled(&self) -> bool {
        self.chain.is_some() || self.running
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Format of the assembled graph
    pub fn format(&self) -> Option<StreamConfig> {
        self.format
    }

    pub fn shared(&self) -> &GraphShared {
        &self.shared
    }
}

impl Drop for AudioGraph {
    fn drop(&mut self) {
        self.stop();
    }
}
