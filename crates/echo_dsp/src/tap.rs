//! Analysis Tap
//!
//! A read-only monitor on the mixed output. It copies channel 0 of each
//! interleaved buffer into a fixed block and, every time the block fills,
//! runs the spectrum analyzer and the level meter on it.
//!
//! The tap can be installed and removed while the stream keeps running via a
//! shared flag; a removed tap drops its partial block so the next install
//! starts clean.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::meter::{LevelMeter, LevelReading};
use crate::spectrum::{SpectrumAnalyzer, SpectrumFrame};

/// Default tap block size (samples of one channel)
pub const TAP_FRAME_SIZE: usize = 1024;

pub struct AnalysisTap {
    block: Vec<f32>,
    filled: usize,
    analyzer: SpectrumAnalyzer,
    meter: LevelMeter,
    installed: Arc<AtomicBool>,
    blocks_analyzed: u64,
}

impl AnalysisTap {
    /// Create a tap with a block of `frame_size` samples (power of two)
    pub fn new(
        frame_size: usize,
        spectrum: Arc<SpectrumFrame>,
        level: Arc<LevelReading>,
        installed: Arc<AtomicBool>,
    ) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            block: vec![0.0; frame_size],
            filled: 0,
            analyzer: SpectrumAnalyzer::new(frame_size, spectrum),
            meter: LevelMeter::new(level),
            installed,
            blocks_analyzed: 0,
        }
    }

    /// Feed an interleaved buffer
    ///
    /// # Real-time Safety
    /// No allocations; at most one analysis per filled block.
    #[inline]
    pub fn observe(&mut self, buffer: &[f32], channels: usize) {
        if !self.installed.load(Ordering::Acquire) {
            self.filled = 0;
            return;
        }

        let channels = channels.max(1);
        for frame in buffer.chunks_exact(channels) {
            self.block[self.filled] = frame[0];
            self.filled += 1;
            if self.filled == self.block.len() {
                self.analyzer.analyze(&self.block);
                self.meter.sample(&self.block);
                self.filled = 0;
                self.blocks_analyzed += 1;
            }
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    pub fn blocks_analyzed(&self) -> u64 {
        self.blocks_analyzed
    }

    pub fn reset(&mut self) {
        self.filled = 0;
        self.analyzer.reset();
    }
}
