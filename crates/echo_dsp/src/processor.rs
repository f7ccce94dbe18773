//! Audio Processor Trait
//!
//! Defines the interface for chainable audio processors.
//! The signal path is built as a chain: EQ -> Mix -> Analysis tap.

use std::sync::Arc;

use crate::eq::EqualizerStage;
use crate::gain::{apply_gain, MasterGain};
use crate::tap::AnalysisTap;

/// Stream format the chain was assembled for
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub sample_rate: f32,
    pub channels: usize,
    /// Nominal frames per callback; actual buffers may be shorter
    pub buffer_size: usize,
}

impl ProcessContext {
    pub fn new(sample_rate: f32, channels: usize, buffer_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            buffer_size,
        }
    }
}

/// One stage of the pass-through signal path
///
/// # Real-time Safety
///
/// `process` runs inside the capture callback. It must not allocate, lock,
/// log or block, and its cost must be linear in the buffer length. Control
/// values are read from atomics.
pub trait AudioProcessor: Send {
    /// Process an interleaved buffer in place
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext);

    /// Drop filter history and partially filled blocks
    fn reset(&mut self);

    fn name(&self) -> &'static str;

    /// Disabled stages are skipped for the whole buffer
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Stages run in insertion order on every buffer
pub struct ProcessorChain {
    stages: Vec<Box<dyn AudioProcessor>>,
    context: ProcessContext,
}

impl ProcessorChain {
    pub fn new(sample_rate: f32, channels: usize, buffer_size: usize) -> Self {
        Self {
            stages: Vec::with_capacity(3),
            context: ProcessContext::new(sample_rate, channels, buffer_size),
        }
    }

    /// Append a stage. Allocates; only call while assembling the graph.
    pub fn add<P: AudioProcessor + 'static>(&mut self, stage: P) {
        self.stages.push(Box::new(stage));
    }

    #[inline]
    pub fn process(&mut self, buffer: &mut [f32]) {
        let context = &self.context;
        self.stages
            .iter_mut()
            .filter(|stage| stage.is_enabled())
            .for_each(|stage| stage.process(buffer, context));
    }

    pub fn reset(&mut self) {
        self.stages.iter_mut().for_each(|stage| stage.reset());
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    /// Stage names, in processing order
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl AudioProcessor for EqualizerStage {
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext) {
        self.process_interleaved(buffer, context.channels);
    }

    fn reset(&mut self) {
        EqualizerStage::reset(self);
    }

    fn name(&self) -> &'static str {
        "3-Band Equalizer"
    }
}

/// Mix stage: applies the master gain after the equalizer
pub struct MixStage {
    gain: Arc<MasterGain>,
}

impl MixStage {
    pub fn new(gain: Arc<MasterGain>) -> Self {
        Self { gain }
    }
}

impl AudioProcessor for MixStage {
    fn process(&mut self, buffer: &mut [f32], _context: &ProcessContext) {
        apply_gain(buffer, self.gain.get());
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "Mixer"
    }
}

// Always enabled so a removed tap still gets to drop its partial block
impl AudioProcessor for AnalysisTap {
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext) {
        self.observe(buffer, context.channels);
    }

    fn reset(&mut self) {
        AnalysisTap::reset(self);
    }

    fn name(&self) -> &'static str {
        "Analysis Tap"
    }
}
