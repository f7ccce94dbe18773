//! Level Meter
//!
//! RMS of a block, converted to dBFS and mapped linearly onto 0..1 between a
//! -80 dB floor and a 0 dB ceiling.
//!
//! The meter only stores the newest value in a [`LevelReading`]. Publishing to
//! slower consumers is somebody else's job, so the audio thread never waits on
//! a reader.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Level that maps to 0.0
pub const FLOOR_DB: f32 = -80.0;

/// Level that maps to 1.0
pub const CEILING_DB: f32 = 0.0;

/// Root-mean-square of a block
///
/// Returns 0.0 for an empty block.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Linear amplitude to decibels (`20 * log10`)
#[inline]
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.log10()
}

/// Map decibels onto 0..1: -80 dB and below is 0, 0 dB and above is 1
#[inline]
pub fn normalize_db(db: f32) -> f32 {
    if db.is_nan() {
        return 0.0;
    }
    ((db - FLOOR_DB) / (CEILING_DB - FLOOR_DB)).clamp(0.0, 1.0)
}

/// Latest normalized level, shared lock-free between threads
pub struct LevelReading {
    bits: AtomicU32,
}

impl LevelReading {
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(0.0_f32.to_bits()),
        }
    }

    #[inline]
    pub fn store(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.store(0.0);
    }
}

impl Default for LevelReading {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the normalized level of each block it is given
pub struct LevelMeter {
    latest: Arc<LevelReading>,
}

impl LevelMeter {
    pub fn new(latest: Arc<LevelReading>) -> Self {
        Self { latest }
    }

    /// Measure one block and store the result
    ///
    /// # Real-time Safety
    /// No allocations, one atomic store.
    #[inline]
    pub fn sample(&self, frame: &[f32]) -> f32 {
        let level = normalize_db(amplitude_to_db(rms(frame)));
        self.latest.store(level);
        level
    }

    pub fn latest(&self) -> &Arc<LevelReading> {
        &self.latest
    }
}
