//! Master Gain / Mix Stage
//!
//! The mix stage sits after the equalizer and scales every sample by the
//! master gain. The gain is linear, 0.0 (silence) up to 10.0 (10x).

use std::sync::atomic::{AtomicU32, Ordering};

pub const MIN_MASTER_GAIN: f32 = 0.0;
pub const MAX_MASTER_GAIN: f32 = 10.0;

/// Clamp a requested master gain into the supported range
#[inline]
pub fn clamp_master_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        return 1.0;
    }
    gain.clamp(MIN_MASTER_GAIN, MAX_MASTER_GAIN)
}

/// Master gain shared between control and audio threads
///
/// AtomicF32 doesn't exist, so the value is stored as its bit pattern.
pub struct MasterGain {
    bits: AtomicU32,
}

impl MasterGain {
    pub fn new(gain: f32) -> Self {
        Self {
            bits: AtomicU32::new(clamp_master_gain(gain).to_bits()),
        }
    }

    /// Clamp and store, returning the stored value
    pub fn set(&self, gain: f32) -> f32 {
        let clamped = clamp_master_gain(gain);
        self.bits.store(clamped.to_bits(), Ordering::Relaxed);
        clamped
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Default for MasterGain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Apply a linear gain to a buffer in place
///
/// # Real-time Safety
/// No allocations, O(n).
#[inline]
pub fn apply_gain(buffer: &mut [f32], gain: f32) {
    if gain == 1.0 {
        return;
    }
    if gain == 0.0 {
        buffer.fill(0.0);
        return;
    }
    for sample in buffer.iter_mut() {
        *sample *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unity() {
        assert_eq!(MasterGain::default().get(), 1.0);
    }

    #[test]
    fn test_clamping() {
        let gain = MasterGain::default();
        assert_eq!(gain.set(12.0), 10.0);
        assert_eq!(gain.set(-1.0), 0.0);
        assert_eq!(gain.set(2.5), 2.5);
        assert_eq!(gain.get(), 2.5);
    }

    #[test]
    fn test_zero_gain_is_silence() {
        let mut buffer = vec![0.5, -0.25, 1.0, -1.0];
        apply_gain(&mut buffer, 0.0);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_gain_is_linear() {
        let input = [0.05_f32, -0.02, 0.1, -0.1];
        let mut buffer = input.to_vec();
        apply_gain(&mut buffer, 10.0);
        for (out, inp) in buffer.iter().zip(input.iter()) {
            assert!((out - inp * 10.0).abs() < 1e-6);
        }
    }
}
