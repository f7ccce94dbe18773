//! EchoHeart DSP - Digital Signal Processing Module
//!
//! This crate provides the real-time pieces of the pass-through signal path:
//! - 3-band parametric equalizer using BiQuad filters
//! - Master gain mix stage
//! - FFT spectrum analyzer producing 15 smoothed display bands
//! - RMS level meter with dB normalization
//! - An analysis tap that feeds both analyzers from the mixed output
//!
//! # Architecture
//!
//! The DSP chain follows a strict "no allocation in audio callback" rule.
//! Control values (band gains, master gain) and analysis results (spectrum,
//! level) cross threads through atomics only.

mod eq;
mod error;
mod gain;
mod meter;
mod processor;
mod spectrum;
mod tap;

/// Maximum number of channels the equalizer keeps filter state for
pub const MAX_CHANNELS: usize = 2;

pub use eq::{
    clamp_gain_db, octaves_to_q, EqBand, EqBandConfig, EqGains, EqualizerStage,
    BANDWIDTH_OCTAVES, EQ_BANDS, MAX_GAIN_DB, MIN_GAIN_DB, NUM_EQ_BANDS,
};
pub use error::DspError;
pub use gain::{apply_gain, clamp_master_gain, MasterGain, MAX_MASTER_GAIN, MIN_MASTER_GAIN};
pub use meter::{amplitude_to_db, normalize_db, rms, LevelMeter, LevelReading, CEILING_DB, FLOOR_DB};
pub use processor::{AudioProcessor, MixStage, ProcessContext, ProcessorChain};
pub use spectrum::{
    band_range, compute_bands, smooth, SpectrumAnalyzer, SpectrumFrame, BAND_SCALE, NUM_BANDS,
};
pub use tap::{AnalysisTap, TAP_FRAME_SIZE};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify all public types are accessible
        let gains = std::sync::Arc::new(EqGains::default());
        let _eq = EqualizerStage::configure(48000.0, gains).unwrap();
        let _gain = MasterGain::default();
        let _frame = SpectrumFrame::new();
    }
}
