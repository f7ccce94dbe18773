//! 3-Band Parametric Equalizer
//!
//! Low/mid/high peaking filters at fixed centers (200 Hz, 1 kHz, 4 kHz) with a
//! one-octave bandwidth. Only the gain of each band is adjustable at runtime.
//! Based on the RBJ (Robert Bristow-Johnson) Audio EQ Cookbook.
//!
//! Gains live in [`EqGains`], a lock-free handle shared between the control
//! thread and the audio callback. The stage owned by the callback notices a new
//! generation at the start of a buffer and recomputes coefficients in place.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use crate::error::DspError;
use crate::MAX_CHANNELS;

/// Center frequencies (Hz) for the low, mid and high bands
pub const EQ_BANDS: [f32; 3] = [200.0, 1000.0, 4000.0];

/// Bandwidth of every band, in octaves
pub const BANDWIDTH_OCTAVES: f32 = 1.0;

pub const MIN_GAIN_DB: f32 = -24.0;
pub const MAX_GAIN_DB: f32 = 24.0;

/// Number of EQ bands
pub const NUM_EQ_BANDS: usize = 3;

/// One of the three fixed EQ bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; NUM_EQ_BANDS] = [EqBand::Low, EqBand::Mid, EqBand::High];

    pub fn index(self) -> usize {
        match self {
            EqBand::Low => 0,
            EqBand::Mid => 1,
            EqBand::High => 2,
        }
    }

    pub fn from_index(index: usize) -> Result<Self, DspError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(DspError::InvalidBandIndex(index))
    }

    pub fn center_hz(self) -> f32 {
        EQ_BANDS[self.index()]
    }

    pub fn name(self) -> &'static str {
        match self {
            EqBand::Low => "low",
            EqBand::Mid => "mid",
            EqBand::High => "high",
        }
    }
}

impl std::str::FromStr for EqBand {
    type Err = DspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(EqBand::Low),
            "mid" => Ok(EqBand::Mid),
            "high" => Ok(EqBand::High),
            other => other
                .parse::<usize>()
                .map_err(|_| DspError::InvalidBandIndex(usize::MAX))
                .and_then(Self::from_index),
        }
    }
}

/// Clamp a requested gain into the supported range
#[inline]
pub fn clamp_gain_db(gain_db: f32) -> f32 {
    if gain_db.is_nan() {
        return 0.0;
    }
    gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
}

/// Convert a bandwidth in octaves to the equivalent filter Q
///
/// Q = sqrt(2^N) / (2^N - 1), so one octave gives Q = sqrt(2).
pub fn octaves_to_q(octaves: f32) -> f32 {
    let two_n = 2.0_f32.powf(octaves);
    two_n.sqrt() / (two_n - 1.0)
}

/// Configuration of a single band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqBandConfig {
    pub center_hz: f32,
    pub bandwidth_octaves: f32,
    pub gain_db: f32,
    pub enabled: bool,
}

impl EqBandConfig {
    pub fn new(band: EqBand, gain_db: f32) -> Self {
        Self {
            center_hz: band.center_hz(),
            bandwidth_octaves: BANDWIDTH_OCTAVES,
            gain_db: clamp_gain_db(gain_db),
            enabled: true,
        }
    }

    /// Generate peaking BiQuad coefficients for this band
    fn to_coefficients(self, sample_rate: f32) -> Result<Coefficients<f32>, DspError> {
        Coefficients::<f32>::from_params(
            Type::PeakingEQ(self.gain_db),
            sample_rate.hz(),
            self.center_hz.hz(),
            octaves_to_q(self.bandwidth_octaves),
        )
        .map_err(|_| DspError::InvalidCoefficients {
            frequency: self.center_hz,
            sample_rate,
        })
    }
}

/// Lock-free band gains shared between control and audio threads
///
/// Each gain is an `f32` bit-cast into an `AtomicU32`. Writers bump
/// `generation` after storing so the audio thread can detect changes with a
/// single load per buffer.
pub struct EqGains {
    bits: [AtomicU32; NUM_EQ_BANDS],
    generation: AtomicU32,
}

impl EqGains {
    pub fn new(initial_db: [f32; NUM_EQ_BANDS]) -> Self {
        Self {
            bits: core::array::from_fn(|i| AtomicU32::new(clamp_gain_db(initial_db[i]).to_bits())),
            generation: AtomicU32::new(0),
        }
    }

    /// Clamp and store a band gain, returning the stored value
    pub fn set(&self, band: EqBand, gain_db: f32) -> f32 {
        let clamped = clamp_gain_db(gain_db);
        self.bits[band.index()].store(clamped.to_bits(), Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Release);
        clamped
    }

    pub fn get(&self, band: EqBand) -> f32 {
        f32::from_bits(self.bits[band.index()].load(Ordering::Relaxed))
    }

    /// All three gains, low to high
    pub fn snapshot(&self) -> [f32; NUM_EQ_BANDS] {
        core::array::from_fn(|i| f32::from_bits(self.bits[i].load(Ordering::Relaxed)))
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for EqGains {
    fn default() -> Self {
        Self::new([0.0; NUM_EQ_BANDS])
    }
}

/// The equalizer stage of the signal path
///
/// Holds per-channel filter state and processes audio samples.
/// Designed for real-time use: no allocations after [`EqualizerStage::configure`].
pub struct EqualizerStage {
    // DirectForm2Transposed: better numerical stability than DF1
    filters: [[DirectForm2Transposed<f32>; NUM_EQ_BANDS]; MAX_CHANNELS],
    bands: [EqBandConfig; NUM_EQ_BANDS],
    gains: Arc<EqGains>,
    seen_generation: u32,
    sample_rate: f32,
    /// Stage-wide gain, fixed at 0 dB
    global_gain_db: f32,
}

impl EqualizerStage {
    /// Build the three peaking bands at their fixed centers from the current gains
    pub fn configure(sample_rate: f32, gains: Arc<EqGains>) -> Result<Self, DspError> {
        if !(sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }

        let seen_generation = gains.generation();
        let current = gains.snapshot();
        let bands: [EqBandConfig; NUM_EQ_BANDS] =
            core::array::from_fn(|i| EqBandConfig::new(EqBand::ALL[i], current[i]));

        let mut coeffs = Vec::with_capacity(NUM_EQ_BANDS);
        for band in &bands {
            coeffs.push(band.to_coefficients(sample_rate)?);
        }

        let filters = core::array::from_fn(|_| {
            core::array::from_fn(|i| DirectForm2Transposed::<f32>::new(coeffs[i]))
        });

        Ok(Self {
            filters,
            bands,
            gains,
            seen_generation,
            sample_rate,
            global_gain_db: 0.0,
        })
    }

    /// Set gain for a single band directly on this stage
    ///
    /// Also stores the value in the shared gains so other readers agree.
    pub fn set_gain(&mut self, band: EqBand, gain_db: f32) -> Result<f32, DspError> {
        let stored = self.gains.set(band, gain_db);
        self.apply_gain(band, stored)?;
        self.seen_generation = self.gains.generation();
        Ok(stored)
    }

    fn apply_gain(&mut self, band: EqBand, gain_db: f32) -> Result<(), DspError> {
        let idx = band.index();
        if self.bands[idx].gain_db == gain_db {
            return Ok(());
        }
        self.bands[idx].gain_db = gain_db;
        let coeffs = self.bands[idx].to_coefficients(self.sample_rate)?;
        for channel in self.filters.iter_mut() {
            channel[idx].update_coefficients(coeffs);
        }
        Ok(())
    }

    /// Pick up gain changes made through the shared handle
    ///
    /// # Real-time Safety
    /// One atomic load when nothing changed; coefficient math only otherwise.
    #[inline]
    pub fn sync(&mut self) {
        let generation = self.gains.generation();
        if generation == self.seen_generation {
            return;
        }
        self.seen_generation = generation;
        let gains = self.gains.snapshot();
        for band in EqBand::ALL {
            // Centers are below Nyquist for every validated rate, so this cannot fail
            let _ = self.apply_gain(band, gains[band.index()]);
        }
    }

    /// Process one sample of one channel through the cascade
    #[inline]
    pub fn process_sample(&mut self, channel: usize, sample: f32) -> f32 {
        let mut x = sample;
        for (filter, band) in self.filters[channel].iter_mut().zip(self.bands.iter()) {
            if band.enabled {
                x = filter.run(x);
            }
        }
        x
    }

    /// Process an interleaved buffer in-place
    ///
    /// Channels beyond [`MAX_CHANNELS`] are passed through untouched.
    ///
    /// # Real-time Safety
    /// No allocations. O(n) where n = buffer length.
    #[inline]
    pub fn process_interleaved(&mut self, buffer: &mut [f32], channels: usize) {
        self.sync();
        let channels = channels.max(1);
        let processed = channels.min(MAX_CHANNELS);
        for frame in buffer.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().take(processed).enumerate() {
                *sample = self.process_sample(ch, *sample);
            }
        }
    }

    pub fn bands(&self) -> &[EqBandConfig; NUM_EQ_BANDS] {
        &self.bands
    }

    pub fn gains(&self) -> &Arc<EqGains> {
        &self.gains
    }

    pub fn global_gain_db(&self) -> f32 {
        self.global_gain_db
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Reset filter state (clear delay lines)
    pub fn reset(&mut self) {
        for channel in self.filters.iter_mut() {
            for filter in channel.iter_mut() {
                filter.reset_state();
            }
        }
    }
}
