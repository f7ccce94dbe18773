//! FFT Spectrum Analyzer
//!
//! Turns one tap block of mono samples into 15 display bands.
//!
//! # Algorithm
//!
//! 1. Hann window over the whole block
//! 2. Forward FFT of the windowed block (imaginary part zero)
//! 3. Power `|X[k]|^2` for the first N/2 bins
//! 4. 15 equal-width bands, the last band takes any remainder bins
//! 5. `clamp(3 * sqrt(mean power), 0, 1)` per band
//! 6. Exponential smoothing `0.8 * prev + 0.2 * raw` for bands 1..15
//!
//! Band 0 is never written by step 6, so it keeps its initial value of 0.
//!
//! # Thread Safety
//!
//! The analyzer itself is owned by the audio tap. Results are written into a
//! shared [`SpectrumFrame`] made of per-band atomics, so the UI can read at any
//! time without blocking the writer. A reader may see a frame that is only
//! partially updated; that is acceptable for display.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Number of display bands
pub const NUM_BANDS: usize = 15;

/// Scale applied to the RMS band magnitude before clamping
pub const BAND_SCALE: f32 = 3.0;

/// Weight of the previous smoothed value
pub const SMOOTHING_RETAIN: f32 = 0.8;

/// Weight of the new raw value
pub const SMOOTHING_ATTACK: f32 = 0.2;

/// Hann window value for sample `n` of a window of `size` samples
fn hann_window(n: usize, size: usize) -> f32 {
    if size < 2 {
        return 1.0;
    }
    0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
}

/// Shared, lock-free spectrum output
///
/// Single writer (the analyzer), any number of readers.
pub struct SpectrumFrame {
    bands: [AtomicU32; NUM_BANDS],
}

impl SpectrumFrame {
    pub fn new() -> Self {
        Self {
            bands: core::array::from_fn(|_| AtomicU32::new(0.0_f32.to_bits())),
        }
    }

    #[inline]
    pub fn get(&self, band: usize) -> f32 {
        f32::from_bits(self.bands[band].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, band: usize, value: f32) {
        self.bands[band].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Copy of all bands, low to high
    pub fn snapshot(&self) -> [f32; NUM_BANDS] {
        core::array::from_fn(|i| self.get(i))
    }

    /// Zero every band
    pub fn clear(&self) {
        for band in &self.bands {
            band.store(0.0_f32.to_bits(), Ordering::Relaxed);
        }
    }
}

impl Default for SpectrumFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Bin range `[start, end)` covered by `band` when `half` bins are split into
/// [`NUM_BANDS`] bands
pub fn band_range(band: usize, half: usize) -> (usize, usize) {
    let width = half / NUM_BANDS;
    let start = band * width;
    let end = if band == NUM_BANDS - 1 { half } else { start + width };
    (start, end)
}

/// Reduce power bins to raw band values in [0, 1]
pub fn compute_bands(power: &[f32], out: &mut [f32; NUM_BANDS]) {
    let half = power.len();
    for (band, value) in out.iter_mut().enumerate() {
        let (start, end) = band_range(band, half);
        let slice = &power[start..end];
        if slice.is_empty() {
            *value = 0.0;
            continue;
        }
        let mean = slice.iter().sum::<f32>() / slice.len() as f32;
        let magnitude = mean.sqrt() * BAND_SCALE;
        // NaN from garbage input reads as silence
        *value = if magnitude.is_nan() {
            0.0
        } else {
            magnitude.clamp(0.0, 1.0)
        };
    }
}

/// One smoothing step for a single band
#[inline]
pub fn smooth(previous: f32, raw: f32) -> f32 {
    previous * SMOOTHING_RETAIN + raw * SMOOTHING_ATTACK
}

/// Spectrum analyzer that computes a banded, smoothed magnitude spectrum
pub struct SpectrumAnalyzer {
    /// Hann window coefficients for the current block size
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    /// Windowed samples in, spectrum out
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Power for the first N/2 bins
    power: Vec<f32>,
    raw: [f32; NUM_BANDS],
    output: Arc<SpectrumFrame>,
    planner: FftPlanner<f32>,
}

impl SpectrumAnalyzer {
    /// Create an analyzer for blocks of `frame_size` samples
    ///
    /// `frame_size` should be a power of two.
    pub fn new(frame_size: usize, output: Arc<SpectrumFrame>) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size.max(1));
        let mut analyzer = Self {
            window: Vec::new(),
            fft,
            buffer: Vec::new(),
            scratch: Vec::new(),
            power: Vec::new(),
            raw: [0.0; NUM_BANDS],
            output,
            planner,
        };
        analyzer.prepare(frame_size);
        analyzer
    }

    /// (Re)allocate window, plan and scratch for a block size
    ///
    /// Only called on construction or when the block size changes.
    fn prepare(&mut self, frame_size: usize) {
        let frame_size = frame_size.max(1);
        if self.fft.len() != frame_size {
            self.fft = self.planner.plan_fft_forward(frame_size);
        }
        self.window = (0..frame_size).map(|i| hann_window(i, frame_size)).collect();
        self.buffer = vec![Complex::new(0.0, 0.0); frame_size];
        self.scratch = vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
        self.power = vec![0.0; frame_size / 2];
    }

    /// Block size the analyzer is currently planned for
    pub fn frame_size(&self) -> usize {
        self.window.len()
    }

    /// Analyze one block and update the shared frame
    ///
    /// # Real-time Safety
    /// No allocations as long as the block size matches the planned size.
    pub fn analyze(&mut self, frame: &[f32]) {
        if frame.is_empty() {
            return;
        }
        debug_assert!(
            frame.len().is_power_of_two(),
            "spectrum block size must be a power of two, got {}",
            frame.len()
        );
        if frame.len() != self.window.len() {
            self.prepare(frame.len());
        }

        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (p, bin) in self.power.iter_mut().zip(&self.buffer) {
            *p = bin.norm_sqr();
        }

        compute_bands(&self.power, &mut self.raw);

        // Band 0 is intentionally left alone
        for i in 1..NUM_BANDS {
            let previous = self.output.get(i);
            self.output.store(i, smooth(previous, self.raw[i]));
        }
    }

    /// Raw (unsmoothed) values from the last analysis
    pub fn raw_bands(&self) -> [f32; NUM_BANDS] {
        self.raw
    }

    /// Shared output frame
    pub fn output(&self) -> &Arc<SpectrumFrame> {
        &self.output
    }

    /// Clear working state; the shared frame keeps its values
    pub fn reset(&mut self) {
        self.raw = [0.0; NUM_BANDS];
        self.power.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 1024;

    fn sine(freq_bin: f32, amplitude: f32) -> Vec<f32> {
        (0..N)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq_bin * i as f32 / N as f32).sin() * amplitude
            })
            .collect()
    }

    fn analyzer() -> SpectrumAnalyzer {
        SpectrumAnalyzer::new(N, Arc::new(SpectrumFrame::new()))
    }

    #[test]
    fn test_starts_at_zero() {
        let a = analyzer();
        assert_eq!(a.output().snapshot(), [0.0; NUM_BANDS]);
    }

    #[test]
    fn test_band_ranges_cover_all_bins() {
        let half = N / 2; // 512 bins -> 34 per band, last band 36
        assert_eq!(band_range(0, half), (0, 34));
        assert_eq!(band_range(13, half), (442, 476));
        assert_eq!(band_range(14, half), (476, 512));

        let mut covered = 0;
        for band in 0..NUM_BANDS {
            let (start, end) = band_range(band, half);
            assert_eq!(start, covered);
            covered = end;
        }
        assert_eq!(covered, half);
    }

    #[test]
    fn test_tiny_block_puts_everything_in_last_band() {
        // 8 bins / 15 bands = 0 width
        assert_eq!(band_range(0, 8), (0, 0));
        assert_eq!(band_range(14, 8), (0, 8));
        let mut out = [0.5; NUM_BANDS];
        compute_bands(&[1.0; 8], &mut out);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[14], 1.0);
    }

    #[test]
    fn test_compute_bands_scale() {
        // mean power 0.01 -> rms 0.1 -> x3 = 0.3
        let power = vec![0.01_f32; N / 2];
        let mut out = [0.0; NUM_BANDS];
        compute_bands(&power, &mut out);
        for v in out {
            assert!((v - 0.3).abs() < 1e-5);
        }
    }

    #[test]
    fn test_hann_window_shape() {
        let a = analyzer();
        assert!(a.window[0] < 0.01, "Window should be ~0 at start");
        assert!(a.window[N - 1] < 0.01, "Window should be ~0 at end");
        assert!((a.window[N / 2] - 1.0).abs() < 0.01, "Window should be ~1 at center");
    }

    #[test]
    fn test_output_always_in_unit_range() {
        let mut a = analyzer();
        let inputs = [
            vec![0.0; N],
            sine(40.0, 1.0),
            sine(300.0, 100.0),
            vec![1.0; N],
            (0..N).map(|i| if i % 2 == 0 { 50.0 } else { -50.0 }).collect(),
        ];
        for input in &inputs {
            for _ in 0..5 {
                a.analyze(input);
                for v in a.output().snapshot() {
                    assert!((0.0..=1.0).contains(&v), "value {} out of range", v);
                }
                for v in a.raw_bands() {
                    assert!((0.0..=1.0).contains(&v));
                }
            }
        }
    }

    #[test]
    fn test_band_zero_never_altered() {
        let frame = Arc::new(SpectrumFrame::new());
        frame.store(0, 0.42);
        let mut a = SpectrumAnalyzer::new(N, Arc::clone(&frame));

        // Energy right in band 0 (bin 5)
        let input = sine(5.0, 1.0);
        for _ in 0..10 {
            a.analyze(&input);
            assert_eq!(frame.get(0), 0.42);
        }
        assert!(a.raw_bands()[0] > 0.0);
    }

    #[test]
    fn test_smoothing_law() {
        let frame = Arc::new(SpectrumFrame::new());
        let previous: [f32; NUM_BANDS] = core::array::from_fn(|i| i as f32 / 20.0);
        for (i, v) in previous.iter().enumerate() {
            frame.store(i, *v);
        }
        let mut a = SpectrumAnalyzer::new(N, Arc::clone(&frame));
        a.analyze(&sine(200.0, 0.05));

        let raw = a.raw_bands();
        for i in 1..NUM_BANDS {
            let expected = 0.8 * previous[i] + 0.2 * raw[i];
            assert!(
                (frame.get(i) - expected).abs() < 1e-6,
                "band {}: {} != {}",
                i,
                frame.get(i),
                expected
            );
        }
    }

    #[test]
    fn test_tone_lands_in_expected_band() {
        let mut a = analyzer();
        // Bin 240 of 512 is in band 7 (238..272)
        let input = sine(240.0, 0.05);
        for _ in 0..30 {
            a.analyze(&input);
        }
        let spectrum = a.output().snapshot();
        let loudest = (1..NUM_BANDS)
            .max_by(|&x, &y| spectrum[x].partial_cmp(&spectrum[y]).unwrap())
            .unwrap();
        assert_eq!(loudest, 7);
    }

    #[test]
    fn test_silence_decays_towards_zero() {
        let mut a = analyzer();
        let loud = sine(100.0, 1.0);
        a.analyze(&loud);
        // Bin 100 is in band 2 (68..102)
        let after_loud = a.output().get(2);
        assert!(after_loud > 0.1);
        let silence = vec![0.0; N];
        for _ in 0..20 {
            a.analyze(&silence);
        }
        assert!(a.output().get(2) < after_loud * 0.05);
    }

    #[test]
    fn test_replans_on_size_change() {
        let mut a = analyzer();
        a.analyze(&vec![0.1; 256]);
        assert_eq!(a.frame_size(), 256);
        a.analyze(&vec![0.1; N]);
        assert_eq!(a.frame_size(), N);
    }
}
