//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during DSP operations
#[derive(Error, Debug)]
pub enum DspError {
    #[error("Invalid band index: {0} (must be 0-2)")]
    InvalidBandIndex(usize),

    #[error("Invalid filter coefficients for frequency {frequency}Hz at sample rate {sample_rate}Hz")]
    InvalidCoefficients { frequency: f32, sample_rate: f32 },

    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("Unsupported channel count: {0} (must be 1-{max})", max = crate::MAX_CHANNELS)]
    UnsupportedChannels(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::InvalidBandIndex(7);
        assert!(err.to_string().contains('7'));

        let err = DspError::InvalidCoefficients {
            frequency: 1000.0,
            sample_rate: 48000.0,
        };
        assert!(err.to_string().contains("1000"));

        let err = DspError::UnsupportedChannels(6);
        assert!(err.to_string().contains("1-2"));
    }
}
