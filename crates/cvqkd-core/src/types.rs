//! Core types for the transmitter DSP
//!
//! Complex baseband samples are the working currency of every stage in the
//! pipeline: a symbol is a point in the (I, Q) plane, and the waveform
//! handed to the DAC is a sequence of such points at the DAC rate.
//!
//! ```text
//!            Q (Imaginary)
//!            ^
//!            |     * (I=0.7, Q=0.7)
//!            |    /
//!            |   /  magnitude = |s|
//!            |  /   phase = arg(s)
//!            | /
//!   ---------+---------> I (Real)
//!            |
//! ```

use num_complex::Complex64;
use std::f64::consts::PI;

/// Type alias for complex numbers using f64 precision
pub type Complex = Complex64;

/// A single complex baseband sample
pub type IQSample = Complex64;

/// A buffer of complex baseband samples
pub type IQBuffer = Vec<IQSample>;

/// Result type for DSP operations
pub type DspResult<T> = Result<T, DspError>;

/// Errors that can occur while generating a frame
#[derive(Debug, Clone, thiserror::Error)]
pub enum DspError {
    #[error("DAC rate {dac_rate} Hz is not an integer multiple of the symbol rate {symbol_rate} Hz")]
    NonIntegerUpsampling { dac_rate: f64, symbol_rate: f64 },

    #[error("roll-off {0} outside [0, 1]")]
    InvalidRollOff(f64),

    #[error("Zadoff-Chu root {root} is not coprime with length {length}")]
    RootNotCoprime { root: usize, length: usize },

    #[error("frequency shift {shift} Hz does not clear the signal band edge {band_edge} Hz")]
    ShiftInsideBand { shift: f64, band_edge: f64 },

    #[error("modulation size {0} is not supported for {1}")]
    InvalidModulationSize(usize, &'static str),

    #[error("symbol block is empty")]
    EmptyBlock,

    #[error("pilot configuration mismatch: {frequencies} frequencies vs {ratios} power ratios")]
    PilotMismatch { frequencies: usize, ratios: usize },

    #[error("waveform amplitude {0} exceeds the DAC range [-1, 1]")]
    AmplitudeOutOfRange(f64),
}

/// Helper functions for working with complex samples
pub mod complex_ops {
    use super::*;

    /// Create a complex number from magnitude and phase
    #[inline]
    pub fn from_polar(magnitude: f64, phase: f64) -> Complex {
        Complex::new(magnitude * phase.cos(), magnitude * phase.sin())
    }

    /// Complex exponential at `frequency` evaluated at sample `n`
    ///
    /// Returns `exp(2πi · frequency · n / sample_rate)`, the building block
    /// of the frequency-shift and pilot stages.
    #[inline]
    pub fn cis(frequency: f64, n: usize, sample_rate: f64) -> Complex {
        let phase = 2.0 * PI * frequency * n as f64 / sample_rate;
        Complex::new(phase.cos(), phase.sin())
    }

    /// Mean square value (average power) of a signal
    pub fn average_power(samples: &[IQSample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(|s| s.norm_sqr()).sum::<f64>() / samples.len() as f64
    }

    /// Largest absolute value over both quadratures
    pub fn peak_quadrature(samples: &[IQSample]) -> f64 {
        samples
            .iter()
            .map(|s| s.re.abs().max(s.im.abs()))
            .fold(0.0_f64, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn from_polar_quarter_turn() {
        let c = complex_ops::from_polar(1.0, PI / 4.0);
        assert_relative_eq!(c.re, 0.7071067811865476, epsilon = 1e-12);
        assert_relative_eq!(c.im, 0.7071067811865476, epsilon = 1e-12);
    }

    #[test]
    fn cis_is_unit_magnitude() {
        for n in 0..32 {
            let c = complex_ops::cis(150e6, n, 500e6);
            assert_relative_eq!(c.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn average_power_of_unit_circle_points() {
        let samples = vec![
            Complex::new(1.0, 0.0),
            Complex::new(0.0, 1.0),
            Complex::new(-1.0, 0.0),
            Complex::new(0.0, -1.0),
        ];
        assert_relative_eq!(complex_ops::average_power(&samples), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn peak_quadrature_tracks_largest_component() {
        let samples = vec![Complex::new(0.2, -0.9), Complex::new(0.5, 0.1)];
        assert_relative_eq!(complex_ops::peak_quadrature(&samples), 0.9, epsilon = 1e-12);
    }
}
