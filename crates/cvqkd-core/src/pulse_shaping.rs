//! Pulse Shaping Filters
//!
//! Shapes the upsampled symbol train before it reaches the optical
//! modulator. The default is a root-raised-cosine: the receiver applies
//! the matched RRC so the cascade is a raised cosine with zero ISI at the
//! symbol instants. A rectangular shape is available for pulsed operation.

use std::f64::consts::PI;

/// Interface shared by the shaping filters
pub trait ShapingFilter: std::fmt::Debug + Send + Sync {
    /// Impulse response taps
    fn taps(&self) -> &[f64];

    /// Filter length in samples
    fn len(&self) -> usize {
        self.taps().len()
    }

    fn is_empty(&self) -> bool {
        self.taps().is_empty()
    }

    /// Group delay in samples
    ///
    /// The taps are symmetric, so the delay is half the span. The waveform
    /// builder slices the convolution output by this amount to keep symbol
    /// `i` aligned at sample `i·L`.
    fn delay(&self) -> usize {
        (self.len() - 1) / 2
    }

    /// Response at the symbol instant (the centre tap)
    fn center_gain(&self) -> f64 {
        self.taps()[self.delay()]
    }
}

/// Root Raised Cosine filter
///
/// Truncated closed-form impulse response of length `span·sps + 1`,
/// normalised to unit energy.
#[derive(Debug, Clone)]
pub struct RootRaisedCosine {
    taps: Vec<f64>,
    rolloff: f64,
}

impl RootRaisedCosine {
    /// Create a new RRC filter
    ///
    /// # Arguments
    /// - `rolloff`: roll-off factor β in [0, 1]
    /// - `span`: filter span in symbols
    /// - `sps`: samples per symbol
    pub fn new(rolloff: f64, span: usize, sps: usize) -> Self {
        assert!((0.0..=1.0).contains(&rolloff), "roll-off must be in [0, 1]");
        assert!(span > 0, "span must be positive");
        assert!(sps > 0, "samples per symbol must be positive");

        let length = span * sps + 1;
        let delay = (length - 1) / 2;
        let ts = 1.0 / sps as f64;

        let mut taps = vec![0.0; length];
        for (i, tap) in taps.iter_mut().enumerate() {
            let t = (i as f64 - delay as f64) * ts;

            if t.abs() < 1e-10 {
                *tap = 1.0 - rolloff + 4.0 * rolloff / PI;
            } else if rolloff > 0.0 && ((4.0 * rolloff * t).abs() - 1.0).abs() < 1e-10 {
                // Removable singularity at t = ±1/(4β)
                let term1 = (1.0 + 2.0 / PI) * (PI / (4.0 * rolloff)).sin();
                let term2 = (1.0 - 2.0 / PI) * (PI / (4.0 * rolloff)).cos();
                *tap = rolloff / 2.0_f64.sqrt() * (term1 + term2);
            } else {
                let pi_t = PI * t;
                let four_beta_t = 4.0 * rolloff * t;
                let num =
                    (pi_t * (1.0 - rolloff)).sin() + four_beta_t * (pi_t * (1.0 + rolloff)).cos();
                let denom = pi_t * (1.0 - four_beta_t * four_beta_t);
                if denom.abs() > 1e-10 {
                    *tap = num / denom;
                }
            }
        }

        let energy: f64 = taps.iter().map(|&x| x * x).sum();
        if energy > 1e-10 {
            let norm = energy.sqrt();
            for tap in &mut taps {
                *tap /= norm;
            }
        }

        Self { taps, rolloff }
    }

    /// Roll-off factor β
    pub fn rolloff(&self) -> f64 {
        self.rolloff
    }
}

impl ShapingFilter for RootRaisedCosine {
    fn taps(&self) -> &[f64] {
        &self.taps
    }
}

/// Rectangular filter for pulsed operation
///
/// A flat window covering one symbol period, unit-energy normalised like
/// the RRC so both modes share the builder's gain bookkeeping. The length
/// is padded to `sps + 1` taps so the group delay stays half-integer-free.
#[derive(Debug, Clone)]
pub struct Rectangular {
    taps: Vec<f64>,
}

impl Rectangular {
    /// Create a rectangular filter spanning one symbol of `sps` samples
    pub fn new(sps: usize) -> Self {
        assert!(sps > 0, "samples per symbol must be positive");
        let length = sps + 1;
        // Half-weight end taps keep the window symmetric around the centre;
        // the amplitude is chosen so the total energy is exactly 1.
        let value = 1.0 / (sps as f64 - 0.5).sqrt();
        let mut taps = vec![value; length];
        taps[0] = value / 2.0;
        taps[length - 1] = value / 2.0;
        Self { taps }
    }
}

impl ShapingFilter for Rectangular {
    fn taps(&self) -> &[f64] {
        &self.taps
    }
}
