//! Zadoff-Chu Synchronisation Preamble
//!
//! The frame starts with a Zadoff-Chu (ZC) sequence so the receiver can
//! locate the frame boundary and correct clock offsets before touching the
//! quantum samples.
//!
//! ## Properties
//!
//! - **Constant amplitude**: every sample has unit magnitude, so the
//!   preamble never drives the modulator harder than the DAC range.
//! - **Zero cyclic autocorrelation**: the circular autocorrelation peaks at
//!   lag 0 with magnitude `N` and is essentially zero elsewhere, giving a
//!   sharp timing estimate.
//!
//! ## Definition
//!
//! For length `N` and root `u` coprime with `N`:
//!
//! ```text
//! x_u[n] = exp(-j · π · u · n · (n + 1) / N),   0 <= n < N
//! ```

use crate::types::{DspError, DspResult, IQBuffer, IQSample};
use std::f64::consts::PI;

/// Greatest common divisor (Euclid)
pub fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Generate a Zadoff-Chu sequence
///
/// Fails if `root` is not coprime with `length`: non-coprime roots lose
/// the constant-amplitude zero-autocorrelation property.
pub fn zadoff_chu(root: usize, length: usize) -> DspResult<IQBuffer> {
    if length == 0 || gcd(root % length.max(1), length) != 1 {
        return Err(DspError::RootNotCoprime { root, length });
    }
    let n = length as f64;
    Ok((0..length)
        .map(|k| {
            let kf = k as f64;
            let phase = -PI * root as f64 * kf * (kf + 1.0) / n;
            IQSample::new(phase.cos(), phase.sin())
        })
        .collect())
}

/// Generate a Zadoff-Chu sequence with each sample repeated `repeat` times
///
/// Repetition lowers the effective preamble rate relative to the DAC rate,
/// which relaxes the receiver's acquisition bandwidth.
pub fn zadoff_chu_repeated(root: usize, length: usize, repeat: usize) -> DspResult<IQBuffer> {
    let base = zadoff_chu(root, length)?;
    if repeat <= 1 {
        return Ok(base);
    }
    let mut out = Vec::with_capacity(base.len() * repeat);
    for sample in base {
        for _ in 0..repeat {
            out.push(sample);
        }
    }
    Ok(out)
}

/// Circular autocorrelation magnitude at each lag
pub fn cyclic_autocorrelation(sequence: &[IQSample]) -> Vec<f64> {
    let len = sequence.len();
    (0..len)
        .map(|lag| {
            let sum: IQSample = (0..len)
                .map(|n| sequence[n] * sequence[(n + lag) % len].conj())
                .sum();
            sum.norm()
        })
        .collect()
}
