//! FFT-backed convolution for the shaping stage
//!
//! The shaping filter is applied by multiplying spectra rather than by
//! direct convolution: with frames of tens of thousands of samples and
//! filter spans of a few hundred taps this is both faster and matches the
//! numerical path of the reference signal chain.
//!
//! The processor plans forward and inverse transforms once per size and
//! reuses its scratch buffer across calls.

use crate::types::{IQBuffer, IQSample};
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

/// FFT processor for a fixed transform size
pub struct FftProcessor {
    size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    scratch: Vec<IQSample>,
}

impl fmt::Debug for FftProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftProcessor")
            .field("size", &self.size)
            .finish()
    }
}

impl FftProcessor {
    /// Create a processor for the given transform size
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let scratch = vec![IQSample::new(0.0, 0.0); scratch_len];
        Self {
            size,
            forward,
            inverse,
            scratch,
        }
    }

    /// Transform size
    pub fn size(&self) -> usize {
        self.size
    }

    fn fft(&mut self, buffer: &mut [IQSample]) {
        self.forward.process_with_scratch(buffer, &mut self.scratch);
    }

    fn ifft(&mut self, buffer: &mut [IQSample]) {
        self.inverse.process_with_scratch(buffer, &mut self.scratch);
        let norm = 1.0 / self.size as f64;
        for s in buffer.iter_mut() {
            *s *= norm;
        }
    }
}

/// Linear convolution trimmed to the input length
///
/// Computes `signal * taps` and returns the `signal.len()` samples starting
/// at `delay`, so a symmetric filter of group delay `delay` yields an
/// output aligned with its input.
pub fn convolve_same(signal: &[IQSample], taps: &[f64], delay: usize) -> IQBuffer {
    if signal.is_empty() || taps.is_empty() {
        return Vec::new();
    }
    let full_len = signal.len() + taps.len() - 1;
    let size = full_len.next_power_of_two();
    let mut processor = FftProcessor::new(size);

    let mut a: IQBuffer = signal.to_vec();
    a.resize(size, IQSample::new(0.0, 0.0));
    let mut b: IQBuffer = taps.iter().map(|&t| IQSample::new(t, 0.0)).collect();
    b.resize(size, IQSample::new(0.0, 0.0));

    processor.fft(&mut a);
    processor.fft(&mut b);
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x *= *y;
    }
    processor.ifft(&mut a);

    a[delay..delay + signal.len()].to_vec()
}
