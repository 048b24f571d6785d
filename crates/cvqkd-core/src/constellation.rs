//! Quantum Symbol Sources
//!
//! Draws the complex symbols that modulate the coherent states. The
//! constellation variance equals the configured modulation variance `Va`
//! expressed in shot-noise units; for a coherent-state protocol
//! `Va = 2⟨n⟩` where `⟨n⟩` is the mean photon number per symbol.
//!
//! ## Supported constellations
//!
//! - **Gaussian**: i.i.d. circularly-symmetric complex normal, the
//!   canonical CV-QKD modulation. Each quadrature is `N(0, Va/2)`.
//! - **PSK**: `M` points on a circle of radius `sqrt(Va)`, drawn uniformly.
//! - **QAM**: square `M`-ary grid scaled so the constellation variance is
//!   exactly `Va`, drawn uniformly.
//!
//! The block returned by [`SymbolSource::draw`] is the ground truth later
//! revealed (in part) to the receiver for parameter estimation; nothing
//! downstream ever mutates it.

use crate::types::{DspError, DspResult, IQBuffer, IQSample};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// Modulation scheme for the quantum symbols
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constellation {
    /// Continuous Gaussian modulation
    Gaussian,
    /// Phase-shift keying with `order` points
    Psk { order: usize },
    /// Quadrature-amplitude modulation with `order` points (square grid)
    Qam { order: usize },
}

impl Constellation {
    /// Validate the modulation order
    ///
    /// PSK orders must be powers of two; QAM orders must additionally be
    /// perfect squares so the grid is square.
    pub fn validate(&self) -> DspResult<()> {
        match *self {
            Constellation::Gaussian => Ok(()),
            Constellation::Psk { order } => {
                if order >= 2 && order.is_power_of_two() {
                    Ok(())
                } else {
                    Err(DspError::InvalidModulationSize(order, "PSK"))
                }
            }
            Constellation::Qam { order } => {
                let side = (order as f64).sqrt().round() as usize;
                if order >= 4 && order.is_power_of_two() && side * side == order {
                    Ok(())
                } else {
                    Err(DspError::InvalidModulationSize(order, "QAM"))
                }
            }
        }
    }

    /// Constellation points at unit variance, for the discrete schemes
    fn unit_points(&self) -> Vec<IQSample> {
        match *self {
            Constellation::Gaussian => Vec::new(),
            Constellation::Psk { order } => (0..order)
                .map(|k| {
                    let angle = 2.0 * PI * k as f64 / order as f64 + PI / order as f64;
                    IQSample::new(angle.cos(), angle.sin())
                })
                .collect(),
            Constellation::Qam { order } => {
                let side = (order as f64).sqrt().round() as usize;
                // Odd-integer grid {±1, ±3, ...}, then scaled to unit variance.
                let energy = 2.0 * (order as f64 - 1.0) / 3.0;
                let scale = 1.0 / energy.sqrt();
                let level = |i: usize| (2.0 * i as f64 - (side as f64 - 1.0)) * scale;
                let mut points = Vec::with_capacity(order);
                for qi in 0..side {
                    for ii in 0..side {
                        points.push(IQSample::new(level(ii), level(qi)));
                    }
                }
                points
            }
        }
    }
}

/// Draws symbol blocks from a constellation at a fixed variance
#[derive(Debug)]
pub struct SymbolSource {
    constellation: Constellation,
    variance: f64,
    /// Pre-computed points for the discrete schemes, already at variance `Va`
    points: Vec<IQSample>,
    rng: StdRng,
}

impl SymbolSource {
    /// Create a source seeded from the operating system
    pub fn new(constellation: Constellation, variance: f64) -> DspResult<Self> {
        Self::with_rng(constellation, variance, StdRng::from_entropy())
    }

    /// Create a deterministic source (testing and replay)
    pub fn with_seed(constellation: Constellation, variance: f64, seed: u64) -> DspResult<Self> {
        Self::with_rng(constellation, variance, StdRng::seed_from_u64(seed))
    }

    fn with_rng(constellation: Constellation, variance: f64, rng: StdRng) -> DspResult<Self> {
        constellation.validate()?;
        let scale = variance.sqrt();
        let points = constellation
            .unit_points()
            .into_iter()
            .map(|p| p * scale)
            .collect();
        Ok(Self {
            constellation,
            variance,
            points,
            rng,
        })
    }

    /// The configured modulation variance `Va`
    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Draw a block of `count` symbols
    pub fn draw(&mut self, count: usize) -> DspResult<IQBuffer> {
        if count == 0 {
            return Err(DspError::EmptyBlock);
        }
        let block = match self.constellation {
            Constellation::Gaussian => {
                // Circularly symmetric: each quadrature carries Va/2.
                let normal = Normal::new(0.0, (self.variance / 2.0).sqrt())
                    .map_err(|_| DspError::InvalidModulationSize(0, "Gaussian"))?;
                (0..count)
                    .map(|_| {
                        IQSample::new(normal.sample(&mut self.rng), normal.sample(&mut self.rng))
                    })
                    .collect()
            }
            _ => (0..count)
                .map(|_| self.points[self.rng.gen_range(0..self.points.len())])
                .collect(),
        };
        Ok(block)
    }
}
