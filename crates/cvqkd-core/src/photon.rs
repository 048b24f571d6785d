//! Mean Photon Number Estimation
//!
//! Alice calibrates her optical output by comparing two monitoring-photodiode
//! readings: a dark baseline `P₀` and the power `P_q` measured while the
//! quantum-only waveform loops through the modulator. The mean photon number
//! per symbol is then
//!
//! ```text
//! ⟨n⟩ = r_conv · (P_q - P₀) / (E_ph · R_s),    E_ph = h·c / λ
//! ```
//!
//! where `r_conv` converts the monitor reading to the power at Alice's
//! output. A non-positive power difference is clamped to `⟨n⟩ = 0` and the
//! estimate is flagged suspect; the receiver decides whether to accept the
//! frame.

use tracing::{info, warn};

/// Planck constant in J·s (CODATA 2018 exact value)
pub const PLANCK: f64 = 6.626_070_15e-34;

/// Speed of light in vacuum in m/s
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Energy of one photon at `wavelength` metres, in joules
pub fn photon_energy(wavelength: f64) -> f64 {
    PLANCK * SPEED_OF_LIGHT / wavelength
}

/// Result of a photon-number estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Mean photon number per symbol, never negative
    pub n_mean: f64,
    /// True when the raw power difference was non-positive
    pub suspect: bool,
}

/// Compute ⟨n⟩ from the two monitor readings
///
/// # Arguments
/// - `power_lit`: monitor power with the quantum waveform looping, in W
/// - `power_dark`: monitor power with no emission, in W
/// - `conversion`: monitor-to-output conversion factor `r_conv`
/// - `symbol_rate`: symbol rate `R_s` in baud
/// - `wavelength`: emission wavelength λ in metres
pub fn mean_photon_number(
    power_lit: f64,
    power_dark: f64,
    conversion: f64,
    symbol_rate: f64,
    wavelength: f64,
) -> Estimate {
    let delta = power_lit - power_dark;
    if delta <= 0.0 {
        warn!(
            power_lit,
            power_dark, "monitor saw no excess power; photon number clamped to zero"
        );
        return Estimate {
            n_mean: 0.0,
            suspect: true,
        };
    }
    let n_mean = conversion * delta / (photon_energy(wavelength) * symbol_rate);
    info!(n_mean, "photon number estimated");
    Estimate {
        n_mean,
        suspect: false,
    }
}
