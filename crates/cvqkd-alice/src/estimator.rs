//! Photon-Number Estimation Procedure
//!
//! After a frame's emission has ended, the station re-measures its own
//! output: first a dark baseline with the DAC silent, then the power while
//! the quantum-only waveform loops continuously through the modulator.
//! Feeding both averages into [`cvqkd_core::photon::mean_photon_number`]
//! yields the ⟨n⟩ reported to the peer during parameter estimation.
//!
//! The DAC is switched to continuous playback for the measurement and
//! restored to one-shot mode afterwards, whatever the outcome.

use cvqkd_core::photon::{self, Estimate};
use cvqkd_core::types::IQSample;
use cvqkd_core::Config;
use cvqkd_hal::{EmissionMode, HalResult, OpticalBench};
use std::time::Duration;
use tracing::{debug, info};

/// Average `reads` powermeter samples spaced by `interval`
fn average_power(
    bench: &mut OpticalBench,
    reads: usize,
    interval: Duration,
) -> HalResult<f64> {
    let mut total = 0.0;
    for i in 0..reads {
        total += bench.powermeter.read()?;
        if i + 1 < reads && !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
    Ok(total / reads as f64)
}

/// Run the full two-point measurement and compute ⟨n⟩
pub fn estimate_photon_number(
    bench: &mut OpticalBench,
    quantum: &[IQSample],
    config: &Config,
) -> HalResult<Estimate> {
    let meter = &config.alice.powermeter;
    let interval = Duration::from_millis(meter.read_interval_ms);
    let settle = Duration::from_millis(meter.settle_ms);

    bench.dac.set_mode(EmissionMode::Continuous)?;

    let result = (|| {
        let dark = average_power(bench, meter.reads, interval)?;
        debug!(dark, "dark baseline measured");

        bench.dac.load(quantum)?;
        bench.dac.start()?;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        let lit = average_power(bench, meter.reads, interval)?;
        bench.dac.stop()?;
        debug!(lit, "quantum-waveform power measured");

        Ok(photon::mean_photon_number(
            lit,
            dark,
            config.alice.photodiode_to_output_conversion,
            config.frame.quantum.symbol_rate,
            config.alice.emission_wavelength,
        ))
    })();

    // Restore one-shot playback even when the measurement failed.
    let restore = bench.dac.set_mode(EmissionMode::OneShot);
    let estimate = result?;
    restore?;

    info!(
        n_mean = estimate.n_mean,
        suspect = estimate.suspect,
        "photon number estimation finished"
    );
    Ok(estimate)
}
