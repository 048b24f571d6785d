//! Hardware Selection and Startup
//!
//! Builds the optical bench from the configured device selectors and runs
//! the startup sequence: laser on, VOA at its configured attenuation,
//! modulator bias locked. Any failure here is fatal to the process; the
//! protocol never starts on a half-initialised bench.
//!
//! Only the simulated bench ships with this repository; real drivers
//! register under their own selector strings.

use cvqkd_core::Config;
use cvqkd_hal::{sim, HalError, HalResult, OpticalBench};
use tracing::info;

/// Build the bench selected by the configuration
pub fn build_bench(config: &Config) -> HalResult<OpticalBench> {
    let selectors = [
        config.alice.dac.device.as_str(),
        config.alice.voa.device.as_str(),
        config.alice.laser.device.as_str(),
        config.alice.powermeter.device.as_str(),
        config.alice.bias_controller.device.as_str(),
    ];
    for selector in selectors {
        if selector != "sim" {
            return Err(HalError::DeviceNotFound(selector.to_string()));
        }
    }
    let (bench, _state) = sim::bench(rand::random());
    Ok(bench)
}

/// Bring the bench to its operating point
pub fn startup(bench: &mut OpticalBench, config: &Config) -> HalResult<()> {
    info!("enabling laser");
    bench.laser.enable()?;
    info!(
        attenuation = config.alice.voa.attenuation,
        "setting VOA attenuation"
    );
    bench.voa.set_attenuation(config.alice.voa.attenuation)?;
    info!("locking modulator bias");
    bench.bias.lock()?;
    Ok(())
}
