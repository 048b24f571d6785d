//! Simulated Optical Bench
//!
//! All simulated devices hang off one shared [`BenchState`]: the DAC
//! publishes the mean power of the waveform it is playing, the VOA and
//! laser gate it, and the powermeter reads the result plus a dark floor
//! and a little Gaussian sensor noise. This closes the loop the real bench
//! has through the monitoring photodiode, so the photon-number estimation
//! procedure can be exercised end to end without hardware.
//!
//! Fault injection: flipping [`BenchState::fail_dac`] makes the next DAC
//! operation report a device error, which is how the tests drive the
//! frame-fatal error path.

use crate::{BiasController, Dac, EmissionMode, HalError, HalResult, Laser, OpticalBench, Powermeter, Voa};
use cvqkd_core::types::{complex_ops, IQSample};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Shared state of the simulated bench
#[derive(Debug)]
pub struct BenchState {
    /// Mean square of the loaded waveform
    pub loaded_power: f64,
    /// True while the DAC is playing
    pub emitting: bool,
    pub mode: EmissionMode,
    pub attenuation_db: f64,
    pub laser_on: bool,
    /// Powermeter reading with no light, in watts
    pub dark_power: f64,
    /// Watts seen by the monitor per unit of waveform power at 0 dB
    pub responsivity: f64,
    /// Standard deviation of the sensor noise, in watts
    pub sensor_noise: f64,
    /// Next DAC operation fails when set
    pub fail_dac: bool,
}

impl Default for BenchState {
    fn default() -> Self {
        Self {
            loaded_power: 0.0,
            emitting: false,
            mode: EmissionMode::OneShot,
            attenuation_db: 0.0,
            laser_on: false,
            dark_power: 20e-9,
            responsivity: 1e-6,
            sensor_noise: 0.0,
            fail_dac: false,
        }
    }
}

impl BenchState {
    /// Optical power currently visible at the monitor tap
    fn monitor_power(&self) -> f64 {
        if self.emitting && self.laser_on {
            let gain = 10f64.powf(-self.attenuation_db / 10.0);
            self.dark_power + self.responsivity * self.loaded_power * gain
        } else {
            self.dark_power
        }
    }
}

/// Handle shared by every simulated device
pub type SharedBench = Arc<Mutex<BenchState>>;

/// Build a complete simulated bench
///
/// Returns the assembled [`OpticalBench`] plus the shared state handle for
/// test instrumentation (fault injection, power inspection).
pub fn bench(seed: u64) -> (OpticalBench, SharedBench) {
    let state: SharedBench = Arc::new(Mutex::new(BenchState::default()));
    let bench = OpticalBench {
        dac: Box::new(SimDac {
            state: state.clone(),
        }),
        voa: Box::new(SimVoa {
            state: state.clone(),
        }),
        laser: Box::new(SimLaser {
            state: state.clone(),
        }),
        powermeter: Box::new(SimPowermeter {
            state: state.clone(),
            rng: StdRng::seed_from_u64(seed),
        }),
        bias: Box::new(SimBiasController { locked: false }),
    };
    (bench, state)
}

/// Simulated DAC
pub struct SimDac {
    state: SharedBench,
}

impl SimDac {
    fn check_fault(&self, state: &mut BenchState) -> HalResult<()> {
        if state.fail_dac {
            state.fail_dac = false;
            return Err(HalError::device("sim-dac", "injected fault"));
        }
        Ok(())
    }
}

impl Dac for SimDac {
    fn load(&mut self, waveform: &[IQSample]) -> HalResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check_fault(&mut state)?;
        state.loaded_power = complex_ops::average_power(waveform);
        debug!(samples = waveform.len(), power = state.loaded_power, "dac loaded");
        Ok(())
    }

    fn set_mode(&mut self, mode: EmissionMode) -> HalResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check_fault(&mut state)?;
        state.mode = mode;
        Ok(())
    }

    fn start(&mut self) -> HalResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check_fault(&mut state)?;
        state.emitting = true;
        Ok(())
    }

    fn stop(&mut self) -> HalResult<()> {
        let mut state = self.state.lock().unwrap();
        state.emitting = false;
        Ok(())
    }

    fn is_emitting(&self) -> bool {
        self.state.lock().unwrap().emitting
    }

    fn close(&mut self) -> HalResult<()> {
        self.stop()
    }
}

/// Simulated variable optical attenuator with a 0-60 dB span
pub struct SimVoa {
    state: SharedBench,
}

impl Voa for SimVoa {
    fn set_attenuation(&mut self, db: f64) -> HalResult<f64> {
        if !(0.0..=60.0).contains(&db) {
            return Err(HalError::OutOfRange {
                value: db,
                min: 0.0,
                max: 60.0,
            });
        }
        // Quantise to the 0.1 dB step of a typical bench attenuator.
        let applied = (db * 10.0).round() / 10.0;
        self.state.lock().unwrap().attenuation_db = applied;
        Ok(applied)
    }

    fn attenuation(&self) -> f64 {
        self.state.lock().unwrap().attenuation_db
    }

    fn close(&mut self) -> HalResult<()> {
        Ok(())
    }
}

/// Simulated laser
pub struct SimLaser {
    state: SharedBench,
}

impl Laser for SimLaser {
    fn enable(&mut self) -> HalResult<()> {
        self.state.lock().unwrap().laser_on = true;
        Ok(())
    }

    fn disable(&mut self) -> HalResult<()> {
        self.state.lock().unwrap().laser_on = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().laser_on
    }

    fn close(&mut self) -> HalResult<()> {
        self.disable()
    }
}

/// Simulated monitoring photodiode
pub struct SimPowermeter {
    state: SharedBench,
    rng: StdRng,
}

impl Powermeter for SimPowermeter {
    fn read(&mut self) -> HalResult<f64> {
        let state = self.state.lock().unwrap();
        let power = state.monitor_power();
        let noise = state.sensor_noise;
        drop(state);
        if noise > 0.0 {
            let normal = Normal::new(0.0, noise)
                .map_err(|_| HalError::device("sim-powermeter", "bad noise setting"))?;
            Ok((power + normal.sample(&mut self.rng)).max(0.0))
        } else {
            Ok(power)
        }
    }

    fn close(&mut self) -> HalResult<()> {
        Ok(())
    }
}

/// Simulated bias controller; locks instantly
pub struct SimBiasController {
    locked: bool,
}

impl BiasController for SimBiasController {
    fn lock(&mut self) -> HalResult<()> {
        self.locked = true;
        Ok(())
    }

    fn close(&mut self) -> HalResult<()> {
        self.locked = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn powermeter_sees_dark_floor_until_emission() {
        let (mut bench, _state) = bench(1);
        bench.laser.enable().unwrap();
        let dark = bench.powermeter.read().unwrap();
        assert_relative_eq!(dark, 20e-9, epsilon = 1e-15);

        let wave = vec![IQSample::new(0.5, 0.0); 64];
        bench.dac.load(&wave).unwrap();
        bench.dac.start().unwrap();
        let lit = bench.powermeter.read().unwrap();
        assert!(lit > dark, "emission must raise the monitor power");
        assert_relative_eq!(lit - dark, 1e-6 * 0.25, epsilon = 1e-12);

        bench.dac.stop().unwrap();
        assert_relative_eq!(bench.powermeter.read().unwrap(), dark, epsilon = 1e-15);
    }

    #[test]
    fn attenuation_scales_the_monitor_power() {
        let (mut bench, _state) = bench(2);
        bench.laser.enable().unwrap();
        let wave = vec![IQSample::new(1.0, 0.0); 16];
        bench.dac.load(&wave).unwrap();
        bench.dac.start().unwrap();

        let p0 = bench.powermeter.read().unwrap() - 20e-9;
        bench.voa.set_attenuation(10.0).unwrap();
        let p10 = bench.powermeter.read().unwrap() - 20e-9;
        assert_relative_eq!(p10 / p0, 0.1, epsilon = 1e-9);
    }

    #[test]
    fn voa_rejects_out_of_range_settings() {
        let (mut bench, _state) = bench(3);
        assert!(bench.voa.set_attenuation(-1.0).is_err());
        assert!(bench.voa.set_attenuation(90.0).is_err());
        assert_relative_eq!(bench.voa.set_attenuation(30.05).unwrap(), 30.1, epsilon = 1e-12);
    }

    #[test]
    fn injected_fault_fails_exactly_once() {
        let (mut bench, state) = bench(4);
        state.lock().unwrap().fail_dac = true;
        assert!(bench.dac.start().is_err());
        assert!(bench.dac.start().is_ok());
    }

    #[test]
    fn laser_off_blocks_the_signal() {
        let (mut bench, _state) = bench(5);
        let wave = vec![IQSample::new(1.0, 0.0); 16];
        bench.dac.load(&wave).unwrap();
        bench.dac.start().unwrap();
        // Laser never enabled: only the dark floor shows.
        assert_relative_eq!(bench.powermeter.read().unwrap(), 20e-9, epsilon = 1e-15);
    }
}
