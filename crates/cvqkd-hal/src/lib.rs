//! Hardware Abstraction for the CV-QKD Transmitter
//!
//! The optical bench is modelled as a small set of capabilities, each a
//! trait object owned by the server:
//!
//! - [`Dac`]: loads the IQ waveform and drives the optical modulator
//! - [`Voa`]: variable optical attenuator setting the output level
//! - [`Laser`]: the continuous-wave source
//! - [`Powermeter`]: the monitoring photodiode tap
//! - [`BiasController`]: locks the IQ modulator at its operating point
//!
//! Concrete drivers live outside the core and are selected by
//! configuration; the [`sim`] module provides simulated devices that share
//! one optical-bus state so the powermeter actually sees what the DAC
//! emits, which is what the test suite runs against.
//!
//! Every operation reports success or failure; the server treats any
//! failure during a frame as fatal to that frame.

pub mod sim;

use cvqkd_core::types::IQSample;

/// Result type for hardware operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors reported by hardware capabilities
#[derive(Debug, Clone, thiserror::Error)]
pub enum HalError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("{device}: {message}")]
    Device { device: String, message: String },

    #[error("value {value} outside supported range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl HalError {
    /// Shorthand for a device-scoped failure
    pub fn device(device: &str, message: impl Into<String>) -> Self {
        Self::Device {
            device: device.to_string(),
            message: message.into(),
        }
    }
}

/// How the DAC plays the loaded waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionMode {
    /// Play the waveform once per trigger
    OneShot,
    /// Loop the waveform until stopped
    Continuous,
}

/// Digital-to-analog converter driving the optical IQ modulator
pub trait Dac: Send {
    /// Load an IQ waveform into the device buffer
    fn load(&mut self, waveform: &[IQSample]) -> HalResult<()>;

    /// Select one-shot or looping playback
    fn set_mode(&mut self, mode: EmissionMode) -> HalResult<()>;

    /// Start emission; returns immediately
    fn start(&mut self) -> HalResult<()>;

    /// Stop emission
    fn stop(&mut self) -> HalResult<()>;

    /// True while the device is emitting
    fn is_emitting(&self) -> bool;

    /// Release the device
    fn close(&mut self) -> HalResult<()>;
}

/// Variable optical attenuator
pub trait Voa: Send {
    /// Set the attenuation in dB, returning the value actually applied
    fn set_attenuation(&mut self, db: f64) -> HalResult<f64>;

    /// Current attenuation in dB
    fn attenuation(&self) -> f64;

    fn close(&mut self) -> HalResult<()>;
}

/// Continuous-wave laser source
pub trait Laser: Send {
    fn enable(&mut self) -> HalResult<()>;

    fn disable(&mut self) -> HalResult<()>;

    fn is_enabled(&self) -> bool;

    fn close(&mut self) -> HalResult<()>;
}

/// Monitoring photodiode power readout
pub trait Powermeter: Send {
    /// One power reading in watts
    fn read(&mut self) -> HalResult<f64>;

    fn close(&mut self) -> HalResult<()>;
}

/// Modulator bias controller
pub trait BiasController: Send {
    /// Acquire and hold the modulator operating point
    fn lock(&mut self) -> HalResult<()>;

    fn close(&mut self) -> HalResult<()>;
}

/// The assembled optical bench, owned exclusively by the server loop
pub struct OpticalBench {
    pub dac: Box<dyn Dac>,
    pub voa: Box<dyn Voa>,
    pub laser: Box<dyn Laser>,
    pub powermeter: Box<dyn Powermeter>,
    pub bias: Box<dyn BiasController>,
}

impl OpticalBench {
    /// Shut everything down in reverse initialisation order
    ///
    /// Errors are logged and swallowed: teardown must always run to
    /// completion.
    pub fn teardown(&mut self) {
        tracing::info!("closing hardware");
        if let Err(e) = self.bias.close() {
            tracing::warn!("bias controller close failed: {e}");
        }
        if let Err(e) = self.powermeter.close() {
            tracing::warn!("powermeter close failed: {e}");
        }
        if let Err(e) = self.dac.stop() {
            tracing::warn!("dac stop failed: {e}");
        }
        if let Err(e) = self.dac.close() {
            tracing::warn!("dac close failed: {e}");
        }
        if let Err(e) = self.voa.close() {
            tracing::warn!("voa close failed: {e}");
        }
        if let Err(e) = self.laser.disable() {
            tracing::warn!("laser disable failed: {e}");
        }
        if let Err(e) = self.laser.close() {
            tracing::warn!("laser close failed: {e}");
        }
    }
}
