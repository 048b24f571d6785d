//! Configuration System
//!
//! A single TOML file drives the transmitter: the `[alice]` section owns
//! hardware and calibration values, `[frame]` owns the DSP parameters, and
//! `[network]`/`[authentication]` configure the control channel. A `[bob]`
//! section may be present in a shared deployment file and is ignored.
//!
//! The file is parsed into an immutable snapshot validated up front; the
//! server keeps the snapshot behind an `Arc` and a reload builds a whole
//! new snapshot which is swapped in between frames only.
//!
//! ## Example
//!
//! ```toml
//! serial_number = "alice-lab-1"
//!
//! [network]
//! bind_address = "0.0.0.0"
//! bind_port = 8181
//!
//! [authentication]
//! mode = "hmac-sha256"
//! secret = "shared-secret"
//!
//! [alice]
//! emission_wavelength = 1550e-9
//! photodiode_to_output_conversion = 1.9
//!
//! [frame.quantum]
//! modulation = "gaussian"
//! variance = 0.01
//! num_symbols = 1024
//! symbol_rate = 100e6
//! roll_off = 0.5
//! frequency_shift = 150e6
//!
//! [frame.pilots]
//! frequencies = [180e6, 200e6]
//! power_ratios = [0.05, 0.05]
//!
//! [frame.zadoff_chu]
//! length = 257
//! root = 5
//! ```

use crate::constellation::Constellation;
use crate::frame::FrameParams;
use crate::types::DspError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors raised while loading or mutating the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Dsp(#[from] DspError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Outcome of a peer-requested parameter change
#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    #[error("parameter {0} is not changeable at runtime")]
    Unknown(String),

    #[error("value for {0} has the wrong type")]
    InvalidValue(String),
}

/// Control-channel endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the listener to
    pub bind_address: String,
    /// TCP port of the control channel
    pub bind_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 8181,
        }
    }
}

/// Frame authentication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// No per-frame tag
    None,
    /// HMAC-SHA256 over code and payload
    HmacSha256,
}

/// Control-channel authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Pre-shared secret for the keyed tag
    pub secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            secret: String::new(),
        }
    }
}

/// DAC parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DacConfig {
    /// Device selector, e.g. `sim`
    pub device: String,
    /// Sample rate in samples/s
    pub rate: f64,
    /// Full-scale output amplitude
    pub amplitude: f64,
}

impl Default for DacConfig {
    fn default() -> Self {
        Self {
            device: "sim".to_string(),
            rate: 500e6,
            amplitude: 1.0,
        }
    }
}

/// Variable optical attenuator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoaConfig {
    pub device: String,
    /// Attenuation applied at startup, in dB
    pub attenuation: f64,
}

impl Default for VoaConfig {
    fn default() -> Self {
        Self {
            device: "sim".to_string(),
            attenuation: 30.0,
        }
    }
}

/// Laser parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserConfig {
    pub device: String,
    /// Optical output power in mW
    pub power: f64,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            device: "sim".to_string(),
            power: 10.0,
        }
    }
}

/// Monitoring photodiode / powermeter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowermeterConfig {
    pub device: String,
    /// Number of readings averaged per power estimate
    pub reads: usize,
    /// Delay between readings in milliseconds
    pub read_interval_ms: u64,
    /// Settling time after starting emission, in milliseconds
    pub settle_ms: u64,
}

impl Default for PowermeterConfig {
    fn default() -> Self {
        Self {
            device: "sim".to_string(),
            reads: 20,
            read_interval_ms: 100,
            settle_ms: 500,
        }
    }
}

/// Modulator bias controller parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasControllerConfig {
    pub device: String,
}

impl Default for BiasControllerConfig {
    fn default() -> Self {
        Self {
            device: "sim".to_string(),
        }
    }
}

/// Tone used while the receiver adjusts its polarisation controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolarisationRecoveryConfig {
    pub amplitude: f64,
    /// Tone frequency in Hz
    pub frequency: f64,
}

impl Default for PolarisationRecoveryConfig {
    fn default() -> Self {
        Self {
            amplitude: 0.3,
            frequency: 10e6,
        }
    }
}

/// Everything specific to the transmitter station
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliceConfig {
    /// Emission wavelength λ in metres
    pub emission_wavelength: f64,
    /// Conversion factor between the monitor reading and the output power
    pub photodiode_to_output_conversion: f64,
    /// Gaussian noise variance injected at DAC load; 0 disables it
    pub artificial_excess_noise: f64,
    /// Policy for peer-requested parameter changes
    pub accept_parameter_changes: bool,
    pub dac: DacConfig,
    pub voa: VoaConfig,
    pub laser: LaserConfig,
    pub powermeter: PowermeterConfig,
    pub bias_controller: BiasControllerConfig,
    pub polarisation_recovery: PolarisationRecoveryConfig,
}

impl Default for AliceConfig {
    fn default() -> Self {
        Self {
            emission_wavelength: 1550e-9,
            photodiode_to_output_conversion: 1.0,
            artificial_excess_noise: 0.0,
            accept_parameter_changes: true,
            dac: DacConfig::default(),
            voa: VoaConfig::default(),
            laser: LaserConfig::default(),
            powermeter: PowermeterConfig::default(),
            bias_controller: BiasControllerConfig::default(),
            polarisation_recovery: PolarisationRecoveryConfig::default(),
        }
    }
}

/// Quantum modulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantumConfig {
    /// `gaussian`, `psk` or `qam`
    pub modulation: String,
    /// Constellation order for the discrete modulations
    pub modulation_size: usize,
    /// Modulation variance `Va` in DAC units at the modulator input
    ///
    /// The optical variance is set downstream by the VOA and verified
    /// through the photon-number estimation.
    pub variance: f64,
    /// Symbols per frame
    pub num_symbols: usize,
    /// Symbol rate in baud
    pub symbol_rate: f64,
    /// RRC roll-off β
    pub roll_off: f64,
    /// Frequency shift `f_s` in Hz
    pub frequency_shift: f64,
    /// Shaping filter span in symbols
    pub filter_span: usize,
    /// Rectangular shaping instead of RRC
    pub pulsed: bool,
    /// Optional deterministic seed for the symbol source
    pub seed: Option<u64>,
}

impl Default for QuantumConfig {
    fn default() -> Self {
        Self {
            modulation: "gaussian".to_string(),
            modulation_size: 4,
            variance: 0.01,
            num_symbols: 1024,
            symbol_rate: 100e6,
            roll_off: 0.5,
            frequency_shift: 150e6,
            filter_span: 10,
            pulsed: false,
            seed: None,
        }
    }
}

/// Pilot tone set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotsConfig {
    /// Tone frequencies in Hz
    pub frequencies: Vec<f64>,
    /// Pilot-to-signal power ratios, one per tone
    pub power_ratios: Vec<f64>,
}

impl Default for PilotsConfig {
    fn default() -> Self {
        Self {
            frequencies: vec![180e6, 200e6],
            power_ratios: vec![0.05, 0.05],
        }
    }
}

/// Zadoff-Chu preamble parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZadoffChuConfig {
    pub length: usize,
    /// Root index, coprime with the length
    pub root: usize,
    /// Preamble sample rate in Hz; 0 means the DAC rate
    pub rate: f64,
}

impl Default for ZadoffChuConfig {
    fn default() -> Self {
        Self {
            length: 257,
            root: 5,
            rate: 0.0,
        }
    }
}

/// Frame structure parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub quantum: QuantumConfig,
    pub pilots: PilotsConfig,
    pub zadoff_chu: ZadoffChuConfig,
    /// Zero samples before the preamble
    pub num_zeros_start: usize,
    /// Zero samples after the symbol body
    pub num_zeros_end: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            quantum: QuantumConfig::default(),
            pilots: PilotsConfig::default(),
            zadoff_chu: ZadoffChuConfig::default(),
            num_zeros_start: 0,
            num_zeros_end: 0,
        }
    }
}

/// Immutable configuration snapshot
///
/// Unknown sections (notably `[bob]` in shared deployment files) are
/// ignored by construction: serde only maps the fields declared here.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Station serial number reported during identification
    pub serial_number: String,
    pub network: NetworkConfig,
    pub authentication: AuthConfig,
    pub alice: AliceConfig,
    pub frame: FrameConfig,
}

impl Config {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every constraint that can be checked without hardware
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial_number.is_empty() {
            return Err(ConfigError::Invalid("serial_number is empty".into()));
        }
        if self.authentication.mode == AuthMode::HmacSha256 && self.authentication.secret.is_empty()
        {
            return Err(ConfigError::Invalid(
                "authentication.secret is required in hmac-sha256 mode".into(),
            ));
        }
        let quantum = &self.frame.quantum;
        if quantum.variance <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "frame.quantum.variance must be positive, got {}",
                quantum.variance
            )));
        }
        if self.alice.dac.amplitude <= 0.0 {
            return Err(ConfigError::Invalid(
                "alice.dac.amplitude must be positive".into(),
            ));
        }
        if self.alice.emission_wavelength <= 0.0 {
            return Err(ConfigError::Invalid(
                "alice.emission_wavelength must be positive".into(),
            ));
        }
        if self.alice.photodiode_to_output_conversion <= 0.0 {
            return Err(ConfigError::Invalid(
                "alice.photodiode_to_output_conversion must be positive".into(),
            ));
        }
        if self.alice.powermeter.reads == 0 {
            return Err(ConfigError::Invalid(
                "alice.powermeter.reads must be at least 1".into(),
            ));
        }
        self.constellation()?.validate()?;
        self.frame_params().validate()?;
        Ok(())
    }

    /// The configured constellation
    pub fn constellation(&self) -> Result<Constellation, ConfigError> {
        let quantum = &self.frame.quantum;
        match quantum.modulation.as_str() {
            "gaussian" => Ok(Constellation::Gaussian),
            "psk" => Ok(Constellation::Psk {
                order: quantum.modulation_size,
            }),
            "qam" => Ok(Constellation::Qam {
                order: quantum.modulation_size,
            }),
            other => Err(ConfigError::Invalid(format!(
                "unknown modulation kind {other:?} (expected gaussian, psk or qam)"
            ))),
        }
    }

    /// Bridge to the waveform builder
    pub fn frame_params(&self) -> FrameParams {
        FrameParams {
            num_symbols: self.frame.quantum.num_symbols,
            symbol_rate: self.frame.quantum.symbol_rate,
            dac_rate: self.alice.dac.rate,
            roll_off: self.frame.quantum.roll_off,
            filter_span: self.frame.quantum.filter_span,
            frequency_shift: self.frame.quantum.frequency_shift,
            pilot_frequencies: self.frame.pilots.frequencies.clone(),
            pilot_power_ratios: self.frame.pilots.power_ratios.clone(),
            zc_length: self.frame.zadoff_chu.length,
            zc_root: self.frame.zadoff_chu.root,
            zc_rate: self.frame.zadoff_chu.rate,
            zeros_head: self.frame.num_zeros_start,
            zeros_tail: self.frame.num_zeros_end,
            pulsed: self.frame.quantum.pulsed,
        }
    }

    /// Apply a peer-requested parameter change, returning the new snapshot
    /// and the previous value
    ///
    /// Only a fixed set of dotted paths can be changed at runtime; anything
    /// else is refused without touching the snapshot.
    pub fn with_parameter(
        &self,
        parameter: &str,
        value: &serde_json::Value,
    ) -> Result<(Config, serde_json::Value), ParameterError> {
        let as_f64 = || {
            value
                .as_f64()
                .ok_or_else(|| ParameterError::InvalidValue(parameter.to_string()))
        };
        let mut next = self.clone();
        let old = match parameter {
            "frame.quantum.variance" => {
                let old = self.frame.quantum.variance;
                next.frame.quantum.variance = as_f64()?;
                old
            }
            "alice.voa.attenuation" => {
                let old = self.alice.voa.attenuation;
                next.alice.voa.attenuation = as_f64()?;
                old
            }
            "alice.artificial_excess_noise" => {
                let old = self.alice.artificial_excess_noise;
                next.alice.artificial_excess_noise = as_f64()?;
                old
            }
            _ => return Err(ParameterError::Unknown(parameter.to_string())),
        };
        Ok((next, serde_json::json!(old)))
    }

    /// Render the snapshot back to TOML for the operator console
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|_| "<unrenderable configuration>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        serial_number = "alice-test"

        [frame.quantum]
        num_symbols = 1024
        symbol_rate = 100e6
        roll_off = 0.5
        frequency_shift = 150e6

        [frame.zadoff_chu]
        length = 257
        root = 5

        [bob]
        detector_efficiency = 0.8
    "#;

    #[test]
    fn minimal_file_parses_with_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.serial_number, "alice-test");
        assert_eq!(config.alice.dac.rate, 500e6);
        assert_eq!(config.frame.quantum.num_symbols, 1024);
        // [bob] is ignored entirely.
        assert_eq!(config.network.bind_port, 8181);
    }

    #[test]
    fn rejects_fractional_upsampling_factor() {
        let text = MINIMAL.replace("symbol_rate = 100e6", "symbol_rate = 130e6");
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn rejects_shift_below_band_edge() {
        let text = MINIMAL.replace("frequency_shift = 150e6", "frequency_shift = 50e6");
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn rejects_non_coprime_zadoff_chu_root() {
        let text = MINIMAL
            .replace("length = 257", "length = 256")
            .replace("root = 5", "root = 6");
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn hmac_mode_requires_a_secret() {
        let text = format!("{MINIMAL}\n[authentication]\nmode = \"hmac-sha256\"\n");
        assert!(Config::from_toml(&text).is_err());
    }

    #[test]
    fn parameter_change_whitelist() {
        let config = Config::from_toml(MINIMAL).unwrap();
        let (next, old) = config
            .with_parameter("frame.quantum.variance", &serde_json::json!(0.02))
            .unwrap();
        assert_eq!(old, serde_json::json!(0.01));
        assert_eq!(next.frame.quantum.variance, 0.02);
        // The original snapshot is untouched.
        assert_eq!(config.frame.quantum.variance, 0.01);

        assert!(matches!(
            config.with_parameter("network.bind_port", &serde_json::json!(1)),
            Err(ParameterError::Unknown(_))
        ));
        assert!(matches!(
            config.with_parameter("frame.quantum.variance", &serde_json::json!("x")),
            Err(ParameterError::InvalidValue(_))
        ));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::from_toml(MINIMAL).unwrap();
        let rendered = config.to_toml_string();
        let reparsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(reparsed.frame.quantum.symbol_rate, 100e6);
    }
}
