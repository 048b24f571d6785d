//! # CV-QKD Transmitter Core
//!
//! This crate provides the signal-generation pipeline and control-protocol
//! plumbing for the transmitter ("Alice") side of a continuous-variable
//! quantum key distribution link.
//!
//! ## Overview
//!
//! Alice prepares coherent states by drawing complex symbols from a
//! configured constellation, shaping them into a baseband waveform and
//! driving an optical IQ modulator through a DAC. A remote receiver ("Bob")
//! measures the quadratures, estimates the channel, and the two sides
//! cooperate over a request/response control channel.
//!
//! ## Signal Flow
//!
//! ```text
//! Symbols ──▶ Upsample ──▶ RRC shape ──▶ Frequency shift ──┬─▶ + Pilots ─▶ + ZC ─▶ Pad ─▶ transmit
//!                                                          │
//!                                                          └───────────────▶ zeros ─▶ Pad ─▶ quantum-only
//! ```
//!
//! The *transmit* waveform carries the quantum symbols, classical pilot
//! tones and a Zadoff-Chu synchronisation preamble. The *quantum-only*
//! waveform carries the same symbols through the same chain but with the
//! pilots omitted and the preamble zeroed, so that a monitoring photodiode
//! sees the power of the quantum part alone. Both waveforms have identical
//! length and sample-for-sample time alignment.
//!
//! ## Modules
//!
//! - [`constellation`]: Gaussian / PSK / QAM symbol sources
//! - [`pulse_shaping`]: root-raised-cosine and rectangular shaping filters
//! - [`fft`]: FFT-backed convolution used by the shaping stage
//! - [`zadoff_chu`]: CAZAC synchronisation preamble
//! - [`frame`]: the full waveform builder and sequence assembler
//! - [`photon`]: mean photon number from monitoring-power measurements
//! - [`config`]: TOML configuration snapshot with up-front validation
//! - [`protocol`]: control-protocol codes, payloads and wire codec

pub mod config;
pub mod constellation;
pub mod fft;
pub mod frame;
pub mod photon;
pub mod protocol;
pub mod pulse_shaping;
pub mod types;
pub mod zadoff_chu;

pub use config::{Config, ConfigError};
pub use frame::{FrameGenerator, FrameOutput};
pub use types::{DspError, DspResult, IQBuffer, IQSample};
