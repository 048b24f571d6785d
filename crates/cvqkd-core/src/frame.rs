//! Frame Waveform Builder
//!
//! Assembles the two waveforms of a quantum-information-exchange frame:
//!
//! ```text
//! transmit: [ zeros | Zadoff-Chu | symbols ⊛ RRC · e^{j2πf_s n/f_DAC} + pilots | zeros ]
//! quantum:  [ zeros |   zeros    | symbols ⊛ RRC · e^{j2πf_s n/f_DAC}          | zeros ]
//! ```
//!
//! The *transmit* waveform is what the DAC plays during the frame. The
//! *quantum-only* waveform replaces the preamble with zeros and omits the
//! pilots, so that looping it through the modulator lets the monitoring
//! photodiode measure the optical power the quantum part alone produces.
//! Both waveforms have the same length and are aligned sample for sample.
//!
//! ## Stage contract
//!
//! 1. Upsample by `L = f_DAC / R_s`, symbol `i` at sample `i·L`.
//! 2. Shape with a root-raised-cosine (or rectangular, in pulsed mode);
//!    the group delay is compensated so alignment is preserved.
//! 3. Shift by `f_s` so the signal band sits above DC.
//! 4. Add pilot tones, amplitudes derived from the configured
//!    pilot-to-signal power ratios against the shifted signal's mean square.
//! 5. Prepend the Zadoff-Chu preamble.
//! 6. Pad with zeros head and tail.
//!
//! Given the same parameters and symbol block the output is bit-exact.

use crate::constellation::SymbolSource;
use crate::fft::convolve_same;
use crate::pulse_shaping::{Rectangular, RootRaisedCosine, ShapingFilter};
use crate::types::{complex_ops, DspError, DspResult, IQBuffer, IQSample};
use crate::zadoff_chu::{gcd, zadoff_chu_repeated};
use tracing::debug;

/// Everything the builder needs to know about one frame
#[derive(Debug, Clone)]
pub struct FrameParams {
    /// Number of quantum symbols per frame
    pub num_symbols: usize,
    /// Symbol rate `R_s` in baud
    pub symbol_rate: f64,
    /// DAC sample rate in samples/s
    pub dac_rate: f64,
    /// RRC roll-off β
    pub roll_off: f64,
    /// Shaping filter span in symbols
    pub filter_span: usize,
    /// Frequency shift `f_s` in Hz
    pub frequency_shift: f64,
    /// Pilot tone frequencies in Hz
    pub pilot_frequencies: Vec<f64>,
    /// Pilot-to-signal power ratios, one per pilot
    pub pilot_power_ratios: Vec<f64>,
    /// Zadoff-Chu sequence length
    pub zc_length: usize,
    /// Zadoff-Chu root, coprime with the length
    pub zc_root: usize,
    /// Zadoff-Chu sample rate in Hz; 0 means the DAC rate
    pub zc_rate: f64,
    /// Zero padding before the preamble
    pub zeros_head: usize,
    /// Zero padding after the symbol body
    pub zeros_tail: usize,
    /// Rectangular shaping instead of RRC
    pub pulsed: bool,
}

impl FrameParams {
    /// Upsampling factor `L = f_DAC / R_s`
    ///
    /// Fails when the ratio is not an integer: fractional resampling is not
    /// part of this transmitter.
    pub fn sps(&self) -> DspResult<usize> {
        let ratio = self.dac_rate / self.symbol_rate;
        if !ratio.is_finite() || ratio < 1.0 || (ratio - ratio.round()).abs() > 1e-9 {
            return Err(DspError::NonIntegerUpsampling {
                dac_rate: self.dac_rate,
                symbol_rate: self.symbol_rate,
            });
        }
        Ok(ratio.round() as usize)
    }

    /// Repetition factor of the preamble samples
    pub fn zc_repeat(&self) -> usize {
        if self.zc_rate <= 0.0 {
            1
        } else {
            (self.dac_rate / self.zc_rate).round().max(1.0) as usize
        }
    }

    /// Half-width of the shaped signal band, `B/2 = R_s(1+β)/2`
    pub fn band_edge(&self) -> f64 {
        self.symbol_rate * (1.0 + self.roll_off) / 2.0
    }

    /// Validate every cross-parameter constraint
    pub fn validate(&self) -> DspResult<()> {
        if self.num_symbols == 0 {
            return Err(DspError::EmptyBlock);
        }
        if !(0.0..=1.0).contains(&self.roll_off) {
            return Err(DspError::InvalidRollOff(self.roll_off));
        }
        self.sps()?;
        if self.frequency_shift <= self.band_edge() {
            return Err(DspError::ShiftInsideBand {
                shift: self.frequency_shift,
                band_edge: self.band_edge(),
            });
        }
        if self.zc_length == 0 || gcd(self.zc_root % self.zc_length.max(1), self.zc_length) != 1 {
            return Err(DspError::RootNotCoprime {
                root: self.zc_root,
                length: self.zc_length,
            });
        }
        if self.pilot_frequencies.len() != self.pilot_power_ratios.len() {
            return Err(DspError::PilotMismatch {
                frequencies: self.pilot_frequencies.len(),
                ratios: self.pilot_power_ratios.len(),
            });
        }
        Ok(())
    }
}

/// One generated frame: the two waveforms plus the symbol ground truth
#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Waveform played by the DAC during the frame
    pub transmit: IQBuffer,
    /// Same symbols, no pilots, zeroed preamble; used for photon-number
    /// estimation
    pub quantum: IQBuffer,
    /// The symbols as drawn, untouched by the DSP
    pub symbols: IQBuffer,
}

/// Deterministic builder for frame waveforms
#[derive(Debug)]
pub struct FrameGenerator {
    params: FrameParams,
    sps: usize,
    taps: Vec<f64>,
    delay: usize,
    center_gain: f64,
    preamble: IQBuffer,
}

impl FrameGenerator {
    /// Build a generator after validating the parameters
    pub fn new(params: FrameParams) -> DspResult<Self> {
        params.validate()?;
        let sps = params.sps()?;
        let (taps, delay, center_gain) = if params.pulsed {
            let filter = Rectangular::new(sps);
            (filter.taps().to_vec(), filter.delay(), filter.center_gain())
        } else {
            let filter = RootRaisedCosine::new(params.roll_off, params.filter_span, sps);
            (filter.taps().to_vec(), filter.delay(), filter.center_gain())
        };
        let preamble = zadoff_chu_repeated(params.zc_root, params.zc_length, params.zc_repeat())?;
        debug!(
            sps,
            filter_len = taps.len(),
            preamble_len = preamble.len(),
            "frame generator ready"
        );
        Ok(Self {
            params,
            sps,
            taps,
            delay,
            center_gain,
            preamble,
        })
    }

    pub fn params(&self) -> &FrameParams {
        &self.params
    }

    /// Samples per symbol
    pub fn sps(&self) -> usize {
        self.sps
    }

    /// Length of the preamble region in samples
    pub fn preamble_len(&self) -> usize {
        self.preamble.len()
    }

    /// Total frame length: `head + N_ZC·repeat + N·L + tail`
    pub fn frame_len(&self) -> usize {
        self.params.zeros_head
            + self.preamble.len()
            + self.params.num_symbols * self.sps
            + self.params.zeros_tail
    }

    /// Filter response at the symbol instant
    ///
    /// A lone symbol `s` at index `i` appears in the quantum waveform at
    /// sample `head + preamble_len + i·L` with value
    /// `s · center_gain · e^{j2πf_s·iL/f_DAC}`.
    pub fn center_gain(&self) -> f64 {
        self.center_gain
    }

    /// Draw a fresh symbol block and build both waveforms
    pub fn generate(&self, source: &mut SymbolSource) -> DspResult<FrameOutput> {
        let symbols = source.draw(self.params.num_symbols)?;
        let (transmit, quantum) = self.build(&symbols)?;
        Ok(FrameOutput {
            transmit,
            quantum,
            symbols,
        })
    }

    /// Build both waveforms from an existing symbol block
    pub fn build(&self, symbols: &[IQSample]) -> DspResult<(IQBuffer, IQBuffer)> {
        if symbols.len() != self.params.num_symbols {
            return Err(DspError::EmptyBlock);
        }

        // Stages 1-3 are shared by both run modes.
        let upsampled = upsample(symbols, self.sps);
        let mut body = convolve_same(&upsampled, &self.taps, self.delay);
        frequency_shift(&mut body, self.params.frequency_shift, self.params.dac_rate);

        // Stage 4 applies to the transmit path only.
        let pilots = pilot_waveform(
            body.len(),
            &self.params.pilot_frequencies,
            &self.params.pilot_power_ratios,
            complex_ops::average_power(&body),
            self.params.dac_rate,
        );

        let head = self.params.zeros_head;
        let tail = self.params.zeros_tail;
        let zero = IQSample::new(0.0, 0.0);

        let mut transmit = Vec::with_capacity(self.frame_len());
        transmit.resize(head, zero);
        transmit.extend_from_slice(&self.preamble);
        transmit.extend(body.iter().zip(pilots.iter()).map(|(s, p)| s + p));
        transmit.resize(transmit.len() + tail, zero);

        let mut quantum = Vec::with_capacity(self.frame_len());
        quantum.resize(head + self.preamble.len(), zero);
        quantum.extend_from_slice(&body);
        quantum.resize(quantum.len() + tail, zero);

        debug_assert_eq!(transmit.len(), quantum.len());
        Ok((transmit, quantum))
    }
}

/// Insert `sps - 1` zeros between consecutive symbols
///
/// Symbol `i` lands at sample `i·sps`.
pub fn upsample(symbols: &[IQSample], sps: usize) -> IQBuffer {
    let mut out = vec![IQSample::new(0.0, 0.0); symbols.len() * sps];
    for (i, &s) in symbols.iter().enumerate() {
        out[i * sps] = s;
    }
    out
}

/// Multiply sample `n` by `exp(2πi·shift·n/sample_rate)` in place
pub fn frequency_shift(samples: &mut [IQSample], shift: f64, sample_rate: f64) {
    for (n, s) in samples.iter_mut().enumerate() {
        *s *= complex_ops::cis(shift, n, sample_rate);
    }
}

/// Sum of pilot tones sized against the signal's mean square
///
/// Pilot `i` gets amplitude `sqrt(ratio_i · signal_power)` so its power
/// relative to the quantum signal equals the configured ratio.
pub fn pilot_waveform(
    len: usize,
    frequencies: &[f64],
    power_ratios: &[f64],
    signal_power: f64,
    sample_rate: f64,
) -> IQBuffer {
    let mut out = vec![IQSample::new(0.0, 0.0); len];
    for (&freq, &ratio) in frequencies.iter().zip(power_ratios.iter()) {
        let amplitude = (ratio * signal_power).sqrt();
        for (n, s) in out.iter_mut().enumerate() {
            *s += amplitude * complex_ops::cis(freq, n, sample_rate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constellation::Constellation;
    use approx::assert_relative_eq;

    fn test_params() -> FrameParams {
        FrameParams {
            num_symbols: 64,
            symbol_rate: 100e6,
            dac_rate: 500e6,
            roll_off: 0.5,
            filter_span: 10,
            frequency_shift: 150e6,
            pilot_frequencies: vec![180e6, 200e6],
            pilot_power_ratios: vec![0.05, 0.02],
            zc_length: 13,
            zc_root: 3,
            zc_rate: 0.0,
            zeros_head: 7,
            zeros_tail: 11,
            pulsed: false,
        }
    }

    #[test]
    fn waveforms_have_identical_expected_length() {
        let generator = FrameGenerator::new(test_params()).unwrap();
        let mut source = SymbolSource::with_seed(Constellation::Gaussian, 2.0, 5).unwrap();
        let out = generator.generate(&mut source).unwrap();
        let expected = 7 + 13 + 64 * 5 + 11;
        assert_eq!(out.transmit.len(), expected);
        assert_eq!(out.quantum.len(), expected);
        assert_eq!(generator.frame_len(), expected);
        assert_eq!(out.symbols.len(), 64);
    }

    #[test]
    fn lone_symbol_aligns_at_its_slot() {
        let params = test_params();
        let generator = FrameGenerator::new(params.clone()).unwrap();
        let mut symbols = vec![IQSample::new(0.0, 0.0); params.num_symbols];
        let value = IQSample::new(0.8, -0.3);
        symbols[9] = value;
        let (_, quantum) = generator.build(&symbols).unwrap();

        let sps = generator.sps();
        let body_index = 9 * sps;
        let sample = quantum[params.zeros_head + generator.preamble_len() + body_index];
        let expected = value
            * generator.center_gain()
            * complex_ops::cis(params.frequency_shift, body_index, params.dac_rate);
        assert_relative_eq!(sample.re, expected.re, epsilon = 1e-9);
        assert_relative_eq!(sample.im, expected.im, epsilon = 1e-9);
    }

    #[test]
    fn quantum_waveform_has_no_preamble_and_no_pilots() {
        let params = test_params();
        let generator = FrameGenerator::new(params.clone()).unwrap();
        let mut source = SymbolSource::with_seed(Constellation::Gaussian, 2.0, 17).unwrap();
        let out = generator.generate(&mut source).unwrap();

        // Head, preamble slot and tail are all exactly zero.
        let preamble_end = params.zeros_head + generator.preamble_len();
        for s in &out.quantum[..preamble_end] {
            assert_eq!(*s, IQSample::new(0.0, 0.0));
        }
        for s in &out.quantum[out.quantum.len() - params.zeros_tail..] {
            assert_eq!(*s, IQSample::new(0.0, 0.0));
        }

        // The transmit-minus-quantum difference over the body is the pilot
        // waveform; its average power is the configured fraction of the
        // body power (cross terms of distinct tones average out).
        let body_len = params.num_symbols * generator.sps();
        let diff: IQBuffer = (0..body_len)
            .map(|j| out.transmit[preamble_end + j] - out.quantum[preamble_end + j])
            .collect();
        let body: IQBuffer = out.quantum[preamble_end..preamble_end + body_len].to_vec();
        let ratio = complex_ops::average_power(&diff) / complex_ops::average_power(&body);
        assert!(
            (ratio - 0.07).abs() < 0.01,
            "pilot-to-signal power ratio {} should be near 0.07",
            ratio
        );
    }

    #[test]
    fn preamble_region_is_constant_amplitude() {
        let params = test_params();
        let generator = FrameGenerator::new(params.clone()).unwrap();
        let mut source = SymbolSource::with_seed(Constellation::Gaussian, 2.0, 3).unwrap();
        let out = generator.generate(&mut source).unwrap();
        for s in &out.transmit[params.zeros_head..params.zeros_head + generator.preamble_len()] {
            assert_relative_eq!(s.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn pulsed_mode_keeps_the_same_geometry() {
        let mut params = test_params();
        params.pulsed = true;
        let generator = FrameGenerator::new(params).unwrap();
        let mut source = SymbolSource::with_seed(Constellation::Gaussian, 2.0, 5).unwrap();
        let out = generator.generate(&mut source).unwrap();
        assert_eq!(out.transmit.len(), generator.frame_len());
        assert_eq!(out.quantum.len(), generator.frame_len());
    }

    #[test]
    fn zc_rate_reduction_expands_the_preamble() {
        let mut params = test_params();
        params.zc_rate = params.dac_rate / 2.0;
        let generator = FrameGenerator::new(params.clone()).unwrap();
        assert_eq!(generator.preamble_len(), params.zc_length * 2);
        assert_eq!(
            generator.frame_len(),
            params.zeros_head + 2 * 13 + 64 * 5 + params.zeros_tail
        );
    }

    #[test]
    fn builder_is_deterministic() {
        let generator = FrameGenerator::new(test_params()).unwrap();
        let mut source = SymbolSource::with_seed(Constellation::Psk { order: 4 }, 2.0, 21).unwrap();
        let symbols = source.draw(64).unwrap();
        let (a_tx, a_q) = generator.build(&symbols).unwrap();
        let (b_tx, b_q) = generator.build(&symbols).unwrap();
        assert_eq!(a_tx, b_tx);
        assert_eq!(a_q, b_q);
    }

    #[test]
    fn rejects_fractional_upsampling() {
        let mut params = test_params();
        params.dac_rate = 430e6;
        assert!(matches!(
            FrameGenerator::new(params),
            Err(DspError::NonIntegerUpsampling { .. })
        ));
    }

    #[test]
    fn rejects_shift_inside_band() {
        let mut params = test_params();
        params.frequency_shift = 70e6; // band edge is 75 MHz
        assert!(matches!(
            FrameGenerator::new(params),
            Err(DspError::ShiftInsideBand { .. })
        ));
    }
}
