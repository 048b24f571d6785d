//! Control-Protocol Server
//!
//! Accepts exactly one peer at a time on the configured endpoint and runs
//! the request/response state machine. The receive pipeline for every
//! incoming frame is:
//!
//! 1. Transport errors (disconnect, unknown code, bad authentication tag,
//!    framing error) are handled first and terminate the frame.
//! 2. General codes (abort, disconnection, invalid-response,
//!    change-parameter) are valid in any connected state.
//! 3. The phase gate [`check_code`] refuses anything the current state
//!    does not allow, without mutating it.
//! 4. The handler runs; state mutation and reply emission form one atomic
//!    step from the peer's perspective, with no suspension point inside.
//!
//! Replies are emitted in request order and the server never sends an
//! unsolicited message, except DISCONNECTION during an operator-driven
//! graceful stop. Hardware failures inside a handler are fatal to the
//! frame only: the peer gets FRAME_ENDED with error content, the session
//! falls back to `Authenticated` so the peer can re-initialize, and the
//! listener keeps accepting. A full `reset` (abort, disconnect, operator
//! reset) instead drops to `Listening`: the peer must reconnect before
//! anything, identification included, is accepted again.

use crate::admin::{self, AdminAction};
use crate::estimator;
use crate::state::{check_code, FrameContext, ProtocolPhase};
use cvqkd_core::constellation::SymbolSource;
use cvqkd_core::frame::FrameGenerator;
use cvqkd_core::protocol::{messages, Code, FrameCodec, WireError, PROTOCOL_VERSION};
use cvqkd_core::types::{complex_ops, IQSample};
use cvqkd_core::Config;
use cvqkd_hal::{EmissionMode, OpticalBench};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Socket poll period; bounds the admin-menu latency
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// One outgoing frame
pub type Reply = (Code, Value);

/// What the connection loop should do after a batch of replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    CloseConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdminOutcome {
    Continue,
    Stop,
}

/// Errors that abort the server loop itself
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// The transmitter station server
///
/// Owns the protocol state, the active frame and the optical bench; the
/// admin handler reaches it only through the interrupt flag polled between
/// frames.
pub struct AliceServer {
    config: Arc<Config>,
    config_path: PathBuf,
    bench: OpticalBench,
    phase: ProtocolPhase,
    frame: Option<FrameContext>,
    noise_rng: StdRng,
}

impl AliceServer {
    pub fn new(config: Arc<Config>, config_path: PathBuf, bench: OpticalBench) -> Self {
        Self {
            config,
            config_path,
            bench,
            phase: ProtocolPhase::Listening,
            frame: None,
            noise_rng: StdRng::from_entropy(),
        }
    }

    /// Open the phase gate for a freshly accepted peer
    pub fn on_peer_connected(&mut self) {
        self.phase = ProtocolPhase::Connected;
    }

    /// Current protocol phase
    pub fn phase(&self) -> ProtocolPhase {
        self.phase
    }

    /// The active frame, if any
    pub fn frame(&self) -> Option<&FrameContext> {
        self.frame.as_ref()
    }

    /// Current configuration snapshot
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Return to the initial state, as if no peer had ever connected
    ///
    /// A peer still attached after a reset must reconnect: every command
    /// on the old session, identification included, is refused until the
    /// accept loop admits it again.
    pub fn reset(&mut self) {
        info!("resetting server state");
        let _ = self.bench.dac.stop();
        self.phase = ProtocolPhase::Listening;
        self.frame = None;
    }

    /// Swap in a freshly parsed configuration snapshot
    ///
    /// Refused while a frame is in flight; on a parse or validation error
    /// the previous snapshot stays in place. Hardware that is already
    /// initialised is not re-initialised.
    pub fn reload_config(&mut self) -> Result<(), String> {
        if self.phase >= ProtocolPhase::FramePrepared {
            warn!("configuration reload refused: a frame is in flight");
            return Err("a frame is in flight".to_string());
        }
        match Config::load(&self.config_path) {
            Ok(next) => {
                info!(
                    path = %self.config_path.display(),
                    "configuration reloaded; hardware already initialised is not re-initialised"
                );
                self.config = Arc::new(next);
                Ok(())
            }
            Err(e) => {
                error!("configuration reload failed, keeping the previous snapshot: {e}");
                Err(e.to_string())
            }
        }
    }

    /// Process one receive result and produce the replies
    ///
    /// This is the whole per-frame pipeline; the socket plumbing in
    /// [`AliceServer::serve`] only moves bytes.
    pub fn handle(&mut self, incoming: Result<(Code, Value), WireError>) -> (Vec<Reply>, Flow) {
        let (code, payload) = match incoming {
            Ok(pair) => pair,
            Err(WireError::Timeout) => return (Vec::new(), Flow::Continue),
            Err(WireError::Disconnected) => {
                warn!("client has disconnected");
                self.reset();
                return (Vec::new(), Flow::CloseConnection);
            }
            Err(WireError::UnknownCode(raw)) => {
                warn!(code = raw, "unknown code received");
                return (vec![(Code::UnknownCommand, Value::Null)], Flow::Continue);
            }
            Err(WireError::AuthFailure) => {
                warn!("frame authentication failure; client is no longer authenticated");
                self.phase = ProtocolPhase::Connected;
                self.frame = None;
                return (
                    vec![(Code::AuthenticationInvalid, Value::Null)],
                    Flow::Continue,
                );
            }
            Err(WireError::Malformed(reason)) => {
                warn!(%reason, "frame error");
                return (
                    vec![(
                        Code::InvalidContent,
                        json!({ "error_message": reason }),
                    )],
                    Flow::Continue,
                );
            }
        };

        debug!(?code, "message received");

        // General codes, valid in any connected state.
        match code {
            Code::Abort => {
                let reason = serde_json::from_value::<messages::Abort>(payload)
                    .ok()
                    .and_then(|m| m.abort_message);
                error!(?reason, "abort received");
                self.reset();
                return (vec![(Code::AbortAck, Value::Null)], Flow::Continue);
            }
            Code::InvalidResponse => {
                let reason = serde_json::from_value::<messages::InvalidResponse>(payload)
                    .ok()
                    .and_then(|m| m.error_message);
                error!(?reason, "peer reported an invalid response");
                return (vec![(Code::InvalidResponseAck, Value::Null)], Flow::Continue);
            }
            Code::Disconnection => {
                info!("client is going to disconnect");
                self.reset();
                return (
                    vec![(Code::DisconnectionAck, Value::Null)],
                    Flow::CloseConnection,
                );
            }
            Code::ChangeParameterRequest => {
                return (self.on_change_parameter(payload), Flow::Continue);
            }
            _ => {}
        }

        if !check_code(code, self.phase) {
            warn!(
                ?code,
                phase = ?self.phase,
                "code is not a valid command for the current state"
            );
            return (vec![(Code::UnexpectedCommand, Value::Null)], Flow::Continue);
        }

        let replies = match code {
            Code::IdentificationRequest => self.on_identification(payload),
            Code::InitializationRequest => self.on_initialization(payload),
            Code::InitializationRequestConfig => {
                error!("configuration exchange is not implemented");
                vec![(Code::UnexpectedCommand, Value::Null)]
            }
            Code::QieRequest => self.on_qie_request(),
            Code::QieTrigger => self.on_qie_trigger(),
            Code::QieAcquisitionEnded => self.on_acquisition_ended(),
            Code::PeSymbolsRequest => self.on_symbols_request(payload),
            Code::PeNphotonRequest => self.on_nphoton_request(),
            Code::PeFinished => self.on_pe_finished(payload),
            Code::EcInitialization | Code::EcBlock | Code::EcRemaining | Code::EcVerification => {
                error!("error correction is not implemented");
                vec![(Code::UnexpectedCommand, Value::Null)]
            }
            Code::FrameEnded => self.on_frame_ended(),
            Code::RequestPolarisationRecovery => self.on_start_polarisation(),
            Code::EndPolarisationRecovery => self.on_end_polarisation(),
            _ => vec![(Code::UnexpectedCommand, Value::Null)],
        };
        (replies, Flow::Continue)
    }

    fn on_identification(&mut self, payload: Value) -> Vec<Reply> {
        let msg: messages::Identification = match serde_json::from_value(payload) {
            Ok(msg) => msg,
            Err(_) => {
                return vec![invalid_content(
                    Code::IdentificationRequest,
                    "serial_number or protocol_version missing from content",
                )]
            }
        };
        if msg.protocol_version != PROTOCOL_VERSION {
            error!(
                ours = PROTOCOL_VERSION,
                theirs = %msg.protocol_version,
                "protocol versions are not compatible"
            );
            return vec![(
                Code::InvalidVersion,
                json!({ "protocol_version": PROTOCOL_VERSION }),
            )];
        }
        info!(serial_number = %msg.serial_number, "client identified");
        self.phase = ProtocolPhase::Authenticated;
        vec![(
            Code::IdentificationResponse,
            json!({ "serial_number": self.config.serial_number }),
        )]
    }

    fn on_initialization(&mut self, payload: Value) -> Vec<Reply> {
        let msg: messages::Initialization = match serde_json::from_value(payload) {
            Ok(msg) => msg,
            Err(_) => {
                return vec![invalid_content(
                    Code::InitializationRequest,
                    "frame_uuid missing from content",
                )]
            }
        };
        info!(frame_uuid = %msg.frame_uuid, "client initialized; starting frame");
        self.frame = Some(FrameContext::new(msg.frame_uuid));
        self.phase = ProtocolPhase::Initialized;
        vec![(Code::InitializationAccepted, Value::Null)]
    }

    fn on_qie_request(&mut self) -> Vec<Reply> {
        info!("quantum information exchange requested; starting DSP");
        match self.prepare_frame() {
            Ok(()) => vec![(Code::QieReady, Value::Null)],
            Err(message) => self.frame_fatal(message),
        }
    }

    /// Generate both waveforms and load the DAC
    fn prepare_frame(&mut self) -> Result<(), String> {
        let config = self.config.clone();
        let generator = FrameGenerator::new(config.frame_params()).map_err(|e| e.to_string())?;
        let constellation = config.constellation().map_err(|e| e.to_string())?;
        let variance = config.frame.quantum.variance;
        let mut source = match config.frame.quantum.seed {
            Some(seed) => SymbolSource::with_seed(constellation, variance, seed),
            None => SymbolSource::new(constellation, variance),
        }
        .map_err(|e| e.to_string())?;

        let output = generator.generate(&mut source).map_err(|e| e.to_string())?;

        let mut transmit = output.transmit;
        let noise_variance = config.alice.artificial_excess_noise;
        if noise_variance > 0.0 {
            warn!(
                noise_variance,
                "adding artificial excess noise to the DAC payload"
            );
            let normal = Normal::new(0.0, (noise_variance / 2.0).sqrt())
                .map_err(|_| "artificial excess noise variance is not finite".to_string())?;
            for s in &mut transmit {
                *s += IQSample::new(
                    normal.sample(&mut self.noise_rng),
                    normal.sample(&mut self.noise_rng),
                );
            }
        }

        let peak = complex_ops::peak_quadrature(&transmit);
        if peak > 1.0 {
            return Err(cvqkd_core::DspError::AmplitudeOutOfRange(peak).to_string());
        }

        self.bench
            .dac
            .set_mode(EmissionMode::OneShot)
            .map_err(|e| e.to_string())?;
        self.bench.dac.load(&transmit).map_err(|e| e.to_string())?;

        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| "no frame registered".to_string())?;
        frame.symbols = output.symbols;
        frame.quantum = output.quantum;
        frame.photon = None;
        self.phase = ProtocolPhase::FramePrepared;
        info!(samples = frame.quantum.len(), "frame prepared and loaded");
        Ok(())
    }

    fn on_qie_trigger(&mut self) -> Vec<Reply> {
        match self.bench.dac.start() {
            Ok(()) => {
                info!("emission started");
                self.phase = ProtocolPhase::FrameSent;
                vec![(Code::QieEmissionStarted, Value::Null)]
            }
            Err(e) => self.frame_fatal(format!("failed to start emission: {e}")),
        }
    }

    fn on_acquisition_ended(&mut self) -> Vec<Reply> {
        info!("acquisition ended; stopping emission");
        if let Err(e) = self.bench.dac.stop() {
            return self.frame_fatal(format!("failed to stop emission: {e}"));
        }
        let quantum = match &self.frame {
            Some(frame) => frame.quantum.clone(),
            None => return self.frame_fatal("no frame registered".to_string()),
        };
        match estimator::estimate_photon_number(&mut self.bench, &quantum, &self.config) {
            Ok(estimate) => {
                if let Some(frame) = self.frame.as_mut() {
                    frame.photon = Some(estimate);
                }
                self.phase = ProtocolPhase::AcquisitionEnded;
                vec![(Code::QieEnded, Value::Null)]
            }
            Err(e) => self.frame_fatal(format!("photon number estimation failed: {e}")),
        }
    }

    fn on_symbols_request(&mut self, payload: Value) -> Vec<Reply> {
        let msg: messages::SymbolsRequest = match serde_json::from_value(payload) {
            Ok(msg) => msg,
            Err(_) => {
                return vec![invalid_content(
                    Code::PeSymbolsRequest,
                    "indices missing from content",
                )]
            }
        };
        let Some(frame) = self.frame.as_ref() else {
            return vec![(
                Code::PeSymbolsError,
                json!({ "error_message": "no frame registered" }),
            )];
        };
        let mut real = Vec::with_capacity(msg.indices.len());
        let mut imag = Vec::with_capacity(msg.indices.len());
        for &index in &msg.indices {
            match frame.symbols.get(index) {
                Some(s) => {
                    real.push(s.re);
                    imag.push(s.im);
                }
                None => {
                    error!(index, "requested symbol index out of range");
                    return vec![(
                        Code::PeSymbolsError,
                        json!({ "error_message": format!("index {index} out of range") }),
                    )];
                }
            }
        }
        info!(count = msg.indices.len(), "revealing symbols");
        vec![(
            Code::PeSymbolsResponse,
            json!({ "symbols_real": real, "symbols_imag": imag }),
        )]
    }

    fn on_nphoton_request(&mut self) -> Vec<Reply> {
        let estimate = self.frame.as_ref().and_then(|f| f.photon);
        match estimate {
            Some(estimate) => {
                info!(n_photon = estimate.n_mean, "photon number requested");
                vec![(
                    Code::PeNphotonResponse,
                    json!({ "n_photon": estimate.n_mean, "suspect": estimate.suspect }),
                )]
            }
            None => vec![invalid_content(
                Code::PeNphotonRequest,
                "no photon number available for this frame",
            )],
        }
    }

    fn on_pe_finished(&mut self, payload: Value) -> Vec<Reply> {
        let msg: messages::PeFinished = match serde_json::from_value(payload) {
            Ok(msg) => msg,
            Err(_) => {
                return vec![invalid_content(
                    Code::PeFinished,
                    "one of n_photon, transmittance, excess_noise, electronic_noise, eta, \
                     key_rate is missing from content",
                )]
            }
        };
        info!(
            transmittance = msg.transmittance,
            excess_noise = msg.excess_noise,
            eta = msg.eta,
            key_rate = msg.key_rate,
            "parameter estimation finished"
        );
        self.phase = ProtocolPhase::PeEnded;
        if msg.key_rate > 0.0 {
            info!("parameter estimation approved");
            vec![(Code::PeApproved, Value::Null)]
        } else {
            error!(key_rate = msg.key_rate, "key rate is not positive");
            vec![(
                Code::PeDenied,
                json!({ "deny_message": "key rate is not positive" }),
            )]
        }
    }

    fn on_frame_ended(&mut self) -> Vec<Reply> {
        let uuid = self.frame.as_ref().map(|f| f.uuid);
        match uuid {
            Some(uuid) => info!(frame_uuid = %uuid, "frame ended"),
            None => info!("frame ended"),
        }
        self.frame = None;
        self.phase = ProtocolPhase::Authenticated;
        let ack = messages::FrameEnded {
            frame_uuid: uuid,
            error_message: None,
        };
        vec![(
            Code::FrameEndedAck,
            serde_json::to_value(ack).unwrap_or(Value::Null),
        )]
    }

    fn on_change_parameter(&mut self, payload: Value) -> Vec<Reply> {
        let msg: messages::ChangeParameter = match serde_json::from_value(payload) {
            Ok(msg) => msg,
            Err(_) => {
                return vec![invalid_content(
                    Code::ChangeParameterRequest,
                    "parameter or value missing from content",
                )]
            }
        };
        info!(parameter = %msg.parameter, value = %msg.value, "parameter change requested");

        if !self.config.alice.accept_parameter_changes {
            warn!("parameter change refused by policy");
            return vec![(
                Code::ParameterRefused,
                json!({ "parameter": msg.parameter, "reason": "refused by policy" }),
            )];
        }
        if self.phase >= ProtocolPhase::FramePrepared {
            warn!("parameter change refused while a frame is in flight");
            return vec![(
                Code::ParameterRefused,
                json!({ "parameter": msg.parameter, "reason": "a frame is in flight" }),
            )];
        }

        match self.config.with_parameter(&msg.parameter, &msg.value) {
            Ok((next, old_value)) => {
                if msg.parameter == "alice.voa.attenuation" {
                    if let Err(e) = self.bench.voa.set_attenuation(next.alice.voa.attenuation) {
                        error!("could not apply the new VOA attenuation: {e}");
                        return vec![(
                            Code::ParameterRefused,
                            json!({ "parameter": msg.parameter, "reason": e.to_string() }),
                        )];
                    }
                }
                info!(
                    parameter = %msg.parameter,
                    old = %old_value,
                    new = %msg.value,
                    "parameter changed"
                );
                self.config = Arc::new(next);
                vec![(
                    Code::ParameterChanged,
                    json!({
                        "parameter": msg.parameter,
                        "old_value": old_value,
                        "new_value": msg.value,
                    }),
                )]
            }
            Err(e) => {
                warn!("parameter change rejected: {e}");
                vec![(
                    Code::ParameterUnknown,
                    json!({ "parameter": msg.parameter, "reason": e.to_string() }),
                )]
            }
        }
    }

    fn on_start_polarisation(&mut self) -> Vec<Reply> {
        let recovery = &self.config.alice.polarisation_recovery;
        info!(
            frequency = recovery.frequency,
            "starting polarisation recovery tone"
        );
        let tone: Vec<IQSample> = (0..100_000usize)
            .map(|n| {
                recovery.amplitude
                    * complex_ops::cis(recovery.frequency, n, self.config.alice.dac.rate)
            })
            .collect();
        let result = self
            .bench
            .dac
            .set_mode(EmissionMode::Continuous)
            .and_then(|_| self.bench.dac.load(&tone))
            .and_then(|_| self.bench.dac.start());
        match result {
            Ok(()) => vec![(Code::PolarisationRecoveryAck, Value::Null)],
            Err(e) => self.frame_fatal(format!("polarisation recovery failed: {e}")),
        }
    }

    fn on_end_polarisation(&mut self) -> Vec<Reply> {
        info!("stopping polarisation recovery tone");
        let result = self
            .bench
            .dac
            .stop()
            .and_then(|_| self.bench.dac.set_mode(EmissionMode::OneShot));
        match result {
            Ok(()) => vec![(Code::PolarisationRecoveryEnded, Value::Null)],
            Err(e) => self.frame_fatal(format!("polarisation recovery stop failed: {e}")),
        }
    }

    /// End the frame on a hardware or DSP failure
    ///
    /// The narrower cousin of [`AliceServer::reset`]: only the per-frame
    /// fields are cleared and the session falls back to `Authenticated`,
    /// so the peer can start over with a bare INITIALIZATION_REQUEST.
    fn frame_fatal(&mut self, message: String) -> Vec<Reply> {
        error!(%message, "fatal error; ending the frame");
        let _ = self.bench.dac.stop();
        let uuid = self.frame.as_ref().map(|f| f.uuid);
        self.frame = None;
        self.phase = ProtocolPhase::Authenticated;
        let ended = messages::FrameEnded {
            frame_uuid: uuid,
            error_message: Some(message),
        };
        vec![(
            Code::FrameEnded,
            serde_json::to_value(ended).unwrap_or(Value::Null),
        )]
    }

    /// Run the accept/serve loop until the operator stops the server
    pub fn serve(&mut self) -> Result<(), ServerError> {
        let addr = format!(
            "{}:{}",
            self.config.network.bind_address, self.config.network.bind_port
        );
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        info!(%addr, "server listening; waiting for a client to connect");

        loop {
            if admin::take_interrupt() {
                if self.run_admin_menu(None) == AdminOutcome::Stop {
                    break;
                }
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!(%peer, "client connected");
                    self.on_peer_connected();
                    if self.serve_client(stream)? {
                        break;
                    }
                    info!("waiting for a client to connect");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => warn!("accept error: {e}"),
            }
        }

        self.bench.teardown();
        Ok(())
    }

    /// Serve one connected peer; returns true when the operator stopped
    /// the server
    fn serve_client(&mut self, mut stream: TcpStream) -> Result<bool, ServerError> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let codec = FrameCodec::new(&self.config.authentication);

        loop {
            if admin::take_interrupt() {
                if self.run_admin_menu(Some((&codec, &mut stream))) == AdminOutcome::Stop {
                    return Ok(true);
                }
            }
            let incoming = codec.read_frame(&mut stream);
            if matches!(incoming, Err(WireError::Timeout)) {
                continue;
            }
            let (replies, flow) = self.handle(incoming);
            for (code, payload) in &replies {
                if let Err(e) = codec.write_frame(&mut stream, *code, payload) {
                    warn!("failed to send reply: {e}");
                    self.reset();
                    return Ok(false);
                }
            }
            if flow == Flow::CloseConnection {
                return Ok(false);
            }
        }
    }

    /// Open the operator menu; the socket is not serviced while it runs
    fn run_admin_menu(&mut self, peer: Option<(&FrameCodec, &mut TcpStream)>) -> AdminOutcome {
        match admin::prompt(&self.config_path) {
            AdminAction::PrintConfig => println!("{}", self.config.to_toml_string()),
            AdminAction::ReloadConfig => {
                let _ = self.reload_config();
            }
            AdminAction::ResetState => self.reset(),
            AdminAction::Stop => {
                info!("operator requested a graceful stop");
                if let Some((codec, stream)) = peer {
                    let _ = codec.write_frame(stream, Code::Disconnection, &Value::Null);
                }
                return AdminOutcome::Stop;
            }
            AdminAction::Cancel => {}
        }
        AdminOutcome::Continue
    }
}

fn invalid_content(code: Code, message: &str) -> Reply {
    (
        Code::InvalidContent,
        json!({ "code": code.as_u16(), "error_message": message }),
    )
}
