//! Server Protocol State
//!
//! The session advances through a single ordered phase enum instead of a
//! collection of boolean flags; the phase ordering makes the code gate a
//! total function and leaves no unreachable flag combination to reason
//! about.
//!
//! ```text
//! Listening → Connected → Authenticated → Initialized → FramePrepared → FrameSent
//!     ▲                        ▲                                           │
//!     └── reset()              └────────── FRAME_ENDED                     ▼
//!                                                      AcquisitionEnded → PeEnded
//! ```
//!
//! State-advancing codes require their exact predecessor phase, so a
//! duplicate request is refused with UNEXPECTED_COMMAND; read-only codes
//! require a minimum phase and stay valid while the data they read exists.
//!
//! `Listening` is the initial state and the target of every reset: no code
//! is valid there, identification included, so a peer caught by a reset
//! must reconnect before the gate reopens at `Connected`.

use cvqkd_core::photon::Estimate;
use cvqkd_core::protocol::Code;
use cvqkd_core::types::IQBuffer;
use uuid::Uuid;

/// Where the session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolPhase {
    /// No peer attached; the initial state and the target of `reset()`
    Listening,
    /// A peer is connected but has not identified itself
    Connected,
    /// Identification and version check passed
    Authenticated,
    /// A frame identifier has been registered
    Initialized,
    /// Waveforms are generated and loaded in the DAC
    FramePrepared,
    /// Emission has been triggered
    FrameSent,
    /// Emission stopped and the photon number estimated
    AcquisitionEnded,
    /// The peer delivered its parameter-estimation verdict
    PeEnded,
}

/// Per-frame mutable record
#[derive(Debug, Clone)]
pub struct FrameContext {
    /// Frame identifier chosen by the peer
    pub uuid: Uuid,
    /// Symbol ground truth, as drawn
    pub symbols: IQBuffer,
    /// Quantum-only waveform kept for photon-number estimation
    pub quantum: IQBuffer,
    /// Estimation result, present once acquisition has ended
    pub photon: Option<Estimate>,
}

impl FrameContext {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            symbols: Vec::new(),
            quantum: Vec::new(),
            photon: None,
        }
    }
}

/// Is `code` a valid command in `phase`?
///
/// Total over the whole code table: reply-only codes are never valid as
/// commands, and the general codes (abort, disconnect, invalid-response,
/// change-parameter) are handled before this gate is consulted.
pub fn check_code(code: Code, phase: ProtocolPhase) -> bool {
    use ProtocolPhase::*;
    match code {
        Code::IdentificationRequest => phase == Connected,
        Code::InitializationRequest | Code::InitializationRequestConfig => phase == Authenticated,
        Code::QieRequest => phase == Initialized,
        Code::QieTrigger => phase == FramePrepared,
        Code::QieAcquisitionEnded => phase == FrameSent,
        Code::PeSymbolsRequest => phase >= FrameSent,
        Code::PeNphotonRequest => phase >= AcquisitionEnded,
        Code::PeFinished => phase == AcquisitionEnded,
        Code::EcInitialization | Code::EcBlock | Code::EcRemaining | Code::EcVerification => {
            phase >= PeEnded
        }
        // Privacy amplification needs error correction to have finished,
        // which this station never reaches.
        Code::PaRequest => false,
        Code::FrameEnded => phase >= Initialized,
        Code::RequestPolarisationRecovery | Code::EndPolarisationRecovery => phase >= Authenticated,
        _ => false,
    }
}
