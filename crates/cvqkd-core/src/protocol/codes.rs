//! Message Code Table
//!
//! A fixed, versioned enumeration of every control-protocol message code.
//! Codes are grouped by hundreds: general codes below 100, then one block
//! per protocol phase (identification, initialization, quantum information
//! exchange, parameter estimation, error correction, privacy amplification,
//! frame lifecycle, polarisation recovery).
//!
//! Error-correction and privacy-amplification codes are recognised by the
//! table but the station answers them with `UnexpectedCommand`: those
//! phases are delegated to post-processing software outside this server.

use serde::{Deserialize, Serialize};

/// Every message code of protocol version 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Code {
    // General codes, valid in any connected state
    Abort = 10,
    AbortAck = 11,
    Disconnection = 12,
    DisconnectionAck = 13,
    InvalidResponse = 14,
    InvalidResponseAck = 15,
    ChangeParameterRequest = 20,
    ParameterChanged = 21,
    ParameterRefused = 22,
    ParameterUnknown = 23,
    UnexpectedCommand = 30,
    UnknownCommand = 31,
    InvalidContent = 32,
    AuthenticationInvalid = 33,
    InvalidVersion = 34,

    // Identification
    IdentificationRequest = 100,
    IdentificationResponse = 101,

    // Initialization
    InitializationRequest = 110,
    InitializationAccepted = 111,
    InitializationRequestConfig = 112,

    // Quantum information exchange
    QieRequest = 200,
    QieReady = 201,
    QieTrigger = 202,
    QieEmissionStarted = 203,
    QieAcquisitionEnded = 204,
    QieEnded = 205,

    // Parameter estimation
    PeSymbolsRequest = 300,
    PeSymbolsResponse = 301,
    PeSymbolsError = 302,
    PeNphotonRequest = 303,
    PeNphotonResponse = 304,
    PeFinished = 305,
    PeApproved = 306,
    PeDenied = 307,

    // Error correction (recognised, not implemented here)
    EcInitialization = 400,
    EcBlock = 401,
    EcRemaining = 402,
    EcVerification = 403,

    // Privacy amplification (recognised, not implemented here)
    PaRequest = 500,

    // Frame lifecycle
    FrameEnded = 600,
    FrameEndedAck = 601,

    // Polarisation recovery
    RequestPolarisationRecovery = 700,
    PolarisationRecoveryAck = 701,
    EndPolarisationRecovery = 702,
    PolarisationRecoveryEnded = 703,
}

impl Code {
    /// Numeric value as carried on the wire
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Look a wire value up in the table
    pub fn from_u16(value: u16) -> Option<Code> {
        use Code::*;
        let code = match value {
            10 => Abort,
            11 => AbortAck,
            12 => Disconnection,
            13 => DisconnectionAck,
            14 => InvalidResponse,
            15 => InvalidResponseAck,
            20 => ChangeParameterRequest,
            21 => ParameterChanged,
            22 => ParameterRefused,
            23 => ParameterUnknown,
            30 => UnexpectedCommand,
            31 => UnknownCommand,
            32 => InvalidContent,
            33 => AuthenticationInvalid,
            34 => InvalidVersion,
            100 => IdentificationRequest,
            101 => IdentificationResponse,
            110 => InitializationRequest,
            111 => InitializationAccepted,
            112 => InitializationRequestConfig,
            200 => QieRequest,
            201 => QieReady,
            202 => QieTrigger,
            203 => QieEmissionStarted,
            204 => QieAcquisitionEnded,
            205 => QieEnded,
            300 => PeSymbolsRequest,
            301 => PeSymbolsResponse,
            302 => PeSymbolsError,
            303 => PeNphotonRequest,
            304 => PeNphotonResponse,
            305 => PeFinished,
            306 => PeApproved,
            307 => PeDenied,
            400 => EcInitialization,
            401 => EcBlock,
            402 => EcRemaining,
            403 => EcVerification,
            500 => PaRequest,
            600 => FrameEnded,
            601 => FrameEndedAck,
            700 => RequestPolarisationRecovery,
            701 => PolarisationRecoveryAck,
            702 => EndPolarisationRecovery,
            703 => PolarisationRecoveryEnded,
            _ => return None,
        };
        Some(code)
    }

    /// General codes are handled before the phase gate
    pub fn is_general(self) -> bool {
        matches!(
            self,
            Code::Abort
                | Code::Disconnection
                | Code::InvalidResponse
                | Code::ChangeParameterRequest
        )
    }
}
