//! Typed Message Payloads
//!
//! Each request/response code carries a structured JSON payload; the
//! structs here are the schema. Handlers deserialize the incoming value
//! into the matching struct and answer `InvalidContent` when a required
//! field is missing or mistyped.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// IDENTIFICATION_REQUEST: the peer introduces itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identification {
    /// Peer station serial number
    pub serial_number: String,
    /// Control-protocol version string
    pub protocol_version: String,
}

/// IDENTIFICATION_RESPONSE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentificationResponse {
    /// This station's serial number
    pub serial_number: String,
}

/// INVALID_VERSION: reports the version this station speaks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMismatch {
    pub protocol_version: String,
}

/// INITIALIZATION_REQUEST: opens a new frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Initialization {
    /// Frame identifier chosen by the peer
    pub frame_uuid: Uuid,
}

/// PE_SYMBOLS_REQUEST: indices of the symbols revealed for estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolsRequest {
    pub indices: Vec<usize>,
}

/// PE_SYMBOLS_RESPONSE: the revealed symbols, quadratures split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolsResponse {
    pub symbols_real: Vec<f64>,
    pub symbols_imag: Vec<f64>,
}

/// PE_NPHOTON_RESPONSE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NphotonResponse {
    /// Mean photon number of the finished frame
    pub n_photon: f64,
    /// True when the monitor saw no excess power and the value was clamped
    #[serde(default)]
    pub suspect: bool,
}

/// PE_FINISHED: the peer's channel-estimation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeFinished {
    /// Mean photon number the peer assumed
    pub n_photon: f64,
    /// Estimated channel transmittance T
    pub transmittance: f64,
    /// Estimated excess noise ξ
    pub excess_noise: f64,
    /// Receiver electronic noise
    pub electronic_noise: f64,
    /// Receiver efficiency η
    pub eta: f64,
    /// Secret key rate; non-positive means the frame yields no key
    pub key_rate: f64,
}

/// PE_DENIED
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeDenied {
    pub deny_message: String,
}

/// CHANGE_PARAMETER_REQUEST
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeParameter {
    /// Dotted path of the parameter, e.g. `frame.quantum.variance`
    pub parameter: String,
    pub value: serde_json::Value,
}

/// PARAMETER_CHANGED
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterChanged {
    pub parameter: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
}

/// PARAMETER_REFUSED / PARAMETER_UNKNOWN
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterRejected {
    pub parameter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// ABORT
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Abort {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_message: Option<String>,
}

/// INVALID_RESPONSE
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InvalidResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// INVALID_CONTENT and other error replies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContent {
    /// Code of the offending request, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub error_message: String,
}

/// FRAME_ENDED_ACK, and FRAME_ENDED when Alice ends a frame on error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEnded {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identification_round_trip() {
        let msg = Identification {
            serial_number: "bob-7".to_string(),
            protocol_version: "1.0".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["serial_number"], "bob-7");
        let back: Identification = serde_json::from_value(json).unwrap();
        assert_eq!(back.protocol_version, "1.0");
    }

    #[test]
    fn missing_field_fails_to_deserialize() {
        let json = serde_json::json!({ "serial_number": "bob-7" });
        assert!(serde_json::from_value::<Identification>(json).is_err());
    }

    #[test]
    fn optional_fields_are_omitted() {
        let json = serde_json::to_value(Abort::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));

        let json = serde_json::to_value(FrameEnded {
            frame_uuid: None,
            error_message: Some("dac fault".to_string()),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "error_message": "dac fault" }));
    }

    #[test]
    fn pe_finished_requires_all_statistics() {
        let json = serde_json::json!({
            "n_photon": 0.9,
            "transmittance": 0.5,
            "excess_noise": 0.01,
            "electronic_noise": 0.1,
            "eta": 0.8,
            "key_rate": 1e-4,
        });
        let msg: PeFinished = serde_json::from_value(json.clone()).unwrap();
        assert!(msg.key_rate > 0.0);

        let mut incomplete = json;
        incomplete.as_object_mut().unwrap().remove("eta");
        assert!(serde_json::from_value::<PeFinished>(incomplete).is_err());
    }
}
