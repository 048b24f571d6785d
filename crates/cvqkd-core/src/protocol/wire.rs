//! Wire Format
//!
//! Canonical byte layout of a control-protocol frame:
//!
//! ```text
//! ┌───────────┬─────────┬──────────┬──────────┬───────────┬──────────────┐
//! │ magic u16 │ ver u8  │ code u16 │ len u32  │ payload   │ tag [u8; 32] │
//! │ 0xA11C    │ 0x01    │ BE       │ BE       │ JSON      │ HMAC-SHA256  │
//! └───────────┴─────────┴──────────┴──────────┴───────────┴──────────────┘
//! ```
//!
//! The tag authenticates `version || code || payload` and is absent in
//! `none` authentication mode. Decoding never panics: every failure is one
//! of the [`WireError`] variants, which the server maps onto the
//! transport-error handling of the receive pipeline (reset on
//! disconnection, UNKNOWN_COMMAND, AUTHENTICATION_INVALID,
//! INVALID_CONTENT).

use crate::config::{AuthConfig, AuthMode};
use crate::protocol::codes::Code;
use ring::hmac;
use serde_json::Value;
use std::io::{ErrorKind, Read, Write};

/// First two bytes of every frame
pub const WIRE_MAGIC: u16 = 0xA11C;
/// Wire format version
pub const WIRE_VERSION: u8 = 0x01;
/// Header size: magic(2) + version(1) + code(2) + length(4)
pub const HEADER_LEN: usize = 9;
/// HMAC-SHA256 tag size
pub const TAG_LEN: usize = 32;
/// Upper bound on the payload, far above any real frame
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Transport-level receive/send failures
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The socket read timed out with no frame started; used by the server
    /// to poll the admin channel between frames
    #[error("read timed out")]
    Timeout,

    /// The peer closed or the socket died
    #[error("peer disconnected")]
    Disconnected,

    /// Valid frame carrying a code outside the table
    #[error("unknown message code {0}")]
    UnknownCode(u16),

    /// Authentication tag missing or wrong
    #[error("frame authentication failed")]
    AuthFailure,

    /// Framing or payload error
    #[error("malformed frame: {0}")]
    Malformed(String),
}

fn classify_io(error: std::io::Error) -> WireError {
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => WireError::Timeout,
        _ => WireError::Disconnected,
    }
}

/// Encoder/decoder bound to one authentication configuration
pub struct FrameCodec {
    key: Option<hmac::Key>,
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("authenticated", &self.key.is_some())
            .finish()
    }
}

impl FrameCodec {
    pub fn new(auth: &AuthConfig) -> Self {
        let key = match auth.mode {
            AuthMode::None => None,
            AuthMode::HmacSha256 => Some(hmac::Key::new(
                hmac::HMAC_SHA256,
                auth.secret.as_bytes(),
            )),
        };
        Self { key }
    }

    /// Serialize one frame to bytes
    pub fn encode(&self, code: Code, payload: &Value) -> Result<Vec<u8>, WireError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| WireError::Malformed(format!("payload serialization: {e}")))?;
        if body.len() as u64 > MAX_PAYLOAD_LEN as u64 {
            return Err(WireError::Malformed(format!(
                "payload of {} bytes exceeds the frame limit",
                body.len()
            )));
        }
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len() + TAG_LEN);
        frame.extend_from_slice(&WIRE_MAGIC.to_be_bytes());
        frame.push(WIRE_VERSION);
        frame.extend_from_slice(&code.as_u16().to_be_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        if let Some(key) = &self.key {
            let tag = hmac::sign(key, &signed_region(code.as_u16(), &body));
            frame.extend_from_slice(tag.as_ref());
        }
        Ok(frame)
    }

    /// Write one frame to the peer
    pub fn write_frame<W: Write>(
        &self,
        writer: &mut W,
        code: Code,
        payload: &Value,
    ) -> Result<(), WireError> {
        let frame = self.encode(code, payload)?;
        writer.write_all(&frame).map_err(classify_io)?;
        writer.flush().map_err(classify_io)?;
        Ok(())
    }

    /// Read and authenticate one frame
    ///
    /// A timeout before the first header byte is a clean poll tick
    /// ([`WireError::Timeout`]); every other short read means the peer is
    /// gone.
    pub fn read_frame<R: Read>(&self, reader: &mut R) -> Result<(Code, Value), WireError> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).map_err(classify_io)?;

        let magic = u16::from_be_bytes([header[0], header[1]]);
        if magic != WIRE_MAGIC {
            return Err(WireError::Malformed(format!("bad magic 0x{magic:04X}")));
        }
        if header[2] != WIRE_VERSION {
            return Err(WireError::Malformed(format!(
                "unsupported wire version {}",
                header[2]
            )));
        }
        let raw_code = u16::from_be_bytes([header[3], header[4]]);
        let len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
        if len > MAX_PAYLOAD_LEN {
            return Err(WireError::Malformed(format!("payload length {len} too large")));
        }

        let mut body = vec![0u8; len as usize];
        reader
            .read_exact(&mut body)
            .map_err(|e| match classify_io(e) {
                // A mid-frame stall is not a poll tick; the frame is lost.
                WireError::Timeout => WireError::Disconnected,
                other => other,
            })?;

        if let Some(key) = &self.key {
            let mut tag = [0u8; TAG_LEN];
            reader
                .read_exact(&mut tag)
                .map_err(|_| WireError::AuthFailure)?;
            hmac::verify(key, &signed_region(raw_code, &body), &tag)
                .map_err(|_| WireError::AuthFailure)?;
        }

        let code = Code::from_u16(raw_code).ok_or(WireError::UnknownCode(raw_code))?;
        let payload: Value = serde_json::from_slice(&body)
            .map_err(|e| WireError::Malformed(format!("payload JSON: {e}")))?;
        Ok((code, payload))
    }
}

fn signed_region(code: u16, body: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(3 + body.len());
    data.push(WIRE_VERSION);
    data.extend_from_slice(&code.to_be_bytes());
    data.extend_from_slice(body);
    data
}
