//! Control-Protocol Codec
//!
//! Alice and Bob exchange `(code, content)` frames over a TCP control
//! channel. Each frame carries a 16-bit message code, a JSON payload and an
//! optional HMAC-SHA256 tag; the codec hides the byte layout from the
//! server and surfaces transport-level failures as [`wire::WireError`]
//! variants so the state machine never sees a half-decoded frame.

pub mod codes;
pub mod messages;
pub mod wire;

pub use codes::Code;
pub use wire::{FrameCodec, WireError};

/// Version string negotiated during identification
///
/// Both stations must agree; a mismatch is answered with INVALID_VERSION
/// and the peer stays unauthenticated.
pub const PROTOCOL_VERSION: &str = "1.0";
