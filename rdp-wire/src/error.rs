//! Wire-level error kinds.
//!
//! These never cross a frame boundary on their own; callers in `rdp-host`/
//! `rdp-client` turn a `WireError` into a drop-counter increment and, at
//! most, a `PipelineError::Protocol` at a session boundary.

use std::fmt;

/// Reasons a datagram or control message is rejected before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer shorter than the 40-byte header.
    Truncated { len: usize },
    /// `magic` field did not match.
    BadMagic { found: u16 },
    /// `version` field is not one this build understands.
    UnknownVersion { found: u8 },
    /// `payload_length` exceeds the implementation-defined maximum.
    PayloadTooLarge { declared: usize, max: usize },
    /// CRC32 of the payload did not match the `checksum` field.
    ChecksumMismatch,
    /// `fragment_index >= fragment_count` on a received fragment. Unlike the
    /// fragmenter's own invariant (a panic-worthy bug if violated locally),
    /// a wire fragment is attacker/corruption-controlled input and is
    /// rejected rather than trusted.
    InvalidFragment { index: u16, count: u16 },
    /// Control-channel body failed to decode.
    MalformedControl(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(f, "buffer too short for header: {len} bytes"),
            Self::BadMagic { found } => write!(f, "bad magic: 0x{found:04x}"),
            Self::UnknownVersion { found } => write!(f, "unknown protocol version: {found}"),
            Self::PayloadTooLarge { declared, max } => {
                write!(f, "payload_length {declared} exceeds maximum {max}")
            }
            Self::ChecksumMismatch => write!(f, "CRC32 checksum mismatch"),
            Self::InvalidFragment { index, count } => {
                write!(f, "fragment_index {index} >= fragment_count {count}")
            }
            Self::MalformedControl(reason) => write!(f, "malformed control message: {reason}"),
        }
    }
}

impl std::error::Error for WireError {}

pub type WireResult<T> = Result<T, WireError>;
