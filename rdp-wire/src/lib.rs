//! Binary wire protocol for the remote-desktop streaming pipeline.
//!
//! This crate owns the parts of the system that must agree bit-for-bit
//! between host and client: the 40-byte frame header (C1), CRC32, the
//! fragmenter/reassembler (C2), and the reliable control-channel envelope.
//! It has no opinion about sockets, capture, or codecs — those live in
//! `rdp-host`, `rdp-codec`, and `rdp-client`.

pub mod checksum;
pub mod control;
pub mod error;
pub mod fragment;
pub mod header;
pub mod types;

pub use checksum::Crc32;
pub use control::{
    ControlMessage, CursorUpdate, DeviceType, Hello, HostCapabilities, InputEvent,
    KeyEvent, KeyframeRequest, MessageType, Modifiers, PixelResize, PointerEvent,
    RelativeResize, ScrollEvent, TouchPhase,
};
pub use error::{WireError, WireResult};
pub use fragment::{Fragment, Fragmenter, Reassembler, StreamContext, DEFAULT_PRUNING_WINDOW};
pub use header::{FrameFlags, FrameHeader, HEADER_SIZE, MAGIC, VERSION};
pub use types::{CaptureMode, ColorSpace, LatencyMode, PixelFormat};
