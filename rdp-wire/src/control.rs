//! Control-channel envelope and message bodies.
//!
//! The control channel is reliable, ordered, and length-prefixed. The outer
//! envelope is `{ type: u16, length: u32, body }`; `body` is the bincode
//! encoding of the matching [`ControlMessage`] variant. Framing (the actual
//! socket read/write loop) lives in the host/client crates, which already
//! depend on `tokio`; this module only knows how to turn a message into
//! bytes and back.

use serde::{Deserialize, Serialize};

use crate::error::{WireError, WireResult};

/// Envelope `type` discriminants, kept stable across protocol versions so a
/// receiver can route on the envelope alone before decoding the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Hello = 1,
    HostCapabilities = 2,
    InputEvent = 3,
    KeyframeRequest = 4,
    CursorUpdate = 5,
}

impl MessageType {
    fn from_u16(value: u16) -> WireResult<Self> {
        Ok(match value {
            1 => Self::Hello,
            2 => Self::HostCapabilities,
            3 => Self::InputEvent,
            4 => Self::KeyframeRequest,
            5 => Self::CursorUpdate,
            other => {
                return Err(WireError::MalformedControl(format!(
                    "unknown envelope type {other}"
                )));
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Mac,
    IPad,
    Vision,
    Other,
}

/// `FlagsChanged`-style modifier bitmask: shift/control/option/command/
/// caps_lock/function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const SHIFT: Self = Self(1 << 0);
    pub const CONTROL: Self = Self(1 << 1);
    pub const OPTION: Self = Self(1 << 2);
    pub const COMMAND: Self = Self(1 << 3);
    pub const CAPS_LOCK: Self = Self(1 << 4);
    pub const FUNCTION: Self = Self(1 << 5);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TouchPhase {
    None,
    MayBegin,
    Began,
    Changed,
    Ended,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    /// Normalized in `[0, 1]` against the client's drawable.
    pub x: f32,
    pub y: f32,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollEvent {
    pub delta_x: f32,
    pub delta_y: f32,
    pub phase: TouchPhase,
    pub momentum_phase: TouchPhase,
    pub is_precise: bool,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key_code: u32,
    pub characters: Option<String>,
    pub chars_ignoring_modifiers: Option<String>,
    pub modifiers: Modifiers,
    pub is_repeat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeResize {
    pub aspect_ratio: f32,
    pub relative_scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelResize {
    pub width: u32,
    pub height: u32,
}

/// Discriminated union of every event the client forwards to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    MouseDown(PointerEvent),
    MouseUp(PointerEvent),
    MouseMoved(PointerEvent),
    MouseDragged(PointerEvent),
    RightMouseDown(PointerEvent),
    RightMouseUp(PointerEvent),
    RightMouseDragged(PointerEvent),
    OtherMouseDown(PointerEvent),
    OtherMouseUp(PointerEvent),
    OtherMouseDragged(PointerEvent),
    ScrollWheel(ScrollEvent),
    KeyDown(KeyEvent),
    KeyUp(KeyEvent),
    FlagsChanged(Modifiers),
    Magnify { magnification: f32 },
    Rotate { rotation: f32 },
    WindowFocus { focused: bool },
    RelativeResize(RelativeResize),
    PixelResize(PixelResize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub device_id: [u8; 16],
    pub device_name: String,
    pub device_type: DeviceType,
    pub protocol_version: u16,
    pub capabilities: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    pub max_streams: u16,
    pub supports_hevc: bool,
    pub supports_p3: bool,
    pub max_frame_rate: u16,
    pub protocol_version: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyframeRequest {
    pub stream_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorUpdate {
    pub stream_id: u32,
    pub cursor_type: u32,
    pub is_visible: bool,
    pub sequence: u32,
}

/// Every body a control message envelope can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    Hello(Hello),
    HostCapabilities(HostCapabilities),
    InputEvent(InputEvent),
    KeyframeRequest(KeyframeRequest),
    CursorUpdate(CursorUpdate),
}

impl ControlMessage {
    fn message_type(&self) -> MessageType {
        match self {
            Self::Hello(_) => MessageType::Hello,
            Self::HostCapabilities(_) => MessageType::HostCapabilities,
            Self::InputEvent(_) => MessageType::InputEvent,
            Self::KeyframeRequest(_) => MessageType::KeyframeRequest,
            Self::CursorUpdate(_) => MessageType::CursorUpdate,
        }
    }

    /// Encodes `{ type: u16, length: u32, body }` as a single buffer ready
    /// to write to the reliable stream.
    pub fn encode_envelope(&self) -> WireResult<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| WireError::MalformedControl(e.to_string()))?;
        let mut buf = Vec::with_capacity(6 + body.len());
        buf.extend_from_slice(&(self.message_type() as u16).to_be_bytes());
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decodes a full envelope (type + length + body) from `buf`. Returns
    /// the message and the number of bytes consumed. `Ok(None)` if `buf`
    /// does not yet contain a complete envelope.
    pub fn decode_envelope(buf: &[u8]) -> WireResult<Option<(Self, usize)>> {
        if buf.len() < 6 {
            return Ok(None);
        }
        let type_tag = u16::from_be_bytes([buf[0], buf[1]]);
        MessageType::from_u16(type_tag)?;
        let length = u32::from_be_bytes(buf[2..6].try_into().unwrap()) as usize;
        let total = 6 + length;
        if buf.len() < total {
            return Ok(None);
        }
        let message: ControlMessage = bincode::deserialize(&buf[6..total])
            .map_err(|e| WireError::MalformedControl(e.to_string()))?;
        Ok(Some((message, total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips_through_envelope() {
        let msg = ControlMessage::Hello(Hello {
            device_id: [7u8; 16],
            device_name: "studio-ipad".into(),
            device_type: DeviceType::IPad,
            protocol_version: 1,
            capabilities: 0b101,
        });
        let bytes = msg.encode_envelope().unwrap();
        let (decoded, consumed) = ControlMessage::decode_envelope(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn incomplete_envelope_returns_none() {
        let msg = ControlMessage::KeyframeRequest(KeyframeRequest { stream_id: 9 });
        let bytes = msg.encode_envelope().unwrap();
        let partial = &bytes[..bytes.len() - 1];
        assert_eq!(ControlMessage::decode_envelope(partial).unwrap(), None);
    }

    #[test]
    fn input_event_pointer_coordinates_round_trip() {
        let msg = ControlMessage::InputEvent(InputEvent::MouseMoved(PointerEvent {
            x: 0.25,
            y: 0.75,
            modifiers: Modifiers::SHIFT.union(Modifiers::COMMAND),
        }));
        let bytes = msg.encode_envelope().unwrap();
        let (decoded, _) = ControlMessage::decode_envelope(&bytes).unwrap().unwrap();
        match decoded {
            ControlMessage::InputEvent(InputEvent::MouseMoved(p)) => {
                assert_eq!(p.x, 0.25);
                assert_eq!(p.y, 0.75);
                assert!(p.modifiers.contains(Modifiers::SHIFT));
                assert!(p.modifiers.contains(Modifiers::COMMAND));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
