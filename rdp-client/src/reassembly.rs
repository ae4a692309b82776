//! Decode-ingress adapter: owns one `rdp_wire::Reassembler` per stream and
//! gates completed frames so nothing reaches the decoder before a keyframe
//! (or a parameter-set-carrying fragment) has been seen.

use std::collections::HashMap;

use rdp_wire::{FrameHeader, Reassembler, WireResult};

pub struct CompletedFrame {
    pub stream_id: u32,
    pub frame_number: u32,
    pub timestamp: u64,
    pub is_keyframe: bool,
    pub payload: Vec<u8>,
}

struct StreamIngress {
    reassembler: Reassembler,
    has_seen_keyframe: bool,
}

impl Default for StreamIngress {
    fn default() -> Self {
        Self {
            reassembler: Reassembler::with_default_window(),
            has_seen_keyframe: false,
        }
    }
}

#[derive(Default)]
pub struct DecodeIngress {
    streams: HashMap<u32, StreamIngress>,
}

impl DecodeIngress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one received datagram fragment. Returns the completed frame if
    /// this fragment finished one and it is eligible to reach the decoder.
    pub fn insert(&mut self, header: &FrameHeader, payload: Vec<u8>) -> WireResult<Option<CompletedFrame>> {
        let is_keyframe = header.flags.contains(rdp_wire::FrameFlags::KEYFRAME);
        let carries_parameter_set = header.flags.contains(rdp_wire::FrameFlags::PARAMETER_SET);
        let stream = self.streams.entry(header.stream_id).or_default();

        let completed = match stream.reassembler.insert(header, payload)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        if is_keyframe || carries_parameter_set {
            stream.has_seen_keyframe = true;
        }
        if !stream.has_seen_keyframe {
            return Ok(None);
        }

        Ok(Some(CompletedFrame {
            stream_id: header.stream_id,
            frame_number: header.frame_number,
            timestamp: header.timestamp_ns,
            is_keyframe,
            payload: completed,
        }))
    }

    pub fn drop_stream(&mut self, stream_id: u32) {
        self.streams.remove(&stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdp_wire::{Fragmenter, StreamContext};

    #[test]
    fn non_keyframe_before_any_keyframe_is_discarded() {
        let mut ctx = StreamContext::new(1);
        let mut ingress = DecodeIngress::new();

        let fragments = Fragmenter::fragment(&mut ctx, &[1u8; 50], 100, 0, false, 0).unwrap();
        for f in fragments {
            let result = ingress.insert(&f.header, f.payload).unwrap();
            assert!(result.is_none(), "non-keyframe before keyframe must be discarded");
        }
    }

    #[test]
    fn frames_after_keyframe_are_delivered() {
        let mut ctx = StreamContext::new(1);
        let mut ingress = DecodeIngress::new();

        let key_fragments = Fragmenter::fragment(&mut ctx, &[1u8; 50], 100, 0, true, 0).unwrap();
        let mut got_key = false;
        for f in key_fragments {
            if let Some(frame) = ingress.insert(&f.header, f.payload).unwrap() {
                got_key = true;
                assert!(frame.is_keyframe);
            }
        }
        assert!(got_key);

        let delta_fragments = Fragmenter::fragment(&mut ctx, &[2u8; 50], 100, 1, false, 0).unwrap();
        let mut got_delta = false;
        for f in delta_fragments {
            if let Some(frame) = ingress.insert(&f.header, f.payload).unwrap() {
                got_delta = true;
                assert!(!frame.is_keyframe);
            }
        }
        assert!(got_delta);
    }
}
