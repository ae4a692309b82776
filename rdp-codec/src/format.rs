//! Pure data types and math shared by the encoder and decoder sessions.
//! Kept free of GStreamer types so the quality/QP/keyframe-interval formulas
//! can be unit tested without initializing a pipeline.

use rdp_wire::{LatencyMode, PixelFormat};

/// One encoded access unit handed to the caller's `on_encoded` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    pub frame_number: u64,
    pub session_version: u64,
    pub is_keyframe: bool,
    /// Annex-B payload. For a keyframe this is the 4-byte big-endian
    /// parameter-set block length, the VPS/SPS/PPS (each with a start code),
    /// then the slice data; for a non-keyframe it is slice data only.
    pub payload: Vec<u8>,
}

/// Outcome of one `encode_frame` submission, delivered to `on_complete`
/// regardless of whether an `EncodedUnit` was also produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    Delivered,
    DroppedStaleVersion,
    DroppedEncoderError,
}

/// `max_frame_delay_count` per latency mode, mirrored here so callers that
/// only have `rdp_wire::LatencyMode` don't need to import the encoder.
pub fn max_frame_delay_count(mode: LatencyMode) -> u32 {
    mode.max_frame_delay_count()
}

/// Maps a quality target in `[0.02, 1.0]` to an encoder QP window. Returns
/// `None` above the 0.98 threshold, where only the quality target itself is
/// set and no QP clamp is applied.
pub fn quality_to_qp(quality: f32) -> Option<(u8, u8)> {
    let q = quality.clamp(0.02, 1.0);
    if q >= 0.98 {
        return None;
    }
    let min_qp = (10.0 + (1.0 - q) * 36.0).round().clamp(10.0, 46.0) as u8;
    let max_qp = (min_qp as u32 + 12).min(51) as u8;
    Some((min_qp, max_qp))
}

/// Default in-flight submission limit: 2 at or above 120 fps, else 1.
pub fn default_in_flight_limit(frame_rate: u32) -> u32 {
    if frame_rate >= 120 {
        2
    } else {
        1
    }
}

/// Converts a keyframe interval expressed in frames into seconds, guarding
/// against a zero result so the encoder's GOP-length-in-seconds property is
/// always meaningful.
pub fn keyframe_interval_seconds(interval_frames: u32, frame_rate: u32) -> u32 {
    (interval_frames / frame_rate.max(1)).max(1)
}

/// Data-rate-limit window, in milliseconds, applied alongside a configured
/// `max_bitrate`: 250ms at or above 120fps, else 500ms.
pub fn bitrate_window_ms(frame_rate: u32) -> u32 {
    if frame_rate >= 120 {
        250
    } else {
        500
    }
}

pub fn profile_for(pixel_format: PixelFormat) -> &'static str {
    if pixel_format.is_10_bit() {
        "main-10"
    } else {
        "main"
    }
}

const HEVC_NAL_VPS: u8 = 32;
const HEVC_NAL_SPS: u8 = 33;
const HEVC_NAL_PPS: u8 = 34;

fn hevc_nal_unit_type(nal_start: &[u8]) -> Option<u8> {
    nal_start.first().map(|b| (b >> 1) & 0x3f)
}

/// Splits Annex-B byte-stream NAL units, returning the byte offset of each
/// unit's start (after its start code) within `data`.
fn annex_b_nal_offsets(data: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                offsets.push(i + 3);
                i += 3;
                continue;
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                offsets.push(i + 4);
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    offsets
}

/// Re-frames an h265parse Annex-B keyframe buffer (which already prepends
/// VPS/SPS/PPS start-coded NALs ahead of the slice data when
/// `config-interval=-1`) into the wire's parameter-set block layout: a
/// 4-byte big-endian length covering every leading VPS/SPS/PPS NAL
/// (including their start codes), followed by the remaining slice NALs
/// unchanged.
pub fn reframe_keyframe_payload(raw: &[u8]) -> Vec<u8> {
    let offsets = annex_b_nal_offsets(raw);
    let mut param_set_end = 0;
    for (idx, &start) in offsets.iter().enumerate() {
        match hevc_nal_unit_type(&raw[start..]) {
            Some(HEVC_NAL_VPS) | Some(HEVC_NAL_SPS) | Some(HEVC_NAL_PPS) => {
                let nal_start_code_begin = if start >= 4 && raw[start - 4] == 0 {
                    start - 4
                } else {
                    start - 3
                };
                let next = offsets
                    .get(idx + 1)
                    .map(|&n| if n >= 4 && raw[n - 4] == 0 { n - 4 } else { n - 3 })
                    .unwrap_or(raw.len());
                param_set_end = next;
                let _ = nal_start_code_begin;
            }
            _ => break,
        }
    }

    let mut out = Vec::with_capacity(4 + raw.len());
    out.extend_from_slice(&(param_set_end as u32).to_be_bytes());
    out.extend_from_slice(&raw[..param_set_end]);
    out.extend_from_slice(&raw[param_set_end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_at_or_above_threshold_skips_qp_clamp() {
        assert_eq!(quality_to_qp(0.98), None);
        assert_eq!(quality_to_qp(1.0), None);
    }

    #[test]
    fn quality_at_minimum_produces_near_widest_qp_window() {
        let (min_qp, max_qp) = quality_to_qp(0.02).unwrap();
        assert_eq!(min_qp, 45);
        assert_eq!(max_qp, 51);
    }

    #[test]
    fn quality_midpoint_matches_formula() {
        // q = 0.5 -> min_qp = round(10 + 0.5*36) = 28, max_qp = 40
        let (min_qp, max_qp) = quality_to_qp(0.5).unwrap();
        assert_eq!(min_qp, 28);
        assert_eq!(max_qp, 40);
    }

    #[test]
    fn in_flight_limit_doubles_at_high_frame_rate() {
        assert_eq!(default_in_flight_limit(60), 1);
        assert_eq!(default_in_flight_limit(119), 1);
        assert_eq!(default_in_flight_limit(120), 2);
        assert_eq!(default_in_flight_limit(240), 2);
    }

    #[test]
    fn bitrate_window_matches_frame_rate_tier() {
        assert_eq!(bitrate_window_ms(60), 500);
        assert_eq!(bitrate_window_ms(120), 250);
    }

    #[test]
    fn keyframe_interval_seconds_never_hits_zero() {
        assert_eq!(keyframe_interval_seconds(1, 240), 1);
        assert_eq!(keyframe_interval_seconds(120, 60), 2);
    }

    fn nal(start_code: &[u8], nal_type: u8, body: &[u8]) -> Vec<u8> {
        let mut v = start_code.to_vec();
        v.push(nal_type << 1);
        v.push(0);
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn reframe_keyframe_payload_prefixes_parameter_set_length() {
        let vps = nal(&[0, 0, 0, 1], HEVC_NAL_VPS, b"vps-body");
        let sps = nal(&[0, 0, 0, 1], HEVC_NAL_SPS, b"sps-body");
        let pps = nal(&[0, 0, 0, 1], HEVC_NAL_PPS, b"pps-body");
        let slice = nal(&[0, 0, 0, 1], 19, b"slice-body");

        let mut raw = Vec::new();
        raw.extend_from_slice(&vps);
        raw.extend_from_slice(&sps);
        raw.extend_from_slice(&pps);
        raw.extend_from_slice(&slice);

        let framed = reframe_keyframe_payload(&raw);
        let declared_len = u32::from_be_bytes(framed[..4].try_into().unwrap()) as usize;
        let expected_param_len = vps.len() + sps.len() + pps.len();
        assert_eq!(declared_len, expected_param_len);
        assert_eq!(&framed[4..4 + declared_len], &raw[..expected_param_len]);
        assert_eq!(&framed[4 + declared_len..], slice.as_slice());
    }
}
