//! Shared enums used by the capture session config, the encoder, and the
//! client — kept here so `rdp-host`, `rdp-codec`, and `rdp-client` agree on
//! one definition instead of three.

use std::fmt;
use std::str::FromStr;

/// Pixel formats the pipeline can carry end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    Bgra8,
    Bgr10a2,
    Nv12,
    P010,
}

impl PixelFormat {
    /// Whether this format carries 10-bit samples (drives the encoder's
    /// `Main10` vs `Main` profile choice).
    pub const fn is_10_bit(&self) -> bool {
        matches!(self, Self::Bgr10a2 | Self::P010)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bgra8 => "bgra8",
            Self::Bgr10a2 => "bgr10a2",
            Self::Nv12 => "nv12",
            Self::P010 => "p010",
        };
        f.write_str(s)
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bgra8" => Ok(Self::Bgra8),
            "bgr10a2" => Ok(Self::Bgr10a2),
            "nv12" => Ok(Self::Nv12),
            "p010" => Ok(Self::P010),
            other => Err(format!("unknown pixel format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ColorSpace {
    Srgb,
    DisplayP3,
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Srgb => "sRGB",
            Self::DisplayP3 => "displayP3",
        };
        f.write_str(s)
    }
}

impl FromStr for ColorSpace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sRGB" | "srgb" => Ok(Self::Srgb),
            "displayP3" | "displayp3" | "display-p3" => Ok(Self::DisplayP3),
            other => Err(format!("unknown color space: {other}")),
        }
    }
}

/// A tuple preset over encoder frame-delay, queue depth, and pool size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LatencyMode {
    LowestLatency,
    Balanced,
    Smoothest,
}

impl LatencyMode {
    /// `max_frame_delay_count` per spec.md §4.6.
    pub const fn max_frame_delay_count(&self) -> u32 {
        match self {
            Self::LowestLatency => 0,
            Self::Balanced => 1,
            Self::Smoothest => 2,
        }
    }
}

impl fmt::Display for LatencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LowestLatency => "lowestLatency",
            Self::Balanced => "balanced",
            Self::Smoothest => "smoothest",
        };
        f.write_str(s)
    }
}

impl FromStr for LatencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lowestLatency" | "lowest-latency" | "lowest_latency" => Ok(Self::LowestLatency),
            "balanced" => Ok(Self::Balanced),
            "smoothest" => Ok(Self::Smoothest),
            other => Err(format!("unknown latency mode: {other}")),
        }
    }
}

/// Whether the capture session targets a single window or a whole display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CaptureMode {
    Window,
    Display,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Window => "window",
            Self::Display => "display",
        };
        f.write_str(s)
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "window" => Ok(Self::Window),
            "display" => Ok(Self::Display),
            other => Err(format!("unknown capture mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_round_trips_through_display_and_from_str() {
        for f in [
            PixelFormat::Bgra8,
            PixelFormat::Bgr10a2,
            PixelFormat::Nv12,
            PixelFormat::P010,
        ] {
            assert_eq!(f.to_string().parse::<PixelFormat>().unwrap(), f);
        }
    }

    #[test]
    fn ten_bit_formats_are_flagged() {
        assert!(PixelFormat::Bgr10a2.is_10_bit());
        assert!(PixelFormat::P010.is_10_bit());
        assert!(!PixelFormat::Bgra8.is_10_bit());
        assert!(!PixelFormat::Nv12.is_10_bit());
    }

    #[test]
    fn latency_mode_frame_delay_table() {
        assert_eq!(LatencyMode::LowestLatency.max_frame_delay_count(), 0);
        assert_eq!(LatencyMode::Balanced.max_frame_delay_count(), 1);
        assert_eq!(LatencyMode::Smoothest.max_frame_delay_count(), 2);
    }
}
