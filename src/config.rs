//! # Configuration
//!
//! Pipeline configuration types and validation. Three layers merge in
//! order: built-in defaults, an optional TOML config file, then CLI flags
//! (each layer overriding the previous where it has an opinion).
//!
//! ```rust
//! use rdp_host::config::{ConfigOverrides, PipelineConfig};
//!
//! let config = PipelineConfig::load(None, ConfigOverrides::default()).unwrap();
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;

use rdp_wire::{CaptureMode, ColorSpace, LatencyMode, PixelFormat};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Rounds a dimension to the nearest even integer no smaller than 2, per
/// the output-sizing rule applied to every captured and encoded frame.
pub fn even_align(x: f64) -> u32 {
    let rounded = x.round();
    let floored_half = (rounded / 2.0).floor();
    (floored_half * 2.0).max(2.0) as u32
}

/// Queue depth / pool minimum hint from `(latency_mode, current_frame_rate)`.
pub fn queue_depth_hint(latency_mode: LatencyMode, current_frame_rate: u32) -> u32 {
    match (latency_mode, current_frame_rate) {
        (LatencyMode::LowestLatency, fps) if fps >= 120 => 6,
        (LatencyMode::LowestLatency, fps) if fps >= 60 => 4,
        (LatencyMode::LowestLatency, _) => 3,
        (LatencyMode::Balanced, fps) if fps >= 120 => 8,
        (LatencyMode::Balanced, fps) if fps >= 60 => 6,
        (LatencyMode::Balanced, _) => 4,
        (LatencyMode::Smoothest, fps) if fps >= 120 => 12,
        (LatencyMode::Smoothest, fps) if fps >= 60 => 10,
        (LatencyMode::Smoothest, _) => 8,
    }
}

/// Configuration for a single capture session: what to capture, at what
/// scale, and with what cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureSessionConfig {
    pub mode: CaptureMode,
    pub window_id: Option<u64>,
    pub application_pid: Option<u32>,
    pub display_id: u32,
    pub known_scale_factor: Option<f32>,
    pub output_scale: f32,
    pub resolution: Option<(u32, u32)>,
    pub shows_cursor: bool,
    pub pixel_format: PixelFormat,
    pub color_space: ColorSpace,
    pub target_frame_rate: u32,
    pub latency_mode: LatencyMode,
}

impl Default for CaptureSessionConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Display,
            window_id: None,
            application_pid: None,
            display_id: 0,
            known_scale_factor: None,
            output_scale: 1.0,
            resolution: None,
            shows_cursor: true,
            pixel_format: PixelFormat::Nv12,
            color_space: ColorSpace::Srgb,
            target_frame_rate: 60,
            latency_mode: LatencyMode::Balanced,
        }
    }
}

impl CaptureSessionConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if !(0.1..=1.0).contains(&self.output_scale) {
            return Err(PipelineError::config(
                "output_scale",
                self.output_scale.to_string(),
                "must be in [0.1, 1.0]",
            ));
        }
        if self.target_frame_rate == 0 {
            return Err(PipelineError::config(
                "target_frame_rate",
                self.target_frame_rate.to_string(),
                "must be greater than 0",
            ));
        }
        if self.mode == CaptureMode::Window && self.window_id.is_none() {
            return Err(PipelineError::config(
                "window_id",
                "none",
                "required when mode is window",
            ));
        }
        Ok(())
    }
}

/// The encoder/transport side of the configuration surface: everything the
/// CLI and on-disk config file can set, merged defaults-then-file-then-CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub target_frame_rate: u32,
    pub key_frame_interval: u32,
    pub max_bitrate: Option<u32>,
    pub min_bitrate: Option<u32>,
    pub pixel_format: PixelFormat,
    pub color_space: ColorSpace,
    pub capture_queue_depth: Option<u32>,
    pub frame_quality: f32,
    pub latency_mode: LatencyMode,
    pub enable_adaptive_bitrate: bool,
    /// Enables capture and timing diagnostic logs.
    pub diagnostics: bool,
    /// Toggles the 10-frame synthetic warmup before the first real frame.
    pub preheat: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_frame_rate: 60,
            key_frame_interval: 120,
            max_bitrate: None,
            min_bitrate: None,
            pixel_format: PixelFormat::Nv12,
            color_space: ColorSpace::Srgb,
            capture_queue_depth: None,
            frame_quality: 0.8,
            latency_mode: LatencyMode::Balanced,
            enable_adaptive_bitrate: true,
            diagnostics: false,
            preheat: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.target_frame_rate == 0 {
            return Err(PipelineError::config(
                "target_frame_rate",
                self.target_frame_rate.to_string(),
                "must be greater than 0",
            ));
        }
        if self.key_frame_interval == 0 {
            return Err(PipelineError::config(
                "key_frame_interval",
                self.key_frame_interval.to_string(),
                "must be greater than 0",
            ));
        }
        if !(0.02..=1.0).contains(&self.frame_quality) {
            return Err(PipelineError::config(
                "frame_quality",
                self.frame_quality.to_string(),
                "must be in [0.02, 1.0]",
            ));
        }
        if let (Some(min), Some(max)) = (self.min_bitrate, self.max_bitrate) {
            if min > max {
                return Err(PipelineError::config(
                    "min_bitrate",
                    min.to_string(),
                    "must not exceed max_bitrate",
                ));
            }
        }
        Ok(())
    }

    /// Applies every `Some` field in `overrides`, leaving the rest unchanged.
    pub fn apply_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(v) = overrides.target_frame_rate {
            self.target_frame_rate = v;
        }
        if let Some(v) = overrides.key_frame_interval {
            self.key_frame_interval = v;
        }
        if let Some(v) = overrides.max_bitrate {
            self.max_bitrate = Some(v);
        }
        if let Some(v) = overrides.min_bitrate {
            self.min_bitrate = Some(v);
        }
        if let Some(v) = overrides.pixel_format {
            self.pixel_format = v;
        }
        if let Some(v) = overrides.color_space {
            self.color_space = v;
        }
        if let Some(v) = overrides.capture_queue_depth {
            self.capture_queue_depth = Some(v);
        }
        if let Some(v) = overrides.frame_quality {
            self.frame_quality = v;
        }
        if let Some(v) = overrides.latency_mode {
            self.latency_mode = v;
        }
        if let Some(v) = overrides.enable_adaptive_bitrate {
            self.enable_adaptive_bitrate = v;
        }
        if let Some(v) = overrides.diagnostics {
            self.diagnostics = v;
        }
        if let Some(v) = overrides.preheat {
            self.preheat = v;
        }
        self
    }

    /// Loads defaults, applies an optional TOML config file, then CLI
    /// overrides, and validates the result.
    pub fn load(file_path: Option<&Path>, cli: ConfigOverrides) -> PipelineResult<Self> {
        let mut config = Self::default();
        if let Some(path) = file_path {
            let text = std::fs::read_to_string(path)
                .map_err(|e| PipelineError::io("reading config file", e))?;
            let file_overrides: ConfigOverrides = toml::from_str(&text)?;
            config = config.apply_overrides(&file_overrides);
        }
        config = config.apply_overrides(&cli);
        config.validate()?;
        Ok(config)
    }
}

/// Sparse override set, one field per `PipelineConfig` field. Used both as
/// the TOML config file's schema and as the CLI's merge input.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigOverrides {
    pub target_frame_rate: Option<u32>,
    pub key_frame_interval: Option<u32>,
    pub max_bitrate: Option<u32>,
    pub min_bitrate: Option<u32>,
    pub pixel_format: Option<PixelFormat>,
    pub color_space: Option<ColorSpace>,
    pub capture_queue_depth: Option<u32>,
    pub frame_quality: Option<f32>,
    pub latency_mode: Option<LatencyMode>,
    pub enable_adaptive_bitrate: Option<bool>,
    pub diagnostics: Option<bool>,
    pub preheat: Option<bool>,
}

/// Client-side preferences, loaded the same way but with no CLI surface of
/// its own (the client app forwards these to the host over the control
/// channel as part of its `Hello`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientPreferences {
    pub enable_pro_motion: Option<bool>,
    pub enable_temporal_dithering: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_align_matches_the_worked_examples() {
        assert_eq!(even_align(1.0), 2);
        assert_eq!(even_align(0.4), 2);
        assert_eq!(even_align(1920.0), 1920);
        assert_eq!(even_align(1921.0), 1920);
        assert_eq!(even_align(1921.4), 1920);
    }

    #[test]
    fn queue_depth_hint_matches_the_table() {
        assert_eq!(queue_depth_hint(LatencyMode::LowestLatency, 144), 6);
        assert_eq!(queue_depth_hint(LatencyMode::LowestLatency, 60), 4);
        assert_eq!(queue_depth_hint(LatencyMode::LowestLatency, 30), 3);
        assert_eq!(queue_depth_hint(LatencyMode::Balanced, 120), 8);
        assert_eq!(queue_depth_hint(LatencyMode::Balanced, 60), 6);
        assert_eq!(queue_depth_hint(LatencyMode::Balanced, 24), 4);
        assert_eq!(queue_depth_hint(LatencyMode::Smoothest, 120), 12);
        assert_eq!(queue_depth_hint(LatencyMode::Smoothest, 75), 10);
        assert_eq!(queue_depth_hint(LatencyMode::Smoothest, 15), 8);
    }

    #[test]
    fn default_pipeline_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn frame_quality_out_of_range_is_rejected() {
        let mut config = PipelineConfig::default();
        config.frame_quality = 0.0;
        assert!(config.validate().is_err());
        config.frame_quality = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bitrate_bounds_are_checked_against_each_other() {
        let mut config = PipelineConfig::default();
        config.min_bitrate = Some(5_000_000);
        config.max_bitrate = Some(1_000_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_apply_only_the_set_fields() {
        let base = PipelineConfig::default();
        let overrides = ConfigOverrides {
            target_frame_rate: Some(120),
            ..Default::default()
        };
        let merged = base.clone().apply_overrides(&overrides);
        assert_eq!(merged.target_frame_rate, 120);
        assert_eq!(merged.frame_quality, base.frame_quality);
    }

    #[test]
    fn window_mode_without_window_id_fails_validation() {
        let mut config = CaptureSessionConfig::default();
        config.mode = CaptureMode::Window;
        assert!(config.validate().is_err());
        config.window_id = Some(42);
        assert!(config.validate().is_ok());
    }
}
