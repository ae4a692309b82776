use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use rdp_host::config::{CaptureSessionConfig, ConfigOverrides, PipelineConfig};
use rdp_host::session::{PipelineSession, PipelineSessionConfig};
use rdp_wire::{CaptureMode, ColorSpace, LatencyMode, PixelFormat};

/// Host side of a low-latency remote desktop streaming session.
#[derive(Parser, Debug)]
#[command(name = "rdp-hostd")]
#[command(about = "Stream this desktop to a remote client")]
struct Args {
    /// Address to send encoded frame datagrams to (client's listen address).
    #[arg(long)]
    datagram_destination: SocketAddr,

    /// Address this host listens on for the reliable control channel.
    #[arg(long, default_value = "0.0.0.0:4500")]
    control_listen_addr: SocketAddr,

    /// Optional TOML config file, applied over the built-in defaults and
    /// before these CLI flags.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target capture/encode frame rate.
    #[arg(long)]
    target_frame_rate: Option<u32>,

    /// Keyframe interval, in frames.
    #[arg(long)]
    key_frame_interval: Option<u32>,

    /// Maximum bitrate in bits per second.
    #[arg(long)]
    max_bitrate: Option<u32>,

    /// Minimum bitrate in bits per second.
    #[arg(long)]
    min_bitrate: Option<u32>,

    /// Wire pixel format: bgra8, bgr10a2, nv12, p010.
    #[arg(long)]
    pixel_format: Option<PixelFormat>,

    /// Color space: srgb, displayp3.
    #[arg(long)]
    color_space: Option<ColorSpace>,

    /// Capture pool queue depth hint.
    #[arg(long)]
    capture_queue_depth: Option<u32>,

    /// Encoder frame quality in [0.02, 1.0].
    #[arg(long)]
    frame_quality: Option<f32>,

    /// Latency mode: lowest-latency, balanced, smoothest.
    #[arg(long)]
    latency_mode: Option<LatencyMode>,

    /// Disable adaptive bitrate.
    #[arg(long)]
    no_adaptive_bitrate: bool,

    /// Enable capture/timing diagnostic logs.
    #[arg(long)]
    diagnostics: bool,

    /// Capture a specific window instead of the primary display.
    #[arg(long)]
    window: bool,

    /// Window index to capture (from the platform's window enumeration),
    /// required when `--window` is set.
    #[arg(long)]
    window_id: Option<u64>,

    /// Display index to capture when not capturing a window.
    #[arg(long, default_value_t = 0)]
    display_id: u32,

    /// Wire protocol stream identifier.
    #[arg(long, default_value_t = 1)]
    stream_id: u32,

    /// Maximum transmission unit for fragmented datagrams.
    #[arg(long, default_value_t = 1200)]
    mtu: usize,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            target_frame_rate: self.target_frame_rate,
            key_frame_interval: self.key_frame_interval,
            max_bitrate: self.max_bitrate,
            min_bitrate: self.min_bitrate,
            pixel_format: self.pixel_format,
            color_space: self.color_space,
            capture_queue_depth: self.capture_queue_depth,
            frame_quality: self.frame_quality,
            latency_mode: self.latency_mode,
            enable_adaptive_bitrate: if self.no_adaptive_bitrate { Some(false) } else { None },
            diagnostics: if self.diagnostics { Some(true) } else { None },
            preheat: None,
        }
    }

    fn capture_session_config(&self, pipeline: &PipelineConfig) -> Result<CaptureSessionConfig> {
        if self.window && self.window_id.is_none() {
            anyhow::bail!("--window requires --window-id");
        }
        Ok(CaptureSessionConfig {
            mode: if self.window { CaptureMode::Window } else { CaptureMode::Display },
            window_id: self.window_id,
            application_pid: None,
            display_id: self.display_id,
            known_scale_factor: None,
            output_scale: 1.0,
            resolution: None,
            shows_cursor: true,
            pixel_format: pipeline.pixel_format,
            color_space: pipeline.color_space,
            target_frame_rate: pipeline.target_frame_rate,
            latency_mode: pipeline.latency_mode,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let pipeline_config = PipelineConfig::load(args.config.as_deref(), args.overrides())
        .context("loading pipeline configuration")?;
    let capture_config = args.capture_session_config(&pipeline_config)?;
    capture_config
        .validate()
        .map_err(anyhow::Error::from)?;

    log::info!(
        "starting rdp-hostd: target_fps={} latency_mode={} pixel_format={}",
        pipeline_config.target_frame_rate,
        pipeline_config.latency_mode,
        pipeline_config.pixel_format
    );

    let capture_source = open_capture_source(&capture_config)?;

    let session = PipelineSession::new(
        capture_source,
        PipelineSessionConfig {
            pipeline: pipeline_config,
            datagram_destination: args.datagram_destination,
            control_listen_addr: args.control_listen_addr,
            mtu: args.mtu,
            stream_id: args.stream_id,
        },
    );

    let shutdown_tx = session.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    session.run().await.map_err(anyhow::Error::from)
}

#[cfg(all(target_os = "linux", feature = "wayland-pipe"))]
fn open_capture_source(
    config: &CaptureSessionConfig,
) -> Result<Box<dyn rdp_host::CaptureSource>> {
    if rdp_host::is_wayland_session() {
        let source = rdp_host::capture::platform::WaylandCaptureSource::open(config)
            .map_err(anyhow::Error::from)?;
        return Ok(Box::new(source));
    }
    open_scrap_source(config)
}

#[cfg(all(not(all(target_os = "linux", feature = "wayland-pipe")), feature = "screen-capture"))]
fn open_capture_source(
    config: &CaptureSessionConfig,
) -> Result<Box<dyn rdp_host::CaptureSource>> {
    open_scrap_source(config)
}

#[cfg(feature = "screen-capture")]
fn open_scrap_source(config: &CaptureSessionConfig) -> Result<Box<dyn rdp_host::CaptureSource>> {
    let source = rdp_host::capture::platform::ScrapCaptureSource::open(config)
        .map_err(anyhow::Error::from)?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "screen-capture"))]
fn open_scrap_source(_config: &CaptureSessionConfig) -> Result<Box<dyn rdp_host::CaptureSource>> {
    anyhow::bail!("no X11/desktop capture backend enabled: build with --features screen-capture")
}

#[cfg(not(any(feature = "screen-capture", all(target_os = "linux", feature = "wayland-pipe"))))]
fn open_capture_source(
    _config: &CaptureSessionConfig,
) -> Result<Box<dyn rdp_host::CaptureSource>> {
    anyhow::bail!("no capture backend enabled: build with --features screen-capture or wayland-pipe")
}
