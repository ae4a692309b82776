//! # rdp-host
//!
//! Host side of a low-latency remote desktop streaming pipeline: captures
//! the desktop, copies frames out of the OS capture buffer under a
//! pacing controller, optionally hands them to a HEVC encoder
//! (`rdp-codec`, feature `hevc-encode`), and ships the result to a
//! client over the wire formats `rdp-wire` defines.
//!
//! ## Modules
//!
//! - [`error`]: the pipeline-wide error taxonomy (`PipelineError`) with
//!   severity, retry/recovery classification, and structured context.
//! - [`config`]: layered configuration (defaults → TOML file → CLI flags).
//! - [`capture`]: the capture engine (C4) — platform capture sources, the
//!   stall watchdog, and restart/backoff policy.
//! - [`pacing`]: the frame pacing controller (C5).
//! - [`copier`]: the frame copier (C3) — buffer pool and GPU/CPU copy
//!   backend selection.
//! - [`metrics`]: atomic counters for captured/copied/encoded/dropped
//!   frames and transport activity.
//! - [`transport`]: UDP datagram and TCP control channel bindings for
//!   `rdp-wire`'s wire formats.
//! - [`session`]: top-level orchestration (`PipelineSession`) tying every
//!   component together under one graceful-shutdown signal.

pub mod capture;
pub mod config;
pub mod copier;
pub mod error;
pub mod metrics;
pub mod pacing;
pub mod session;
pub mod transport;

pub use capture::CaptureSource;
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use session::{PipelineSession, PipelineSessionConfig};

/// Returns true if XDG_SESSION_TYPE indicates 'wayland'. Used to choose
/// between the `scrap`-backed capture source and a Wayland portal source.
#[cfg(target_os = "linux")]
pub fn is_wayland_session() -> bool {
    std::env::var("XDG_SESSION_TYPE")
        .map(|v| v.eq_ignore_ascii_case("wayland"))
        .unwrap_or(false)
}
