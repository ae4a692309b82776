//! # Capture Engine (C4)
//!
//! Configures and runs the OS capture source in window or display mode,
//! maintains output scale/alignment, reacts to dimension changes, detects
//! stalls via a watchdog, and restarts capture when the source goes silent.
//! The concrete OS-capture backends live in [`platform`]; the watchdog and
//! restart state machine are new, grounded in `session.rs`'s
//! `tokio::sync::watch`-based shutdown signaling for the same "single owner,
//! foreign-thread callbacks only communicate via atomics" discipline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CaptureSessionConfig;
use crate::error::{PipelineError, PipelineResult};

#[cfg(any(feature = "screen-capture", all(target_os = "linux", feature = "wayland-pipe")))]
pub mod platform;

/// How the OS source labeled a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Normal,
    /// Dropped by the caller; never delivered upward.
    Blank,
    /// Dropped by the caller; never delivered upward.
    Suspended,
    /// Delivered with `is_idle = true`; keeps the stream alive.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub struct CapturedFrame {
    pub pixel_buffer: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub content_rect: ContentRect,
    pub dirty_percentage: u8,
    pub status: FrameStatus,
}

/// Abstract interface for OS-specific capture backends. A single owner
/// drives this trait from one task; it is not `Sync` because nothing
/// besides that owner should call into it concurrently.
pub trait CaptureSource: Send {
    fn capture_frame(&mut self) -> PipelineResult<CapturedFrame>;
    fn native_size(&self) -> (u32, u32);
    fn reconfigure(&mut self, config: &CaptureSessionConfig) -> PipelineResult<()>;
    fn stop(&mut self) -> PipelineResult<()>;
}

/// `frame_gap_threshold(fps)`: the gap after which the engine enters
/// fallback mode.
pub fn frame_gap_threshold(fps: u32) -> Duration {
    if fps >= 120 {
        Duration::from_millis(180)
    } else if fps >= 60 {
        Duration::from_millis(300)
    } else if fps >= 30 {
        Duration::from_millis(500)
    } else {
        Duration::from_millis(1500)
    }
}

/// `stall_threshold(fps)`: the gap after which a restart is signaled.
pub fn stall_threshold(fps: u32) -> Duration {
    if fps >= 120 {
        Duration::from_millis(2500)
    } else if fps >= 60 {
        Duration::from_millis(2000)
    } else if fps >= 30 {
        Duration::from_millis(2500)
    } else {
        Duration::from_millis(4000)
    }
}

/// A fallback period shorter than this needs no keyframe on resume.
pub const KEYFRAME_THRESHOLD: Duration = Duration::from_millis(350);

pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(50);
pub const RESTART_MAX_ATTEMPTS: u32 = 6;
const RESTART_BASE_BACKOFF_MS: f64 = 80.0;
const RESTART_BACKOFF_FACTOR: f64 = 1.6;
const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(1);

/// Exponential backoff delay before restart attempt `attempt` (0-indexed).
pub fn restart_backoff_delay(attempt: u32) -> Duration {
    let ms = RESTART_BASE_BACKOFF_MS * RESTART_BACKOFF_FACTOR.powi(attempt as i32);
    Duration::from_millis(ms as u64).min(RESTART_BACKOFF_CAP)
}

/// Whether a dimension change from `(old_w, old_h)` to `(new_w, new_h)` is
/// significant enough to warrant reconfiguring the source (≥2% or ≥20 px).
pub fn dimension_change_is_significant(old_w: u32, old_h: u32, new_w: u32, new_h: u32) -> bool {
    let dw = (new_w as i64 - old_w as i64).unsigned_abs();
    let dh = (new_h as i64 - old_h as i64).unsigned_abs();
    if dw >= 20 || dh >= 20 {
        return true;
    }
    let rel_w = dw as f64 / old_w.max(1) as f64;
    let rel_h = dh as f64 / old_h.max(1) as f64;
    rel_w >= 0.02 || rel_h >= 0.02
}

/// Pool minimum per spec.md §4.4: `max(6, queue_depth + extra)`.
pub fn pool_minimum(queue_depth: u32, latency_mode: rdp_wire::LatencyMode, frame_rate: u32) -> u32 {
    let extra = match (latency_mode, frame_rate) {
        (rdp_wire::LatencyMode::LowestLatency, _) => 2,
        (rdp_wire::LatencyMode::Balanced, fps) if fps >= 60 => 4,
        (rdp_wire::LatencyMode::Balanced, _) => 3,
        (rdp_wire::LatencyMode::Smoothest, fps) if fps >= 120 => 6,
        (rdp_wire::LatencyMode::Smoothest, _) => 5,
    };
    (queue_depth + extra).max(6)
}

/// Outcome of a single watchdog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// No gap, or gap below `frame_gap_threshold`.
    Healthy,
    /// Gap exceeded `frame_gap_threshold` but not `stall_threshold`.
    EnteredFallback,
    /// Gap exceeded `stall_threshold`; a restart should be triggered.
    Stalled,
}

/// Tracks frame-delivery timing and decides, every tick, whether the
/// source looks stalled. Pure state machine: the owning task is
/// responsible for calling `tick` on a 50ms cadence and acting on the
/// returned event (spawning the restart protocol, etc).
pub struct StallWatchdog {
    last_delivered_frame_time: Mutex<Option<Instant>>,
    fallback_start_time: Mutex<Option<Instant>>,
    last_stall_signal: Mutex<Option<Instant>>,
    stall_cooldown: Duration,
    is_restarting: AtomicBool,
}

impl StallWatchdog {
    pub fn new(stall_cooldown: Duration) -> Self {
        Self {
            last_delivered_frame_time: Mutex::new(None),
            fallback_start_time: Mutex::new(None),
            last_stall_signal: Mutex::new(None),
            stall_cooldown,
            is_restarting: AtomicBool::new(false),
        }
    }

    pub fn record_frame_delivered(&self, at: Instant) {
        *self
            .last_delivered_frame_time
            .lock()
            .expect("watchdog mutex poisoned") = Some(at);
        *self
            .fallback_start_time
            .lock()
            .expect("watchdog mutex poisoned") = None;
    }

    /// Runs one watchdog evaluation at time `now` for the given target fps.
    pub fn tick(&self, now: Instant, fps: u32) -> WatchdogEvent {
        let last = *self
            .last_delivered_frame_time
            .lock()
            .expect("watchdog mutex poisoned");
        let Some(last) = last else {
            return WatchdogEvent::Healthy;
        };
        let gap = now.saturating_duration_since(last);

        if gap <= frame_gap_threshold(fps) {
            return WatchdogEvent::Healthy;
        }

        {
            let mut fallback_start = self
                .fallback_start_time
                .lock()
                .expect("watchdog mutex poisoned");
            if fallback_start.is_none() {
                *fallback_start = Some(now);
            }
        }

        if gap <= stall_threshold(fps) {
            return WatchdogEvent::EnteredFallback;
        }

        let mut last_signal = self
            .last_stall_signal
            .lock()
            .expect("watchdog mutex poisoned");
        let cooled_down = match *last_signal {
            Some(at) => now.saturating_duration_since(at) >= self.stall_cooldown,
            None => true,
        };
        if cooled_down {
            *last_signal = Some(now);
            WatchdogEvent::Stalled
        } else {
            WatchdogEvent::EnteredFallback
        }
    }

    /// Whether a frame arriving now, after the recorded fallback start,
    /// crosses the keyframe threshold and therefore needs a keyframe.
    pub fn resume_needs_keyframe(&self, now: Instant) -> bool {
        let fallback_start = *self
            .fallback_start_time
            .lock()
            .expect("watchdog mutex poisoned");
        match fallback_start {
            Some(start) => now.saturating_duration_since(start) > KEYFRAME_THRESHOLD,
            None => false,
        }
    }

    /// Reject nested restarts; returns `true` if the caller acquired the
    /// restart guard and should proceed.
    pub fn try_begin_restart(&self) -> bool {
        self.is_restarting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn finish_restart(&self) {
        self.is_restarting.store(false, Ordering::SeqCst);
        *self
            .fallback_start_time
            .lock()
            .expect("watchdog mutex poisoned") = None;
    }
}

/// Runs the restart protocol's target-resolution retry loop: calls
/// `resolve` up to `RESTART_MAX_ATTEMPTS` times with exponential backoff
/// until it returns `Some`, otherwise falls back to `cached`.
pub fn resolve_targets_with_backoff<T: Clone>(
    mut resolve: impl FnMut(u32) -> Option<T>,
    cached: Option<T>,
    mut sleep: impl FnMut(Duration),
) -> PipelineResult<T> {
    for attempt in 0..RESTART_MAX_ATTEMPTS {
        if let Some(target) = resolve(attempt) {
            return Ok(target);
        }
        if attempt + 1 < RESTART_MAX_ATTEMPTS {
            sleep(restart_backoff_delay(attempt));
        }
    }
    cached.ok_or_else(|| {
        PipelineError::capture(
            "unknown",
            "failed to resolve capture targets after retries and no cached target available",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_gap_thresholds_match_the_table() {
        assert_eq!(frame_gap_threshold(144), Duration::from_millis(180));
        assert_eq!(frame_gap_threshold(60), Duration::from_millis(300));
        assert_eq!(frame_gap_threshold(30), Duration::from_millis(500));
        assert_eq!(frame_gap_threshold(15), Duration::from_millis(1500));
    }

    #[test]
    fn stall_thresholds_match_the_table() {
        assert_eq!(stall_threshold(144), Duration::from_millis(2500));
        assert_eq!(stall_threshold(60), Duration::from_millis(2000));
        assert_eq!(stall_threshold(30), Duration::from_millis(2500));
        assert_eq!(stall_threshold(15), Duration::from_millis(4000));
    }

    #[test]
    fn restart_backoff_follows_the_geometric_schedule_and_caps_at_one_second() {
        assert_eq!(restart_backoff_delay(0), Duration::from_millis(80));
        assert_eq!(restart_backoff_delay(1), Duration::from_millis(128));
        for attempt in 0..20 {
            assert!(restart_backoff_delay(attempt) <= Duration::from_secs(1));
        }
    }

    #[test]
    fn small_dimension_changes_are_not_significant() {
        assert!(!dimension_change_is_significant(1920, 1080, 1921, 1080));
        assert!(dimension_change_is_significant(1920, 1080, 1960, 1080));
        assert!(dimension_change_is_significant(100, 100, 119, 100));
    }

    #[test]
    fn watchdog_signals_fallback_then_stall_as_the_gap_widens() {
        let watchdog = StallWatchdog::new(Duration::from_secs(1));
        let start = Instant::now();
        watchdog.record_frame_delivered(start);

        assert_eq!(
            watchdog.tick(start + Duration::from_millis(100), 60),
            WatchdogEvent::Healthy
        );
        assert_eq!(
            watchdog.tick(start + Duration::from_millis(400), 60),
            WatchdogEvent::EnteredFallback
        );
        assert_eq!(
            watchdog.tick(start + Duration::from_millis(2_100), 60),
            WatchdogEvent::Stalled
        );
    }

    #[test]
    fn keyframe_on_resume_after_a_500ms_stall_with_300ms_gap_threshold() {
        let watchdog = StallWatchdog::new(Duration::from_secs(1));
        let start = Instant::now();
        watchdog.record_frame_delivered(start);
        // Drive the watchdog past the fallback threshold so fallback_start_time is set.
        watchdog.tick(start + Duration::from_millis(320), 60);
        assert!(watchdog.resume_needs_keyframe(start + Duration::from_millis(500)));
    }

    #[test]
    fn short_fallback_does_not_need_a_keyframe() {
        let watchdog = StallWatchdog::new(Duration::from_secs(1));
        let start = Instant::now();
        watchdog.record_frame_delivered(start);
        watchdog.tick(start + Duration::from_millis(320), 60);
        assert!(!watchdog.resume_needs_keyframe(start + Duration::from_millis(360)));
    }

    #[test]
    fn restart_guard_rejects_nested_restarts() {
        let watchdog = StallWatchdog::new(Duration::from_secs(1));
        assert!(watchdog.try_begin_restart());
        assert!(!watchdog.try_begin_restart());
        watchdog.finish_restart();
        assert!(watchdog.try_begin_restart());
    }

    #[test]
    fn resolve_targets_with_backoff_falls_back_to_cached_after_exhausting_attempts() {
        let mut attempts = 0;
        let result = resolve_targets_with_backoff(
            |_attempt| {
                attempts += 1;
                None::<u32>
            },
            Some(7u32),
            |_delay| {},
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, RESTART_MAX_ATTEMPTS);
    }

    #[test]
    fn resolve_targets_with_backoff_returns_as_soon_as_resolve_succeeds() {
        let result = resolve_targets_with_backoff(
            |attempt| if attempt == 2 { Some(99u32) } else { None },
            None,
            |_delay| {},
        );
        assert_eq!(result.unwrap(), 99);
    }
}
