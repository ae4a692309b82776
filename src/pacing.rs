//! # Frame Pacing Controller
//!
//! Decides which captured frames are allowed to proceed to encode, based on
//! a target frame rate and a stall-resync rule. The three timing scalars
//! (`next_emit_time`, `last_emit_time`, `target_interval`) must move
//! together, so a single mutex around them is used rather than atomics,
//! mirroring the scalar-bundling discipline in `core::ring_buffer`'s cursor
//! handling.

use std::sync::Mutex;
use std::time::Duration;

struct PacingState {
    target_interval: Duration,
    next_emit_time: Duration,
    last_emit_time: Duration,
}

impl PacingState {
    fn new(target_fps: u32) -> Self {
        Self {
            target_interval: target_interval(target_fps),
            next_emit_time: Duration::ZERO,
            last_emit_time: Duration::ZERO,
        }
    }
}

fn target_interval(target_fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / target_fps.max(1) as f64)
}

/// Decides, for a stream of timestamped captured frames, which ones should
/// be handed to the encoder. `t` is a monotonic timestamp relative to an
/// arbitrary epoch shared by every call.
pub struct PacingController {
    state: Mutex<PacingState>,
    accepted: std::sync::atomic::AtomicU64,
    rejected: std::sync::atomic::AtomicU64,
}

impl PacingController {
    pub fn new(target_fps: u32) -> Self {
        Self {
            state: Mutex::new(PacingState::new(target_fps)),
            accepted: std::sync::atomic::AtomicU64::new(0),
            rejected: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Whether the frame captured at time `t` should proceed to encode.
    pub fn should_capture_frame(&self, t: Duration) -> bool {
        use std::sync::atomic::Ordering;

        let mut state = self.state.lock().expect("pacing mutex poisoned");

        if state.next_emit_time == Duration::ZERO {
            state.next_emit_time = t + state.target_interval;
            state.last_emit_time = t;
            self.accepted.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        if t < state.next_emit_time {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let stalled = state.last_emit_time > Duration::ZERO
            && t.saturating_sub(state.last_emit_time) > state.target_interval * 4;

        if stalled {
            state.next_emit_time = t + state.target_interval;
        } else {
            let elapsed = t.saturating_sub(state.next_emit_time);
            let intervals =
                (elapsed.as_secs_f64() / state.target_interval.as_secs_f64()).floor() as u64 + 1;
            let k = intervals.max(1);
            let increment = state.target_interval * k as u32;
            state.next_emit_time += increment;
        }

        state.last_emit_time = t;
        self.accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Resets all timing state to the value implied by a new target fps.
    pub fn update_target_fps(&self, target_fps: u32) {
        let mut state = self.state.lock().expect("pacing mutex poisoned");
        *state = PacingState::new(target_fps);
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_is_always_accepted() {
        let pacing = PacingController::new(60);
        assert!(pacing.should_capture_frame(Duration::from_secs(0)));
    }

    #[test]
    fn pacing_at_60_fps_over_a_120hz_feed_converges_near_60_accepts() {
        let pacing = PacingController::new(60);
        let step = Duration::from_secs_f64(1.0 / 240.0);
        let mut accepted = 0u32;
        let mut t = Duration::ZERO;
        for _ in 0..=240 {
            if pacing.should_capture_frame(t) {
                accepted += 1;
            }
            t += step;
        }
        assert!((59..=61).contains(&accepted), "accepted = {accepted}");
        assert!(pacing.rejected_count() >= 180);
    }

    #[test]
    fn a_gap_of_at_least_four_intervals_resynchronizes_instead_of_catching_up() {
        let pacing = PacingController::new(60);
        let interval = target_interval(60);

        assert!(pacing.should_capture_frame(Duration::ZERO));
        assert!(!pacing.should_capture_frame(interval / 2));

        let stall_time = interval * 10;
        assert!(pacing.should_capture_frame(stall_time));

        assert!(!pacing.should_capture_frame(stall_time + interval / 2));
        assert!(pacing.should_capture_frame(stall_time + interval));
    }

    #[test]
    fn update_target_fps_resets_timing_state() {
        let pacing = PacingController::new(30);
        assert!(pacing.should_capture_frame(Duration::from_secs(1)));
        pacing.update_target_fps(60);
        // After a reset the very next call is treated as the first frame again.
        assert!(pacing.should_capture_frame(Duration::from_millis(1)));
    }
}
