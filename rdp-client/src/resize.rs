//! Resize blur/hold state machine: suppresses churn from micro-changes
//! (status bar, dock appearing) while debouncing the message sent to the
//! host when a real resize is in progress.

use std::time::Duration;

pub const SIGNIFICANT_RELATIVE_THRESHOLD: f32 = 0.02;
pub const SIGNIFICANT_PIXEL_THRESHOLD: u32 = 20;
pub const DEBOUNCE: Duration = Duration::from_millis(200);
pub const FALLBACK_CLEAR: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeIntent {
    pub aspect_ratio: f32,
    pub relative_scale: f32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default)]
pub struct ResizeTracker {
    last_width: u32,
    last_height: u32,
    is_resizing: bool,
    pending: Option<ResizeIntent>,
}

fn is_significant(old_w: u32, old_h: u32, new_w: u32, new_h: u32) -> bool {
    let dw = (new_w as i64 - old_w as i64).unsigned_abs() as u32;
    let dh = (new_h as i64 - old_h as i64).unsigned_abs() as u32;
    if dw > SIGNIFICANT_PIXEL_THRESHOLD || dh > SIGNIFICANT_PIXEL_THRESHOLD {
        return true;
    }
    let old_area = (old_w.max(1) * old_h.max(1)) as f32;
    let new_area = (new_w * new_h) as f32;
    ((new_area - old_area).abs() / old_area) > SIGNIFICANT_RELATIVE_THRESHOLD
}

impl ResizeTracker {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            last_width: width,
            last_height: height,
            is_resizing: false,
            pending: None,
        }
    }

    pub fn is_resizing(&self) -> bool {
        self.is_resizing
    }

    /// Called on every drawable-size change. Returns the intent to debounce
    /// to the host if this change is significant enough to enter or continue
    /// the resizing state; micro-changes below the threshold are ignored.
    pub fn on_size_changed(
        &mut self,
        new_width: u32,
        new_height: u32,
        screen_area: f32,
    ) -> Option<ResizeIntent> {
        if !is_significant(self.last_width, self.last_height, new_width, new_height) {
            return None;
        }
        self.is_resizing = true;
        self.last_width = new_width;
        self.last_height = new_height;

        let intent = ResizeIntent {
            aspect_ratio: new_width as f32 / new_height.max(1) as f32,
            relative_scale: (new_width * new_height) as f32 / screen_area.max(1.0),
            width: new_width,
            height: new_height,
        };
        self.pending = Some(intent);
        Some(intent)
    }

    /// The host acknowledged the resize; clears the resizing state.
    pub fn acknowledge(&mut self) {
        self.is_resizing = false;
        self.pending = None;
    }

    /// Called by the ~2s fallback timer; clears the resizing state even if
    /// the host's acknowledgment was lost.
    pub fn clear_on_fallback_timeout(&mut self) {
        self.is_resizing = false;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micro_change_is_suppressed() {
        let mut tracker = ResizeTracker::new(1000, 1000);
        assert!(tracker.on_size_changed(1005, 1000, 4_000_000.0).is_none());
        assert!(!tracker.is_resizing());
    }

    #[test]
    fn large_pixel_change_enters_resizing_state() {
        let mut tracker = ResizeTracker::new(1000, 1000);
        let intent = tracker.on_size_changed(1030, 1000, 4_000_000.0);
        assert!(intent.is_some());
        assert!(tracker.is_resizing());
    }

    #[test]
    fn acknowledge_clears_resizing_state() {
        let mut tracker = ResizeTracker::new(1000, 1000);
        tracker.on_size_changed(1100, 1000, 4_000_000.0);
        assert!(tracker.is_resizing());
        tracker.acknowledge();
        assert!(!tracker.is_resizing());
    }

    #[test]
    fn fallback_timeout_clears_even_without_ack() {
        let mut tracker = ResizeTracker::new(1000, 1000);
        tracker.on_size_changed(1100, 1000, 4_000_000.0);
        tracker.clear_on_fallback_timeout();
        assert!(!tracker.is_resizing());
    }
}
