//! Local input resampling at 120 Hz. Pointer move/drag and scroll events
//! are held in a small state machine driven by a timer rather than forwarded
//! on every OS callback, so a 1000 Hz trackpad doesn't flood the control
//! channel.

use std::time::{Duration, Instant};

use rdp_wire::{Modifiers, PointerEvent, ScrollEvent, TouchPhase};

pub const RESAMPLE_HZ: u32 = 120;
pub const RESAMPLE_PERIOD: Duration = Duration::from_nanos(1_000_000_000 / RESAMPLE_HZ as u64);

/// Scroll velocity decays by this factor per idle tick once input stops, so
/// the wire gets a smoothly decelerating tail instead of one abrupt event
/// followed by silence.
const SCROLL_DECAY: f32 = 0.85;
const SCROLL_DECAY_FLOOR: f32 = 0.01;

pub struct PointerResampler {
    latest: Option<PointerEvent>,
    dirty: bool,
}

impl Default for PointerResampler {
    fn default() -> Self {
        Self { latest: None, dirty: false }
    }
}

impl PointerResampler {
    pub fn on_event(&mut self, event: PointerEvent) {
        self.latest = Some(event);
        self.dirty = true;
    }

    /// Called once per 120 Hz tick. Returns the event to send if a new
    /// pointer position arrived since the last tick.
    pub fn tick(&mut self) -> Option<PointerEvent> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        self.latest.clone()
    }
}

pub struct ScrollResampler {
    pending: Option<ScrollEvent>,
    decaying_delta: (f32, f32),
    last_input_at: Option<Instant>,
}

impl Default for ScrollResampler {
    fn default() -> Self {
        Self {
            pending: None,
            decaying_delta: (0.0, 0.0),
            last_input_at: None,
        }
    }
}

impl ScrollResampler {
    pub fn on_event(&mut self, event: ScrollEvent) {
        self.decaying_delta = (event.delta_x, event.delta_y);
        self.last_input_at = Some(Instant::now());
        self.pending = Some(event);
    }

    /// Called once per 120 Hz tick. Returns fresh input if it arrived this
    /// tick; otherwise, while the decaying tail is still above the floor,
    /// returns a synthesized momentum event and advances the decay.
    pub fn tick(&mut self) -> Option<ScrollEvent> {
        if let Some(event) = self.pending.take() {
            return Some(event);
        }

        let (dx, dy) = self.decaying_delta;
        if dx.abs() < SCROLL_DECAY_FLOOR && dy.abs() < SCROLL_DECAY_FLOOR {
            return None;
        }
        self.decaying_delta = (dx * SCROLL_DECAY, dy * SCROLL_DECAY);

        Some(ScrollEvent {
            delta_x: self.decaying_delta.0,
            delta_y: self.decaying_delta.1,
            phase: TouchPhase::None,
            momentum_phase: TouchPhase::Changed,
            is_precise: false,
            modifiers: Modifiers::NONE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer(x: f32, y: f32) -> PointerEvent {
        PointerEvent { x, y, modifiers: Modifiers::NONE }
    }

    fn scroll(dx: f32, dy: f32) -> ScrollEvent {
        ScrollEvent {
            delta_x: dx,
            delta_y: dy,
            phase: TouchPhase::Changed,
            momentum_phase: TouchPhase::None,
            is_precise: true,
            modifiers: Modifiers::NONE,
        }
    }

    #[test]
    fn pointer_tick_without_new_event_yields_nothing() {
        let mut r = PointerResampler::default();
        assert!(r.tick().is_none());
    }

    #[test]
    fn pointer_tick_consumes_the_latest_event_once() {
        let mut r = PointerResampler::default();
        r.on_event(pointer(0.1, 0.2));
        assert_eq!(r.tick(), Some(pointer(0.1, 0.2)));
        assert_eq!(r.tick(), None);
    }

    #[test]
    fn scroll_decays_after_input_stops() {
        let mut r = ScrollResampler::default();
        r.on_event(scroll(10.0, 0.0));
        let first = r.tick().unwrap();
        assert_eq!(first.delta_x, 10.0);

        let second = r.tick().unwrap();
        assert!(second.delta_x < first.delta_x);
        assert!(second.delta_x > 0.0);
    }

    #[test]
    fn scroll_decay_eventually_stops_emitting() {
        let mut r = ScrollResampler::default();
        r.on_event(scroll(1.0, 0.0));
        r.tick();
        let mut ticks = 0;
        while r.tick().is_some() {
            ticks += 1;
            assert!(ticks < 1000, "decay should terminate");
        }
    }
}
