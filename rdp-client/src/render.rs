//! Pull-render trigger. Driven by the display's vsync callback, never by
//! decode: each tick looks up the cache entry and decides whether a redraw
//! is due by comparing sequence numbers. Must never suspend or call back
//! into an async scope from the tick itself.

use crate::frame_cache::{FrameCache, FrameCacheEntry};
use std::collections::HashMap;

#[derive(Default)]
pub struct RenderTrigger {
    last_rendered_sequence: HashMap<u32, u64>,
}

impl RenderTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on every vsync tick. Returns the entry to redraw if the
    /// stream's cached sequence is newer than the last one rendered.
    pub fn tick(&mut self, cache: &FrameCache, stream_id: u32) -> Option<FrameCacheEntry> {
        let entry = cache.get(stream_id)?;
        let last = self.last_rendered_sequence.get(&stream_id).copied();
        if last.is_some_and(|l| entry.sequence <= l) {
            return None;
        }
        self.last_rendered_sequence.insert(stream_id, entry.sequence);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_cache::ContentRect;

    fn rect() -> ContentRect {
        ContentRect { x: 0, y: 0, width: 100, height: 100 }
    }

    #[test]
    fn first_tick_after_a_frame_fires_redraw() {
        let cache = FrameCache::new();
        cache.update(1, vec![0u8; 4], rect());
        let mut trigger = RenderTrigger::new();
        assert!(trigger.tick(&cache, 1).is_some());
    }

    #[test]
    fn repeated_ticks_with_no_new_frame_do_not_refire() {
        let cache = FrameCache::new();
        cache.update(1, vec![0u8; 4], rect());
        let mut trigger = RenderTrigger::new();
        assert!(trigger.tick(&cache, 1).is_some());
        assert!(trigger.tick(&cache, 1).is_none());
    }

    #[test]
    fn a_new_frame_after_render_fires_again() {
        let cache = FrameCache::new();
        cache.update(1, vec![0u8; 4], rect());
        let mut trigger = RenderTrigger::new();
        assert!(trigger.tick(&cache, 1).is_some());
        cache.update(1, vec![1u8; 4], rect());
        assert!(trigger.tick(&cache, 1).is_some());
    }

    #[test]
    fn unknown_stream_never_fires() {
        let cache = FrameCache::new();
        let mut trigger = RenderTrigger::new();
        assert!(trigger.tick(&cache, 7).is_none());
    }
}
