//! Process-wide `stream_id -> decoded frame` cache. Writers are the decode
//! callback; readers are the render path. Both sides hold the mutex only
//! long enough to read or replace one entry, the same short-critical-section
//! discipline the buffer pool uses around its `VecDeque`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct ContentRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One decoded frame plus the bookkeeping the render trigger needs to decide
/// whether a redraw is due.
#[derive(Debug, Clone)]
pub struct FrameCacheEntry {
    pub pixel_buffer: Arc<Vec<u8>>,
    pub content_rect: ContentRect,
    pub sequence: u64,
    pub texture_handle: Option<u64>,
}

#[derive(Debug, Default)]
pub struct FrameCache {
    entries: Mutex<HashMap<u32, FrameCacheEntry>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entry for `stream_id`, bumping `sequence` to one past
    /// whatever was stored before (0 if this is the first frame).
    pub fn update(&self, stream_id: u32, pixel_buffer: Vec<u8>, content_rect: ContentRect) -> u64 {
        let mut entries = self.entries.lock().unwrap();
        let sequence = entries.get(&stream_id).map(|e| e.sequence + 1).unwrap_or(0);
        entries.insert(
            stream_id,
            FrameCacheEntry {
                pixel_buffer: Arc::new(pixel_buffer),
                content_rect,
                sequence,
                texture_handle: None,
            },
        );
        sequence
    }

    /// Reads the entry under a short lock and returns an owned clone (the
    /// pixel buffer itself is `Arc`-shared, so this clone is cheap).
    pub fn get(&self, stream_id: u32) -> Option<FrameCacheEntry> {
        self.entries.lock().unwrap().get(&stream_id).cloned()
    }

    pub fn remove(&self, stream_id: u32) {
        self.entries.lock().unwrap().remove(&stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect() -> ContentRect {
        ContentRect { x: 0, y: 0, width: 1920, height: 1080 }
    }

    #[test]
    fn sequence_increments_per_stream_on_each_update() {
        let cache = FrameCache::new();
        let s0 = cache.update(1, vec![0u8; 4], rect());
        let s1 = cache.update(1, vec![1u8; 4], rect());
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);
        assert_eq!(cache.get(1).unwrap().sequence, 1);
    }

    #[test]
    fn separate_streams_have_independent_sequences() {
        let cache = FrameCache::new();
        cache.update(1, vec![0u8; 4], rect());
        let s_other = cache.update(2, vec![0u8; 4], rect());
        assert_eq!(s_other, 0);
    }

    #[test]
    fn missing_stream_returns_none() {
        let cache = FrameCache::new();
        assert!(cache.get(99).is_none());
    }
}
