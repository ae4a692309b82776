//! # Frame Copier
//!
//! Exchanges an externally-owned pixel buffer for a pipeline-owned one so
//! the capture source can release its buffer promptly. A pool keyed by
//! `(width, height, pixel_format)` backs the exchange; the pool is
//! recreated whenever any of those three change. Generalizes
//! `core::buffer_pool::BufferPool`'s flat byte pool into a dimension-keyed
//! one with an in-flight slot counter and rate-limited diagnostics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rdp_wire::PixelFormat;

/// Result of asking the copier to exchange a source buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled,
    InFlightLimit,
    PoolExhausted,
    Unsupported,
}

/// Which code path serviced a completed copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyBackend {
    Gpu,
    Cpu,
}

/// Returns the bi-planar/single-plane GPU copy layout for a pixel format,
/// or `None` if the format has no GPU blit path and must fall back to CPU.
pub fn gpu_layout(format: PixelFormat) -> Option<&'static str> {
    match format {
        PixelFormat::Bgra8 => Some("bgra8_unorm"),
        PixelFormat::Bgr10a2 => Some("bgr10a2_unorm"),
        PixelFormat::Nv12 => Some("nv12 (r8_unorm, rg8_unorm)"),
        PixelFormat::P010 => Some("p010 (r16_unorm, rg16_unorm)"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

struct Pool {
    key: PoolKey,
    buffer_size: usize,
    min_count: usize,
    buffers: VecDeque<Vec<u8>>,
}

impl Pool {
    fn new(key: PoolKey, buffer_size: usize, min_count: usize) -> Self {
        let mut buffers = VecDeque::with_capacity(min_count);
        for _ in 0..min_count {
            buffers.push_back(vec![0u8; buffer_size]);
        }
        Self {
            key,
            buffer_size,
            min_count,
            buffers,
        }
    }

    fn take(&mut self) -> Option<Vec<u8>> {
        self.buffers.pop_front()
    }

    fn give_back(&mut self, mut buffer: Vec<u8>) {
        buffer.fill(0);
        if self.buffers.len() < self.min_count.max(1) {
            self.buffers.push_back(buffer);
        }
    }
}

#[derive(Debug, Default)]
pub struct CopierMetrics {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub gpu_copies: AtomicU64,
    pub cpu_copies: AtomicU64,
    pub in_flight_drops: AtomicU64,
    pub pool_failures: AtomicU64,
    total_duration_us: AtomicU64,
    max_duration_us: AtomicU64,
}

impl CopierMetrics {
    pub fn average_duration(&self) -> Duration {
        let successes = self.successes.load(Ordering::Relaxed).max(1);
        Duration::from_micros(self.total_duration_us.load(Ordering::Relaxed) / successes)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_micros(self.max_duration_us.load(Ordering::Relaxed))
    }

    fn record_duration(&self, d: Duration) {
        let micros = d.as_micros() as u64;
        self.total_duration_us.fetch_add(micros, Ordering::Relaxed);
        self.max_duration_us.fetch_max(micros, Ordering::Relaxed);
    }
}

/// Exchanges externally-owned pixel buffers for pool-owned ones, preferring
/// a GPU blit and falling back to a per-row CPU copy.
pub struct FrameCopier {
    pool: Mutex<Option<Pool>>,
    in_flight: AtomicUsize,
    pub metrics: CopierMetrics,
    last_diagnostic_log: Mutex<Option<Instant>>,
}

impl FrameCopier {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            metrics: CopierMetrics::default(),
            last_diagnostic_log: Mutex::new(None),
        }
    }

    /// Reserves an in-flight slot; fails if `count >= in_flight_limit`.
    fn reserve_slot(&self, in_flight_limit: usize) -> bool {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                if count >= in_flight_limit {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .is_ok()
    }

    pub fn release_slot(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn ensure_pool(
        &self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        min_pool_count: usize,
        buffer_size: usize,
    ) {
        let key = PoolKey {
            width,
            height,
            pixel_format,
        };
        let mut guard = self.pool.lock().expect("copier pool mutex poisoned");
        let needs_recreate = match guard.as_ref() {
            Some(pool) => pool.key != key || pool.min_count != min_pool_count,
            None => true,
        };
        if needs_recreate {
            *guard = Some(Pool::new(key, buffer_size, min_pool_count));
        }
    }

    /// Exchanges `source` (an externally-owned pixel buffer, consumed and
    /// copied row-by-row or via a GPU blit) for a pooled buffer of the same
    /// size, invoking `on_complete` with the result.
    pub fn schedule_copy(
        &self,
        source: &[u8],
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        src_row_bytes: usize,
        dst_row_bytes: usize,
        min_pool_count: usize,
        in_flight_limit: usize,
        diagnostics_enabled: bool,
        on_complete: impl FnOnce(ScheduleOutcome, Option<Vec<u8>>),
    ) {
        self.metrics.attempts.fetch_add(1, Ordering::Relaxed);

        if !self.reserve_slot(in_flight_limit) {
            self.metrics.in_flight_drops.fetch_add(1, Ordering::Relaxed);
            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
            on_complete(ScheduleOutcome::InFlightLimit, None);
            return;
        }

        let buffer_size = height as usize * dst_row_bytes;
        self.ensure_pool(width, height, pixel_format, min_pool_count, buffer_size);

        let mut guard = self.pool.lock().expect("copier pool mutex poisoned");
        let Some(pool) = guard.as_mut() else {
            self.release_slot();
            self.metrics.pool_failures.fetch_add(1, Ordering::Relaxed);
            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
            on_complete(ScheduleOutcome::PoolExhausted, None);
            return;
        };

        let Some(mut destination) = pool.take() else {
            drop(guard);
            self.release_slot();
            self.metrics.pool_failures.fetch_add(1, Ordering::Relaxed);
            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
            on_complete(ScheduleOutcome::PoolExhausted, None);
            return;
        };
        drop(guard);

        let started = Instant::now();
        let backend = if gpu_layout(pixel_format).is_some() {
            match self.try_gpu_copy(source, &mut destination) {
                true => CopyBackend::Gpu,
                false => {
                    self.cpu_copy(source, &mut destination, src_row_bytes, dst_row_bytes, height);
                    CopyBackend::Cpu
                }
            }
        } else {
            self.cpu_copy(source, &mut destination, src_row_bytes, dst_row_bytes, height);
            CopyBackend::Cpu
        };

        match backend {
            CopyBackend::Gpu => self.metrics.gpu_copies.fetch_add(1, Ordering::Relaxed),
            CopyBackend::Cpu => self.metrics.cpu_copies.fetch_add(1, Ordering::Relaxed),
        };
        self.metrics.record_duration(started.elapsed());
        self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        self.release_slot();

        if diagnostics_enabled {
            self.log_rate_limited(backend, started.elapsed());
        }

        on_complete(ScheduleOutcome::Scheduled, Some(destination));
    }

    /// GPU blit is not implemented on this target; the caller always falls
    /// through to the CPU path. Kept as a seam so a real backend can hook
    /// in without changing `schedule_copy`'s contract.
    fn try_gpu_copy(&self, _source: &[u8], _destination: &mut [u8]) -> bool {
        false
    }

    fn cpu_copy(
        &self,
        source: &[u8],
        destination: &mut [u8],
        src_row_bytes: usize,
        dst_row_bytes: usize,
        height: u32,
    ) {
        let row_bytes = src_row_bytes.min(dst_row_bytes);
        for row in 0..height as usize {
            let src_start = row * src_row_bytes;
            let dst_start = row * dst_row_bytes;
            if src_start + row_bytes > source.len() || dst_start + row_bytes > destination.len() {
                break;
            }
            destination[dst_start..dst_start + row_bytes]
                .copy_from_slice(&source[src_start..src_start + row_bytes]);
        }
    }

    fn log_rate_limited(&self, backend: CopyBackend, duration: Duration) {
        let mut last = self
            .last_diagnostic_log
            .lock()
            .expect("diagnostic log mutex poisoned");
        let should_log = match *last {
            Some(at) => at.elapsed() >= Duration::from_secs(2),
            None => true,
        };
        if should_log {
            log::debug!("frame copy via {backend:?} took {duration:?}");
            *last = Some(Instant::now());
        }
    }
}

impl Default for FrameCopier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_copy_returns_pool_owned_buffer_of_requested_size() {
        let copier = FrameCopier::new();
        let source = vec![7u8; 16 * 16 * 4];
        let mut delivered = None;
        copier.schedule_copy(
            &source,
            16,
            16,
            PixelFormat::Bgra8,
            16 * 4,
            16 * 4,
            2,
            4,
            false,
            |outcome, buffer| {
                assert_eq!(outcome, ScheduleOutcome::Scheduled);
                delivered = buffer;
            },
        );
        let buffer = delivered.expect("buffer delivered");
        assert_eq!(buffer.len(), 16 * 16 * 4);
        assert_eq!(buffer, source);
    }

    #[test]
    fn in_flight_limit_of_zero_always_rejects() {
        let copier = FrameCopier::new();
        let source = vec![0u8; 64];
        let mut outcome = None;
        copier.schedule_copy(
            &source, 4, 4, PixelFormat::Bgra8, 16, 16, 1, 0, false, |o, _| outcome = Some(o),
        );
        assert_eq!(outcome, Some(ScheduleOutcome::InFlightLimit));
    }

    #[test]
    fn mismatched_row_bytes_copies_the_smaller_width() {
        let copier = FrameCopier::new();
        let height = 2usize;
        let src_row = 8usize;
        let dst_row = 4usize;
        let mut source = vec![0u8; src_row * height];
        for (i, b) in source.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut delivered = None;
        copier.schedule_copy(
            &source,
            4,
            height as u32,
            PixelFormat::Nv12,
            src_row,
            dst_row,
            1,
            2,
            false,
            |_, buffer| delivered = buffer,
        );
        let buffer = delivered.expect("buffer delivered");
        assert_eq!(&buffer[0..dst_row], &source[0..dst_row]);
        assert_eq!(&buffer[dst_row..dst_row * 2], &source[src_row..src_row + dst_row]);
    }

    #[test]
    fn pool_is_recreated_when_dimensions_change() {
        let copier = FrameCopier::new();
        let source_a = vec![1u8; 8 * 8 * 4];
        let source_b = vec![2u8; 16 * 16 * 4];
        copier.schedule_copy(
            &source_a, 8, 8, PixelFormat::Bgra8, 32, 32, 1, 2, false, |_, _| {},
        );
        let mut delivered = None;
        copier.schedule_copy(
            &source_b, 16, 16, PixelFormat::Bgra8, 64, 64, 1, 2, false, |_, buf| {
                delivered = buf;
            },
        );
        assert_eq!(delivered.expect("buffer delivered").len(), 16 * 16 * 4);
    }
}
