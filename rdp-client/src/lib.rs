//! Client-side half of the streaming pipeline: datagram reassembly ingress,
//! decode gating, a per-stream frame cache, a vsync-driven pull-render
//! trigger, resize debouncing, and 120 Hz input resampling.

pub mod frame_cache;
pub mod input;
pub mod reassembly;
pub mod refresh_rate;
pub mod render;
pub mod resize;
pub mod session;

pub use frame_cache::{ContentRect, FrameCache, FrameCacheEntry};
pub use input::{PointerResampler, ScrollResampler, RESAMPLE_HZ};
pub use reassembly::{CompletedFrame, DecodeIngress};
pub use refresh_rate::RefreshRateMonitor;
pub use render::RenderTrigger;
pub use resize::{ResizeIntent, ResizeTracker};
pub use session::{ClientSession, ClientSessionConfig};
