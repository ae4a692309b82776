//! HEVC encode session: one shared GStreamer pipeline per stream, generalized
//! from the single shared RTSP encode pipeline pattern (`appsrc ! ... !
//! <encoder> ! ...`) into an Annex-B-emitting, session-versioned encoder with
//! no RTSP server attached — output is pulled from an `appsink` instead of
//! fed to `rtph264pay`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use glib::prelude::*;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use log::{debug, info, warn};

use rdp_wire::{LatencyMode, PixelFormat};

use crate::error::CodecError;
use crate::format::{
    bitrate_window_ms, default_in_flight_limit, keyframe_interval_seconds, profile_for,
    quality_to_qp, reframe_keyframe_payload, EncodeOutcome, EncodedUnit,
};

const PREHEAT_FRAME_COUNT: u32 = 10;

/// Caller-supplied shape for a new encode session. `encoder_element`
/// overrides the platform default (same override knob `RtspConfig::encoder`
/// gave the H.264 pipeline).
#[derive(Debug, Clone)]
pub struct EncodeSessionConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: u32,
    pub latency_mode: LatencyMode,
    pub quality: f32,
    pub max_bitrate: Option<u32>,
    pub keyframe_interval_frames: u32,
    pub encoder_element: Option<String>,
}

impl Default for EncodeSessionConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            pixel_format: PixelFormat::Nv12,
            frame_rate: 60,
            latency_mode: LatencyMode::Balanced,
            quality: 0.8,
            max_bitrate: None,
            keyframe_interval_frames: 120,
            encoder_element: None,
        }
    }
}

fn platform_encoder_candidates() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &["vtenc_h265", "x265enc"]
    }
    #[cfg(target_os = "windows")]
    {
        &["d3d11h265enc", "nvh265enc", "x265enc"]
    }
    #[cfg(all(target_os = "linux", not(target_os = "macos"), not(target_os = "windows")))]
    {
        &["nvh265enc", "vaapih265enc", "x265enc"]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        &["x265enc"]
    }
}

fn gst_video_format(pixel_format: PixelFormat) -> &'static str {
    match pixel_format {
        PixelFormat::Bgra8 => "BGRA",
        PixelFormat::Bgr10a2 => "BGR10A2_LE",
        PixelFormat::Nv12 => "NV12",
        PixelFormat::P010 => "P010_10LE",
    }
}

struct InFlightEntry {
    session_version: u64,
}

struct SessionState {
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    pipeline: gst::Pipeline,
    encoder_element_name: String,
}

/// Completion callbacks supplied to `start`, kept around so a rebuilt
/// appsink (from `update_dimensions`/`reset`) can have them reinstalled.
#[derive(Clone)]
struct SessionCallbacks {
    on_encoded: Arc<dyn Fn(EncodedUnit) + Send + Sync>,
    on_complete: Arc<dyn Fn(EncodeOutcome) + Send + Sync>,
}

/// Tracks pending submissions keyed by the PTS-derived frame number so the
/// appsink callback can recover the session version captured at submit time
/// and discard output from a superseded session.
struct InFlight {
    limit: AtomicU32,
    count: AtomicUsize,
    pending: Mutex<HashMap<u64, InFlightEntry>>,
}

pub struct EncodeSession {
    config: EncodeSessionConfig,
    active_pixel_format: PixelFormat,
    state: SessionState,
    session_version: Arc<AtomicU64>,
    frame_number: u64,
    frame_duration_ns: u64,
    keyframe_pending: AtomicBool,
    is_updating_dimensions: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
    callbacks: Option<SessionCallbacks>,
    started: bool,
}

impl EncodeSession {
    /// Builds the GStreamer pipeline and pauses it. Falls back from `P010`
    /// to `NV12` once if the initial attempt fails to reach `Paused`.
    pub fn create_session(config: EncodeSessionConfig) -> Result<Self> {
        match Self::try_create(&config, config.pixel_format) {
            Ok(session) => Ok(session),
            Err(err) if config.pixel_format == PixelFormat::P010 => {
                warn!(
                    "encoder session creation failed for P010 ({err:#}); degrading to NV12"
                );
                Self::try_create(&config, PixelFormat::Nv12)
            }
            Err(err) => Err(err),
        }
    }

    fn try_create(config: &EncodeSessionConfig, pixel_format: PixelFormat) -> Result<Self> {
        gst::init().context("gstreamer init")?;

        let encoder = config
            .encoder_element
            .clone()
            .or_else(|| platform_encoder_candidates().first().map(|s| s.to_string()))
            .ok_or_else(|| CodecError::SessionCreate("no encoder candidate available".into()))?;

        let encoder_name = "enc";
        let launch = format!(
            "appsrc name=src is-live=true format=time do-timestamp=false block=true \
             caps=video/x-raw,format={fmt},width={w},height={h},framerate={fps}/1 \
             ! videoconvert \
             ! {encoder} name={encoder_name} \
             ! h265parse config-interval=-1 \
             ! appsink name=sink sync=false max-buffers=4 drop=false",
            fmt = gst_video_format(pixel_format),
            w = config.width,
            h = config.height,
            fps = config.frame_rate.max(1),
            encoder = encoder,
            encoder_name = encoder_name,
        );

        let pipeline = gst::parse::launch(&launch)
            .with_context(|| format!("parsing launch string: {launch}"))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow!("launch did not produce a Pipeline"))?;

        let bin: gst::Bin = pipeline.clone().upcast();
        let appsrc = bin
            .by_name("src")
            .ok_or_else(|| CodecError::SessionCreate("appsrc element missing".into()))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| CodecError::SessionCreate("src is not an AppSrc".into()))?;
        let appsink = bin
            .by_name("sink")
            .ok_or_else(|| CodecError::SessionCreate("appsink element missing".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CodecError::SessionCreate("sink is not an AppSink".into()))?;

        appsrc.set_format(gst::Format::Time);

        Self::apply_encoder_properties(&bin, encoder_name, config, pixel_format)?;

        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| CodecError::SessionCreate(e.to_string()))?;

        info!(
            "encoder session created: {}x{} {} via {}",
            config.width, config.height, pixel_format, encoder
        );

        Ok(Self {
            config: config.clone(),
            active_pixel_format: pixel_format,
            state: SessionState {
                appsrc,
                appsink,
                pipeline,
                encoder_element_name: encoder_name.to_string(),
            },
            session_version: Arc::new(AtomicU64::new(0)),
            frame_number: 0,
            frame_duration_ns: 1_000_000_000u64 / config.frame_rate.max(1) as u64,
            keyframe_pending: AtomicBool::new(false),
            is_updating_dimensions: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(InFlight {
                limit: AtomicU32::new(default_in_flight_limit(config.frame_rate)),
                count: AtomicUsize::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
            callbacks: None,
            started: false,
        })
    }

    fn apply_encoder_properties(
        bin: &gst::Bin,
        encoder_name: &str,
        config: &EncodeSessionConfig,
        pixel_format: PixelFormat,
    ) -> Result<()> {
        let Some(enc) = bin.by_name(encoder_name) else {
            return Ok(());
        };
        let obj = enc.upcast_ref::<glib::Object>();
        let has_property = |name: &str| obj.find_property(name).is_some();

        if has_property("profile") {
            let _ = enc.set_property_from_str("profile", profile_for(pixel_format));
        }
        if has_property("key-int-max") {
            let gop = keyframe_interval_seconds(config.keyframe_interval_frames, config.frame_rate)
                * config.frame_rate.max(1);
            let _ = enc.set_property("key-int-max", gop.max(1));
        }
        if has_property("bframes") {
            let _ = enc.set_property("bframes", 0u32);
        }
        if has_property("realtime") {
            let _ = enc.set_property("realtime", true);
        }
        if let Some((min_qp, max_qp)) = quality_to_qp(config.quality) {
            if has_property("min-qp") {
                let _ = enc.set_property("min-qp", min_qp as i32);
            }
            if has_property("max-qp") {
                let _ = enc.set_property("max-qp", max_qp as i32);
            }
        }
        if let Some(max_bitrate) = config.max_bitrate {
            if has_property("bitrate") {
                let _ = enc.set_property("bitrate", max_bitrate);
            }
            debug!(
                "bitrate cap {max_bitrate} applied with a {}ms data-rate-limit window",
                bitrate_window_ms(config.frame_rate)
            );
        }
        Ok(())
    }

    pub fn get_active_pixel_format(&self) -> PixelFormat {
        self.active_pixel_format
    }

    /// Encodes 10 synthetic gray frames at the session dimensions, discards
    /// the output, then flushes and resets `frame_number` to 0.
    pub fn preheat(&mut self) -> Result<()> {
        let frame_size = self.synthetic_frame_size();
        let gray = vec![0x80u8; frame_size];
        self.state
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CodecError::SessionCreate(e.to_string()))?;

        for _ in 0..PREHEAT_FRAME_COUNT {
            self.push_raw_frame(&gray, false)?;
        }
        self.flush()?;
        self.frame_number = 0;
        info!("encoder session preheated with {PREHEAT_FRAME_COUNT} synthetic frames");
        Ok(())
    }

    fn synthetic_frame_size(&self) -> usize {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        match self.active_pixel_format {
            PixelFormat::Bgra8 | PixelFormat::Bgr10a2 => w * h * 4,
            PixelFormat::Nv12 => w * h * 3 / 2,
            PixelFormat::P010 => w * h * 3,
        }
    }

    /// Starts the pipeline playing and installs the appsink callback that
    /// demultiplexes completions back to `on_encoded`/`on_complete`. The
    /// callbacks are kept on the session so `update_dimensions`/`reset` can
    /// reinstall them on the rebuilt appsink.
    pub fn start<F, G>(&mut self, on_encoded: F, on_complete: G) -> Result<()>
    where
        F: Fn(EncodedUnit) + Send + Sync + 'static,
        G: Fn(EncodeOutcome) + Send + Sync + 'static,
    {
        self.callbacks = Some(SessionCallbacks {
            on_encoded: Arc::new(on_encoded),
            on_complete: Arc::new(on_complete),
        });
        self.install_appsink_callbacks();

        self.state
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CodecError::SessionCreate(e.to_string()))?;
        self.started = true;
        Ok(())
    }

    /// Wires `self.callbacks` onto `self.state.appsink`'s `new_sample`
    /// handler. A no-op before `start` has run (callbacks not yet supplied).
    fn install_appsink_callbacks(&self) {
        let Some(callbacks) = self.callbacks.clone() else {
            return;
        };
        let session_version = self.session_version.clone();
        let in_flight = self.in_flight.clone();
        let frame_duration_ns = self.frame_duration_ns;

        self.state.appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let pts = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
                    let frame_number = if frame_duration_ns > 0 {
                        pts / frame_duration_ns
                    } else {
                        0
                    };
                    let is_keyframe = !buffer
                        .flags()
                        .contains(gst::BufferFlags::DELTA_UNIT);

                    let captured_version = in_flight
                        .pending
                        .lock()
                        .unwrap()
                        .remove(&frame_number)
                        .map(|e| e.session_version);
                    in_flight.count.fetch_sub(1, Ordering::AcqRel);

                    let current_version = session_version.load(Ordering::Acquire);
                    match captured_version {
                        Some(v) if v == current_version => {
                            if let Ok(map) = buffer.map_readable() {
                                let payload = if is_keyframe {
                                    reframe_keyframe_payload(map.as_slice())
                                } else {
                                    map.as_slice().to_vec()
                                };
                                (callbacks.on_encoded)(EncodedUnit {
                                    frame_number,
                                    session_version: v,
                                    is_keyframe,
                                    payload,
                                });
                                (callbacks.on_complete)(EncodeOutcome::Delivered);
                            } else {
                                (callbacks.on_complete)(EncodeOutcome::DroppedEncoderError);
                            }
                        }
                        Some(_) => (callbacks.on_complete)(EncodeOutcome::DroppedStaleVersion),
                        None => (callbacks.on_complete)(EncodeOutcome::DroppedStaleVersion),
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
    }

    fn needs_keyframe(&self, force_keyframe: bool, just_recreated: bool) -> bool {
        self.frame_number == 0
            || self.keyframe_pending.swap(false, Ordering::AcqRel)
            || force_keyframe
            || just_recreated
    }

    /// Submits one raw frame. Reserves an in-flight slot before pushing and
    /// releases it (via `on_complete`) from the appsink callback or, on a
    /// synchronous failure here, immediately.
    pub fn encode_frame(&mut self, frame: &[u8], force_keyframe: bool) -> Result<()> {
        if self.is_updating_dimensions.load(Ordering::Acquire) {
            return Err(CodecError::Submit("dimensions update in progress".into()).into());
        }

        let limit = self.in_flight.limit.load(Ordering::Acquire) as usize;
        let reserved = self
            .in_flight
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                if c < limit {
                    Some(c + 1)
                } else {
                    None
                }
            })
            .is_ok();
        if !reserved {
            return Err(CodecError::Submit("in-flight limit reached".into()).into());
        }

        let keyframe = self.needs_keyframe(force_keyframe, false);
        if let Err(e) = self.push_raw_frame(frame, keyframe) {
            self.in_flight.count.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }

        self.in_flight.pending.lock().unwrap().insert(
            self.frame_number,
            InFlightEntry {
                session_version: self.session_version.load(Ordering::Acquire),
            },
        );
        self.frame_number += 1;
        Ok(())
    }

    fn push_raw_frame(&mut self, frame: &[u8], force_keyframe: bool) -> Result<()> {
        let mut buffer = gst::Buffer::with_size(frame.len())
            .map_err(|_| CodecError::Submit("buffer allocation failed".into()))?;
        {
            let bufref = buffer.get_mut().unwrap();
            let pts = self.frame_number * self.frame_duration_ns;
            bufref.set_pts(gst::ClockTime::from_nseconds(pts));
            bufref.set_duration(gst::ClockTime::from_nseconds(self.frame_duration_ns));
            let mut map = bufref
                .map_writable()
                .map_err(|_| CodecError::Submit("buffer map failed".into()))?;
            map.as_mut_slice().copy_from_slice(frame);
        }

        if force_keyframe {
            let event = gst_video::UpstreamForceKeyUnitEvent::builder()
                .all_headers(true)
                .build();
            self.state.appsrc.send_event(event);
        }

        self.state
            .appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| CodecError::Submit(e.to_string()).into())
    }

    pub fn update_quality(&mut self, quality: f32) -> Result<()> {
        self.config.quality = quality;
        let bin: gst::Bin = self.state.pipeline.clone().upcast();
        Self::apply_encoder_properties(&bin, &self.state.encoder_element_name, &self.config, self.active_pixel_format)
    }

    pub fn update_frame_rate(&mut self, frame_rate: u32) -> Result<()> {
        self.config.frame_rate = frame_rate;
        self.frame_duration_ns = 1_000_000_000u64 / frame_rate.max(1) as u64;
        self.in_flight
            .limit
            .store(default_in_flight_limit(frame_rate), Ordering::Release);
        Ok(())
    }

    pub fn update_in_flight_limit(&mut self, limit: u32) {
        self.in_flight.limit.store(limit, Ordering::Release);
    }

    pub fn force_keyframe(&self) {
        self.keyframe_pending.store(true, Ordering::Release);
    }

    /// Bumps `session_version`, tears down and rebuilds the session at new
    /// dimensions, dropping in-flight submissions from the old session.
    pub fn update_dimensions(&mut self, width: u32, height: u32) -> Result<()> {
        self.is_updating_dimensions.store(true, Ordering::Release);
        self.session_version.fetch_add(1, Ordering::AcqRel);
        self.in_flight.pending.lock().unwrap().clear();
        self.in_flight.count.store(0, Ordering::Release);

        self.state
            .pipeline
            .set_state(gst::State::Null)
            .map_err(|e| CodecError::Configure(e.to_string()))?;

        self.config.width = width;
        self.config.height = height;
        let rebuilt = Self::try_create(&self.config, self.active_pixel_format)?;
        self.state = rebuilt.state;
        self.install_appsink_callbacks();
        self.frame_number = 0;
        self.keyframe_pending.store(true, Ordering::Release);
        self.state
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CodecError::Configure(e.to_string()))?;
        self.is_updating_dimensions.store(false, Ordering::Release);
        Ok(())
    }

    /// Blocks until pending frames drain, then forces a keyframe on the next
    /// submit.
    pub fn flush(&mut self) -> Result<()> {
        self.state
            .appsrc
            .end_of_stream()
            .map_err(|e| CodecError::Configure(e.to_string()))?;
        let bus = self
            .state
            .pipeline
            .bus()
            .ok_or_else(|| CodecError::Configure("pipeline has no bus".into()))?;
        bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(5),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        );
        self.state
            .pipeline
            .seek_simple(gst::SeekFlags::FLUSH, gst::ClockTime::ZERO)
            .ok();
        self.keyframe_pending.store(true, Ordering::Release);
        Ok(())
    }

    /// Invalidates and recreates the session at stored dimensions.
    pub fn reset(&mut self) -> Result<()> {
        self.update_dimensions(self.config.width, self.config.height)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.state
            .pipeline
            .set_state(gst::State::Null)
            .map_err(|e| CodecError::Configure(e.to_string()))?;
        self.started = false;
        Ok(())
    }
}
