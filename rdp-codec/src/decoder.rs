//! Client-side HEVC decode session: the mirror pipeline of `encoder.rs`,
//! `appsrc ! h265parse ! <hw-hevc-decoder> ! appsink`, feeding decoded raw
//! frames back to the frame cache instead of a renderer directly.

use anyhow::Context;
use anyhow::Result;
use glib::prelude::*;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use log::{info, warn};

use crate::error::CodecError;

fn platform_decoder_candidates() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &["vtdec_hw", "avdec_h265"]
    }
    #[cfg(target_os = "windows")]
    {
        &["d3d11h265dec", "nvh265dec", "avdec_h265"]
    }
    #[cfg(all(target_os = "linux", not(target_os = "macos"), not(target_os = "windows")))]
    {
        &["nvh265dec", "vaapih265dec", "avdec_h265"]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        &["avdec_h265"]
    }
}

pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

pub struct DecodeSession {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    width: u32,
    height: u32,
    has_seen_keyframe: bool,
}

impl DecodeSession {
    pub fn create(width: u32, height: u32, decoder_element: Option<&str>) -> Result<Self> {
        gst::init().context("gstreamer init")?;

        let decoder = decoder_element
            .map(str::to_string)
            .or_else(|| platform_decoder_candidates().first().map(|s| s.to_string()))
            .ok_or_else(|| CodecError::SessionCreate("no decoder candidate available".into()))?;

        let launch = format!(
            "appsrc name=src is-live=true format=time block=true \
             caps=video/x-h265,stream-format=byte-stream,alignment=au \
             ! h265parse \
             ! {decoder} \
             ! videoconvert \
             ! appsink name=sink sync=false max-buffers=2 drop=true"
        );

        let pipeline = gst::parse::launch(&launch)
            .with_context(|| format!("parsing decode launch string: {launch}"))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow::anyhow!("launch did not produce a Pipeline"))?;

        let bin: gst::Bin = pipeline.clone().upcast();
        let appsrc = bin
            .by_name("src")
            .ok_or_else(|| CodecError::SessionCreate("appsrc element missing".into()))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| CodecError::SessionCreate("src is not an AppSrc".into()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CodecError::SessionCreate(e.to_string()))?;

        info!("decode session created: {width}x{height} via {decoder}");

        Ok(Self {
            pipeline,
            appsrc,
            width,
            height,
            has_seen_keyframe: false,
        })
    }

    pub fn reconfigure_if_needed(&mut self, width: u32, height: u32) -> Result<()> {
        if width == self.width && height == self.height {
            return Ok(());
        }
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| CodecError::Configure(e.to_string()))?;
        let rebuilt = Self::create(width, height, None)?;
        *self = rebuilt;
        Ok(())
    }

    pub fn install_sample_callback<F>(&self, on_decoded: F) -> Result<()>
    where
        F: Fn(DecodedFrame) + Send + Sync + 'static,
    {
        let bin: gst::Bin = self.pipeline.clone().upcast();
        let appsink = bin
            .by_name("sink")
            .ok_or_else(|| CodecError::SessionCreate("appsink element missing".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CodecError::SessionCreate("sink is not an AppSink".into()))?;
        let width = self.width;
        let height = self.height;
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer
                        .map_readable()
                        .map_err(|_| gst::FlowError::Error)?;
                    on_decoded(DecodedFrame {
                        width,
                        height,
                        data: map.as_slice().to_vec(),
                    });
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
        Ok(())
    }

    /// Feeds one fully-reassembled encoded access unit. Frames arriving
    /// before the first keyframe (or a parameter-set-carrying fragment) are
    /// discarded, per the decode gating rule.
    pub fn push_encoded_frame(&mut self, payload: &[u8], pts_ns: u64, is_keyframe: bool) -> Result<()> {
        if is_keyframe {
            self.has_seen_keyframe = true;
        }
        if !self.has_seen_keyframe {
            warn!("discarding frame before first keyframe arrives");
            return Ok(());
        }

        let mut buffer = gst::Buffer::with_size(payload.len())
            .map_err(|_| CodecError::Submit("buffer allocation failed".into()))?;
        {
            let bufref = buffer.get_mut().unwrap();
            bufref.set_pts(gst::ClockTime::from_nseconds(pts_ns));
            let mut map = bufref
                .map_writable()
                .map_err(|_| CodecError::Submit("buffer map failed".into()))?;
            map.as_mut_slice().copy_from_slice(payload);
        }
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| CodecError::Submit(e.to_string()).into())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| CodecError::Configure(e.to_string()).into())
    }
}
