//! H.264 over RTP/UDP through GStreamer
//!
//! `appsrc ! videoconvert ! x264enc ! rtph264pay ! udpsink`. The encoder
//! takes the configured bitrate and speed preset, and `tune=zerolatency`
//! when low latency is requested.

use async_trait::async_trait;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use gstreamer_video::VideoInfo;
use log::{debug, info, warn};
use std::str::FromStr;

use super::TransmitPipeline;
use crate::assets::{MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH, RTP_PAYLOAD_TYPE};
use crate::capture::gst::{change_state, forward_bus, make};
use crate::config::TransmitConfig;
use crate::pipeline::bus::BusSender;
use crate::pipeline::caps::{CapsDescriptor, CapsFilter};
use crate::pipeline::error::RelayError;
use crate::pipeline::stage::{EndpointState, PipelineEndpoint};
use crate::pipeline::types::Sample;

/// `x264enc`-based transmit pipeline
pub struct H264Transmit {
    pipeline: Option<gst::Pipeline>,
    elements: Vec<gst::Element>,
    appsrc: AppSrc,
    bus: BusSender,
    caps: Option<CapsDescriptor>,
    /// Row stride GStreamer expects for the configured caps
    stride: usize,
    linked: bool,
    state: EndpointState,
}

impl H264Transmit {
    pub fn new(config: &TransmitConfig, bus: BusSender) -> Result<Self, RelayError> {
        gst::init().map_err(|e| RelayError::element(bus.role(), "gstreamer", e))?;

        let src = make(&bus, "appsrc", "transmit-src")?;
        src.set_property("is-live", true);
        src.set_property("do-timestamp", false);
        src.set_property_from_str("format", "time");
        let convert = make(&bus, "videoconvert", "transmit-convert")?;
        let encoder = make(&bus, "x264enc", "transmit-encoder")?;
        encoder.set_property("bitrate", config.bitrate_kbps);
        encoder.set_property_from_str("speed-preset", &config.speed_preset);
        if config.low_latency {
            encoder.set_property_from_str("tune", "zerolatency");
        }
        let payloader = make(&bus, "rtph264pay", "transmit-pay")?;
        payloader.set_property("config-interval", 1i32);
        payloader.set_property("pt", RTP_PAYLOAD_TYPE as u32);
        let sink = make(&bus, "udpsink", "transmit-sink")?;
        sink.set_property("host", config.host.as_str());
        sink.set_property("port", config.port as i32);
        sink.set_property("sync", false);

        let appsrc = src
            .clone()
            .dynamic_cast::<AppSrc>()
            .map_err(|_| RelayError::element(bus.role(), "appsrc", "not an appsrc"))?;

        info!(
            "x264enc: {} kbps, preset {}, low latency {}",
            config.bitrate_kbps, config.speed_preset, config.low_latency
        );

        Ok(Self {
            pipeline: Some(gst::Pipeline::with_name("transmit")),
            elements: vec![src, convert, encoder, payloader, sink],
            appsrc,
            bus,
            caps: None,
            stride: 0,
            linked: false,
            state: EndpointState::Idle,
        })
    }

    /// Copy tightly packed rows into the stride GStreamer expects
    fn repack(&self, sample: &Sample) -> gst::Buffer {
        let caps = sample.caps();
        let row = caps.tight_stride();
        if self.stride == row {
            return gst::Buffer::from_slice(sample.buffer().clone());
        }
        let mut data = vec![0u8; self.stride * caps.height as usize];
        for (src, dst) in sample
            .buffer()
            .chunks(sample.stride())
            .zip(data.chunks_mut(self.stride))
        {
            dst[..row].copy_from_slice(&src[..row]);
        }
        gst::Buffer::from_mut_slice(data)
    }
}

#[async_trait]
impl PipelineEndpoint for H264Transmit {
    fn name(&self) -> &'static str {
        "x264enc"
    }

    fn caps_filter(&self) -> CapsFilter {
        CapsFilter::any(MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT)
    }

    fn link(&mut self) -> Result<(), RelayError> {
        if self.linked {
            return Ok(());
        }
        let role = self.bus.role();
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| RelayError::link(role, "pipeline released"))?;
        pipeline
            .add_many(&self.elements)
            .map_err(|e| RelayError::link(role, e))?;
        gst::Element::link_many(&self.elements).map_err(|e| RelayError::link(role, e))?;
        forward_bus(pipeline, self.bus.clone())?;
        self.linked = true;
        Ok(())
    }

    fn configure(&mut self, caps: &CapsDescriptor) -> Result<(), RelayError> {
        self.caps_filter().check(caps).map_err(RelayError::negotiation)?;
        // I420 after conversion
        if caps.width % 2 != 0 || caps.height % 2 != 0 {
            return Err(RelayError::negotiation(format!(
                "x264enc needs even dimensions, got {}x{}",
                caps.width, caps.height
            )));
        }
        let gst_caps = gst::Caps::from_str(&caps.to_caps_string())
            .map_err(|e| RelayError::negotiation(format!("{}: {}", caps, e)))?;
        let info = VideoInfo::from_caps(&gst_caps)
            .map_err(|e| RelayError::negotiation(format!("{}: {}", caps, e)))?;
        self.appsrc.set_caps(Some(&gst_caps));
        self.stride = info.stride()[0] as usize;
        self.caps = Some(*caps);
        debug!("x264enc: appsrc caps {} (stride {})", gst_caps, self.stride);
        Ok(())
    }

    async fn set_state(&mut self, state: EndpointState) -> Result<(), RelayError> {
        let role = self.bus.role();
        if !self.linked && state != EndpointState::Stopped {
            return Err(RelayError::start(role, state, "pipeline not linked"));
        }
        if state == EndpointState::Active && self.caps.is_none() {
            return Err(RelayError::start(role, state, "caps not configured"));
        }
        if let Some(pipeline) = self.pipeline.clone() {
            let sender = self.bus.clone();
            tokio::task::spawn_blocking(move || change_state(&pipeline, &sender, state))
                .await
                .map_err(|e| RelayError::start(role, state, e))??;
        }
        info!("x264enc: {}", state);
        self.state = state;
        self.bus.state_changed(state);
        Ok(())
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    async fn release(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                warn!("x264enc: failed to reach Null: {}", e);
            }
            if let Some(bus) = pipeline.bus() {
                bus.unset_sync_handler();
            }
        }
        self.elements.clear();
        self.caps = None;
    }
}

#[async_trait]
impl TransmitPipeline for H264Transmit {
    async fn push_sample(&mut self, sample: Sample) -> Result<(), RelayError> {
        if self.state != EndpointState::Active {
            return Err(RelayError::push(format!("appsrc is {}", self.state)));
        }
        if Some(sample.caps()) != self.caps.as_ref() {
            return Err(RelayError::negotiation(format!(
                "appsrc not configured for {}",
                sample.caps()
            )));
        }

        let mut buffer = self.repack(&sample);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(gst::ClockTime::from_useconds(sample.pts().micros.max(0) as u64));
            let duration = sample.caps().framerate.frame_duration();
            if !duration.is_zero() {
                buffer.set_duration(gst::ClockTime::from_nseconds(duration.as_nanos() as u64));
            }
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| RelayError::push(format!("appsrc: {:?}", e)))?;
        Ok(())
    }

    async fn end_of_stream(&mut self) {
        if let Err(e) = self.appsrc.end_of_stream() {
            debug!("appsrc: end of stream not accepted: {:?}", e);
        }
    }
}
