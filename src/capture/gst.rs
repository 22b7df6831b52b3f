//! Video4Linux capture through GStreamer
//!
//! `v4l2src ! videoconvert ! videoscale ! videorate ! appsink`, with the
//! appsink holding at most one buffer and dropping older ones. Samples are
//! handed to the relay through the same one-deep slot as every capture
//! backend; bus errors and EOS are forwarded to the relay's event channel.

use async_trait::async_trait;
use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks};
use gstreamer_video::VideoInfo;
use log::{debug, info, warn};
use std::str::FromStr;
use std::sync::Arc;

use super::CapturePipeline;
use crate::assets::{MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH, STATE_CHANGE_TIMEOUT};
use crate::config::CaptureConfig;
use crate::pipeline::bus::BusSender;
use crate::pipeline::caps::{CapsDescriptor, CapsFilter};
use crate::pipeline::error::RelayError;
use crate::pipeline::slot::LatestSlot;
use crate::pipeline::stage::{EndpointState, PipelineEndpoint};
use crate::pipeline::types::{Sample, Timestamp};

/// Map an endpoint state onto the GStreamer state machine
pub(crate) fn gst_state(state: EndpointState) -> gst::State {
    match state {
        EndpointState::Idle | EndpointState::Stopped => gst::State::Null,
        EndpointState::Ready => gst::State::Ready,
        EndpointState::Active => gst::State::Playing,
    }
}

/// Forward errors, warnings and EOS from a GStreamer bus
pub(crate) fn forward_bus(pipeline: &gst::Pipeline, sender: BusSender) -> Result<(), RelayError> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| RelayError::element(sender.role(), "bus", "pipeline has no bus"))?;
    bus.set_sync_handler(move |_, msg| {
        use gst::MessageView;

        let source = || {
            msg.src()
                .map(|s| s.path_string().to_string())
                .unwrap_or_default()
        };
        match msg.view() {
            MessageView::Error(err) => {
                sender.error(format!("{}: {} ({:?})", source(), err.error(), err.debug()))
            }
            MessageView::Warning(w) => sender.warning(format!("{}: {}", source(), w.error())),
            MessageView::Eos(..) => sender.eos(),
            _ => {}
        }
        gst::BusSyncReply::Drop
    });
    Ok(())
}

/// Command `pipeline` to `state` and wait for it
pub(crate) fn change_state(
    pipeline: &gst::Pipeline,
    sender: &BusSender,
    state: EndpointState,
) -> Result<(), RelayError> {
    let target = gst_state(state);
    pipeline
        .set_state(target)
        .map_err(|e| RelayError::start(sender.role(), state, e))?;
    let timeout = gst::ClockTime::from_mseconds(STATE_CHANGE_TIMEOUT.as_millis() as u64);
    let (result, current, _) = pipeline.state(timeout);
    result.map_err(|e| {
        RelayError::start(sender.role(), state, format!("{} (stuck in {:?})", e, current))
    })?;
    Ok(())
}

pub(crate) fn make(
    sender: &BusSender,
    factory: &str,
    name: &str,
) -> Result<gst::Element, RelayError> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| RelayError::element(sender.role(), factory, e))
}

/// `v4l2src`-based capture pipeline
pub struct V4l2Capture {
    pipeline: Option<gst::Pipeline>,
    elements: Vec<gst::Element>,
    appsink: AppSink,
    bus: BusSender,
    slot: Arc<LatestSlot<Sample>>,
    caps: Option<CapsDescriptor>,
    linked: bool,
    state: EndpointState,
}

impl V4l2Capture {
    /// Construct every element; nothing is linked yet
    pub fn new(config: &CaptureConfig, bus: BusSender) -> Result<Self, RelayError> {
        gst::init().map_err(|e| RelayError::element(bus.role(), "gstreamer", e))?;

        let src = make(&bus, "v4l2src", "capture-src")?;
        src.set_property("device", config.device.as_str());
        if let Some(n) = config.num_buffers {
            src.set_property("num-buffers", n.min(i32::MAX as u64) as i32);
        }
        let convert = make(&bus, "videoconvert", "capture-convert")?;
        let scale = make(&bus, "videoscale", "capture-scale")?;
        let rate = make(&bus, "videorate", "capture-rate")?;
        let sink = make(&bus, "appsink", "capture-sink")?;
        sink.set_property("max-buffers", 1u32);
        sink.set_property("drop", true);
        sink.set_property("sync", false);

        let appsink = sink
            .clone()
            .dynamic_cast::<AppSink>()
            .map_err(|_| RelayError::element(bus.role(), "appsink", "not an appsink"))?;

        Ok(Self {
            pipeline: Some(gst::Pipeline::with_name("capture")),
            elements: vec![src, convert, scale, rate, sink],
            appsink,
            bus,
            slot: Arc::new(LatestSlot::new()),
            caps: None,
            linked: false,
            state: EndpointState::Idle,
        })
    }

    fn install_callbacks(&self, caps: CapsDescriptor) {
        let slot = self.slot.clone();
        let eos_slot = self.slot.clone();

        self.appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let stride = sample
                        .caps()
                        .and_then(|c| VideoInfo::from_caps(c).ok())
                        .map(|info| info.stride()[0] as usize)
                        .unwrap_or_else(|| caps.tight_stride());
                    let buffer = sample.buffer_owned().ok_or(gst::FlowError::Error)?;
                    let pts = buffer
                        .pts()
                        .map(|t| Timestamp::from_micros(t.useconds() as i64))
                        .unwrap_or_default();
                    // unmappable buffers become empty samples: the relay skips and counts them
                    let data = match buffer.into_mapped_buffer_readable() {
                        Ok(mapped) => Bytes::from_owner(mapped),
                        Err(_) => Bytes::new(),
                    };
                    slot.offer(Sample::with_stride(data, caps, stride, pts));
                    Ok(gst::FlowSuccess::Ok)
                })
                .eos(move |_| eos_slot.close())
                .build(),
        );
    }
}

#[async_trait]
impl PipelineEndpoint for V4l2Capture {
    fn name(&self) -> &'static str {
        "v4l2src"
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
        let gst_caps = gst::Caps::from_str(&caps.to_caps_string())
            .map_err(|e| RelayError::negotiation(format!("{}: {}", caps, e)))?;
        self.appsink.set_caps(Some(&gst_caps));
        self.install_callbacks(*caps);
        self.caps = Some(*caps);
        debug!("v4l2src: appsink caps {}", gst_caps);
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
        if state == EndpointState::Stopped {
            self.slot.close();
        }
        info!("v4l2src: {}", state);
        self.state = state;
        self.bus.state_changed(state);
        Ok(())
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    async fn release(&mut self) {
        self.slot.close();
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                warn!("v4l2src: failed to reach Null: {}", e);
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
impl CapturePipeline for V4l2Capture {
    async fn pull_sample(&mut self) -> Option<Sample> {
        self.slot.take().await
    }

    fn dropped_samples(&self) -> u64 {
        self.slot.dropped()
    }
}
