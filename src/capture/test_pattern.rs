//! Synthetic capture source
//!
//! Generates frames on a timer in the negotiated format. Rows are padded to
//! a 4-byte boundary, as raw video from real devices usually is, so the
//! frame bridge always sees a strided buffer for odd row sizes.

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::CapturePipeline;
use crate::assets::{MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH};
use crate::config::{CaptureConfig, Pattern};
use crate::pipeline::bus::BusSender;
use crate::pipeline::caps::{CapsDescriptor, CapsFilter};
use crate::pipeline::error::RelayError;
use crate::pipeline::slot::LatestSlot;
use crate::pipeline::stage::{EndpointState, PipelineEndpoint};
use crate::pipeline::types::{Frame, Sample};

/// 75% colour bars, left to right, as blue/green/red
const BARS: [[u8; 3]; 8] = [
    [191, 191, 191],
    [0, 191, 191],
    [191, 191, 0],
    [0, 191, 0],
    [191, 0, 191],
    [0, 0, 191],
    [191, 0, 0],
    [0, 0, 0],
];

const CHECKER_SIZE: u32 = 32;

/// Row stride for `caps` rounded up to 4 bytes
pub fn aligned_stride(caps: &CapsDescriptor) -> usize {
    (caps.tight_stride() + 3) & !3
}

/// Render frame number `index` of `pattern`
pub fn render(pattern: Pattern, gray: u8, caps: &CapsDescriptor, index: u64) -> Result<Frame, RelayError> {
    let stride = aligned_stride(caps);
    let mut frame = Frame::new(
        caps.width,
        caps.height,
        caps.format,
        stride,
        vec![0u8; stride * caps.height as usize],
    )?;
    let (w, h) = (caps.width as u64, caps.height as u64);

    for y in 0..h {
        for x in 0..w {
            let bgr = match pattern {
                Pattern::Solid => [gray; 3],
                Pattern::Bars => BARS[(x * BARS.len() as u64 / w) as usize],
                Pattern::Gradient => {
                    let v = ((x + index * 4) % w) * 255 / (w - 1).max(1);
                    [v as u8; 3]
                }
                Pattern::Checker => {
                    let cell = (x + index) / CHECKER_SIZE as u64 + y / CHECKER_SIZE as u64;
                    if cell % 2 == 0 { [255; 3] } else { [0; 3] }
                }
            };
            frame.put_bgr(x as i64, y as i64, bgr);
        }
    }
    Ok(frame)
}

/// Capture pipeline producing a synthetic pattern
pub struct TestPatternCapture {
    pattern: Pattern,
    gray: u8,
    num_buffers: Option<u64>,
    bus: BusSender,
    slot: Arc<LatestSlot<Sample>>,
    caps: Option<CapsDescriptor>,
    linked: bool,
    state: EndpointState,
    stop: CancellationToken,
    producer: Option<JoinHandle<()>>,
}

impl TestPatternCapture {
    pub fn new(config: &CaptureConfig, bus: BusSender) -> Self {
        Self {
            pattern: config.pattern,
            gray: config.gray,
            num_buffers: config.num_buffers,
            bus,
            slot: Arc::new(LatestSlot::new()),
            caps: None,
            linked: false,
            state: EndpointState::Idle,
            stop: CancellationToken::new(),
            producer: None,
        }
    }

    fn spawn_producer(&mut self, caps: CapsDescriptor) {
        let pattern = self.pattern;
        let gray = self.gray;
        let num_buffers = self.num_buffers;
        let slot = self.slot.clone();
        let bus = self.bus.clone();
        let stop = self.stop.clone();

        self.producer = Some(tokio::spawn(async move {
            let period = caps.framerate.frame_duration();
            let mut ticker = (!period.is_zero()).then(|| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                interval
            });

            let mut index = 0u64;
            loop {
                if let Some(limit) = num_buffers
                    && index >= limit
                {
                    break;
                }
                match ticker.as_mut() {
                    Some(ticker) => tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = ticker.tick() => {}
                    },
                    None => {
                        if stop.is_cancelled() {
                            return;
                        }
                        tokio::task::yield_now().await;
                    }
                }

                let frame = match render(pattern, gray, &caps, index) {
                    Ok(frame) => frame,
                    Err(e) => {
                        bus.error(format!("test pattern: {}", e));
                        return;
                    }
                };
                let stride = frame.stride();
                let pts = caps.framerate.frame_pts(index);
                let sample = Sample::with_stride(Bytes::from(frame.into_data()), caps, stride, pts);
                if slot.offer(sample) {
                    debug!("Test pattern: dropped unconsumed sample before #{}", index);
                }
                index += 1;
            }

            info!("Test pattern: {} buffers produced, end of stream", index);
            slot.close();
            bus.eos();
        }));
    }

    async fn stop_producer(&mut self) {
        self.stop.cancel();
        self.slot.close();
        if let Some(producer) = self.producer.take()
            && let Err(e) = producer.await
        {
            error!("Test pattern producer failed: {}", e);
        }
    }
}

#[async_trait]
impl PipelineEndpoint for TestPatternCapture {
    fn name(&self) -> &'static str {
        "testpattern"
    }

    fn caps_filter(&self) -> CapsFilter {
        CapsFilter::any(MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT)
    }

    fn link(&mut self) -> Result<(), RelayError> {
        self.linked = true;
        Ok(())
    }

    fn configure(&mut self, caps: &CapsDescriptor) -> Result<(), RelayError> {
        self.caps_filter().check(caps).map_err(RelayError::negotiation)?;
        self.caps = Some(*caps);
        Ok(())
    }

    async fn set_state(&mut self, state: EndpointState) -> Result<(), RelayError> {
        let role = self.bus.role();
        if !self.state.can_transition_to(&state) {
            return Err(RelayError::start(
                role,
                state,
                format!("not reachable from {}", self.state),
            ));
        }
        match state {
            EndpointState::Ready | EndpointState::Active if !self.linked => {
                return Err(RelayError::start(role, state, "pipeline not linked"));
            }
            EndpointState::Active => {
                let caps = self
                    .caps
                    .ok_or_else(|| RelayError::start(role, state, "caps not configured"))?;
                if self.producer.is_none() {
                    self.spawn_producer(caps);
                }
            }
            EndpointState::Stopped => self.stop_producer().await,
            EndpointState::Idle | EndpointState::Ready => {}
        }
        self.state = state;
        self.bus.state_changed(state);
        Ok(())
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    async fn release(&mut self) {
        self.stop_producer().await;
        self.slot.try_take();
        self.caps = None;
        self.linked = false;
    }
}

#[async_trait]
impl CapturePipeline for TestPatternCapture {
    async fn pull_sample(&mut self) -> Option<Sample> {
        self.slot.take().await
    }

    fn dropped_samples(&self) -> u64 {
        self.slot.dropped()
    }
}
