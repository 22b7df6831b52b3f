//! Scriptable pipelines for relay and lifecycle tests

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::bus::{BusSender, PipelineRole};
use super::caps::{CapsDescriptor, CapsFilter};
use super::error::RelayError;
use super::stage::{EndpointState, PipelineEndpoint};
use super::types::{Sample, Timestamp};
use crate::assets::{MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH};
use crate::capture::{CaptureFactory, CapturePipeline};
use crate::transmit::{TransmitFactory, TransmitPipeline};
use crate::utils::lock;

/// Where a mock fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Construct,
    Link,
    Start,
    /// Refuse every push after this many succeeded
    Push { after: usize },
}

/// What a mock capture does once its samples are used up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ending {
    /// `pull_sample` returns `None`
    Close,
    /// `pull_sample` never returns
    Hang,
    /// EOS is posted on the bus with the last sample, then `None`
    Eos,
    /// An error is posted on the bus, then `pull_sample` never returns
    Error(String),
}

/// Observations shared by the mocks of one test
#[derive(Debug, Default)]
pub struct Recorder {
    pulled: AtomicUsize,
    released: AtomicUsize,
    end_of_stream: AtomicBool,
    pushed: Mutex<Vec<Sample>>,
    states: Mutex<Vec<(PipelineRole, EndpointState)>>,
}

impl Recorder {
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::SeqCst)
    }

    pub fn pushed(&self) -> Vec<Sample> {
        lock(&self.pushed).clone()
    }

    pub fn pushed_count(&self) -> usize {
        lock(&self.pushed).len()
    }

    /// Successful state changes, in order
    pub fn states(&self) -> Vec<(PipelineRole, EndpointState)> {
        lock(&self.states).clone()
    }

    fn record_state(&self, role: PipelineRole, state: EndpointState) {
        lock(&self.states).push((role, state));
    }
}

/// `n` uniform samples of `caps` with every byte set to `level`
pub fn uniform_samples(caps: &CapsDescriptor, n: usize, level: u8) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            Sample::new(
                Bytes::from(vec![level; caps.frame_size()]),
                *caps,
                caps.framerate.frame_pts(i as u64),
            )
        })
        .collect()
}

/// A sample whose buffer is too short for `caps`
pub fn truncated_sample(caps: &CapsDescriptor) -> Sample {
    Sample::new(Bytes::from(vec![0u8; 10]), *caps, Timestamp::default())
}

fn start_checks(
    fault: Option<Fault>,
    role: PipelineRole,
    state: EndpointState,
) -> Result<(), RelayError> {
    if fault == Some(Fault::Start) && state != EndpointState::Stopped {
        return Err(RelayError::start(role, state, "mock refused to start"));
    }
    Ok(())
}

pub struct MockCapture {
    bus: Option<BusSender>,
    script: VecDeque<Sample>,
    ending: Ending,
    ending_posted: bool,
    fault: Option<Fault>,
    filter: CapsFilter,
    cancel_on_pull: Option<(usize, CancellationToken)>,
    state: EndpointState,
    recorder: Arc<Recorder>,
}

impl MockCapture {
    pub fn new(samples: Vec<Sample>, recorder: Arc<Recorder>) -> Self {
        Self {
            bus: None,
            script: samples.into(),
            ending: Ending::Close,
            ending_posted: false,
            fault: None,
            filter: CapsFilter::any(MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT),
            cancel_on_pull: None,
            state: EndpointState::Idle,
            recorder,
        }
    }

    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn filter(mut self, filter: CapsFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Cancel `token` while handing out the `n`-th sample (1-based)
    pub fn cancel_on_pull(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_on_pull = Some((n, token));
        self
    }

    pub fn into_factory(self) -> CaptureFactory {
        Box::new(move |bus| {
            if self.fault == Some(Fault::Construct) {
                return Err(RelayError::element(bus.role(), "mocksrc", "mock construct failure"));
            }
            let mut capture = self;
            capture.bus = Some(bus);
            Ok(Box::new(capture) as Box<dyn CapturePipeline>)
        })
    }

    fn post_ending(&mut self) {
        if self.ending_posted {
            return;
        }
        self.ending_posted = true;
        if let Some(bus) = &self.bus {
            match &self.ending {
                Ending::Eos => bus.eos(),
                Ending::Error(message) => bus.error(message.clone()),
                Ending::Close | Ending::Hang => {}
            }
        }
    }
}

#[async_trait]
impl PipelineEndpoint for MockCapture {
    fn name(&self) -> &'static str {
        "mocksrc"
    }

    fn caps_filter(&self) -> CapsFilter {
        self.filter.clone()
    }

    fn link(&mut self) -> Result<(), RelayError> {
        if self.fault == Some(Fault::Link) {
            return Err(RelayError::link(PipelineRole::Capture, "mock link failure"));
        }
        Ok(())
    }

    fn configure(&mut self, _caps: &CapsDescriptor) -> Result<(), RelayError> {
        Ok(())
    }

    async fn set_state(&mut self, state: EndpointState) -> Result<(), RelayError> {
        start_checks(self.fault, PipelineRole::Capture, state)?;
        self.state = state;
        self.recorder.record_state(PipelineRole::Capture, state);
        Ok(())
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    async fn release(&mut self) {
        self.recorder.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CapturePipeline for MockCapture {
    async fn pull_sample(&mut self) -> Option<Sample> {
        if let Some(sample) = self.script.pop_front() {
            let n = self.recorder.pulled.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, token)) = &self.cancel_on_pull
                && *at == n
            {
                token.cancel();
            }
            if self.script.is_empty() && self.ending == Ending::Eos {
                self.post_ending();
            }
            return Some(sample);
        }

        match self.ending.clone() {
            Ending::Close => None,
            Ending::Eos => {
                self.post_ending();
                None
            }
            Ending::Hang => std::future::pending().await,
            Ending::Error(_) => {
                self.post_ending();
                std::future::pending().await
            }
        }
    }

    fn dropped_samples(&self) -> u64 {
        0
    }
}

pub struct MockTransmit {
    bus: Option<BusSender>,
    fault: Option<Fault>,
    ending_after: Option<(usize, Ending)>,
    filter: CapsFilter,
    state: EndpointState,
    recorder: Arc<Recorder>,
}

impl MockTransmit {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            bus: None,
            fault: None,
            ending_after: None,
            filter: CapsFilter::any(MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT),
            state: EndpointState::Idle,
            recorder,
        }
    }

    pub fn fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn filter(mut self, filter: CapsFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Post `ending` on the bus once `n` samples were pushed.
    ///
    /// Only [`Ending::Eos`] and [`Ending::Error`] post anything.
    pub fn ending_after(mut self, n: usize, ending: Ending) -> Self {
        self.ending_after = Some((n, ending));
        self
    }

    pub fn into_factory(self) -> TransmitFactory {
        Box::new(move |bus| {
            if self.fault == Some(Fault::Construct) {
                return Err(RelayError::element(bus.role(), "mocksink", "mock construct failure"));
            }
            let mut transmit = self;
            transmit.bus = Some(bus);
            Ok(Box::new(transmit) as Box<dyn TransmitPipeline>)
        })
    }
}

#[async_trait]
impl PipelineEndpoint for MockTransmit {
    fn name(&self) -> &'static str {
        "mocksink"
    }

    fn caps_filter(&self) -> CapsFilter {
        self.filter.clone()
    }

    fn link(&mut self) -> Result<(), RelayError> {
        if self.fault == Some(Fault::Link) {
            return Err(RelayError::link(PipelineRole::Transmit, "mock link failure"));
        }
        Ok(())
    }

    fn configure(&mut self, _caps: &CapsDescriptor) -> Result<(), RelayError> {
        Ok(())
    }

    async fn set_state(&mut self, state: EndpointState) -> Result<(), RelayError> {
        start_checks(self.fault, PipelineRole::Transmit, state)?;
        self.state = state;
        self.recorder.record_state(PipelineRole::Transmit, state);
        Ok(())
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    async fn release(&mut self) {
        self.recorder.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransmitPipeline for MockTransmit {
    async fn push_sample(&mut self, sample: Sample) -> Result<(), RelayError> {
        let mut pushed = lock(&self.recorder.pushed);
        if let Some(Fault::Push { after }) = self.fault
            && pushed.len() >= after
        {
            return Err(RelayError::push("mock sink refused sample"));
        }
        pushed.push(sample);
        if let (Some((n, ending)), Some(bus)) = (&self.ending_after, &self.bus)
            && pushed.len() == *n
        {
            match ending {
                Ending::Eos => bus.eos(),
                Ending::Error(message) => bus.error(message.clone()),
                Ending::Close | Ending::Hang => {}
            }
        }
        Ok(())
    }

    async fn end_of_stream(&mut self) {
        self.recorder.end_of_stream.store(true, Ordering::SeqCst);
        if let Some(bus) = &self.bus {
            bus.eos();
        }
    }
}
