//! Pipeline lifecycle coordinator
//!
//! Brings the two pipelines up in a fixed order and tears them down again:
//!
//! 1. construct capture, then transmit
//! 2. link each pipeline internally
//! 3. negotiate caps and configure both sides
//! 4. start transmit, then capture, so the sink is ready before the first
//!    sample exists
//!
//! Tear-down stops both, releases them and drops the negotiated caps. It
//! is idempotent and runs on every exit path, including a bring-up that
//! failed half way.

use log::{debug, info, warn};

use super::bus::{Bus, PipelineRole};
use super::caps::{CapsDescriptor, Negotiated, negotiate};
use super::error::RelayError;
use super::session::RelaySession;
use super::stage::EndpointState;
use crate::capture::{CaptureFactory, CapturePipeline};
use crate::transmit::{TransmitFactory, TransmitPipeline};

#[derive(Default)]
pub struct PipelineLifecycle {
    capture: Option<Box<dyn CapturePipeline>>,
    transmit: Option<Box<dyn TransmitPipeline>>,
}

impl PipelineLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build both pipelines; nothing is linked yet
    pub fn construct(
        &mut self,
        bus: &Bus,
        capture: CaptureFactory,
        transmit: Option<TransmitFactory>,
    ) -> Result<(), RelayError> {
        let capture = capture(bus.sender(PipelineRole::Capture))?;
        debug!("Constructed capture pipeline '{}'", capture.name());
        self.capture = Some(capture);

        if let Some(factory) = transmit {
            let transmit = factory(bus.sender(PipelineRole::Transmit))?;
            debug!("Constructed transmit pipeline '{}'", transmit.name());
            self.transmit = Some(transmit);
        }
        Ok(())
    }

    pub fn link(&mut self) -> Result<(), RelayError> {
        if let Some(capture) = self.capture.as_mut() {
            capture.link()?;
        }
        if let Some(transmit) = self.transmit.as_mut() {
            transmit.link()?;
        }
        Ok(())
    }

    /// Agree on caps with both sides and apply them.
    ///
    /// `output` is what the transform produces for `requested` frames.
    pub fn configure(
        &mut self,
        requested: &CapsDescriptor,
        output: &CapsDescriptor,
    ) -> Result<Negotiated, RelayError> {
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| RelayError::negotiation("capture pipeline not constructed"))?;
        let transmit_filter = self.transmit.as_ref().map(|t| t.caps_filter());
        let negotiated = negotiate(
            requested,
            &capture.caps_filter(),
            transmit_filter.as_ref(),
            output,
        )?;

        capture.configure(&negotiated.capture)?;
        if let (Some(transmit), Some(caps)) = (self.transmit.as_mut(), negotiated.transmit.as_ref()) {
            transmit.configure(caps)?;
        }
        Ok(negotiated)
    }

    /// Command both pipelines to `state`, transmit first
    pub async fn start(&mut self, state: EndpointState) -> Result<(), RelayError> {
        if let Some(transmit) = self.transmit.as_mut() {
            transmit.set_state(state).await?;
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.set_state(state).await?;
        }
        Ok(())
    }

    /// Full bring-up to `state`; the session keeps the negotiated caps.
    ///
    /// On error the pipelines built so far stay owned by `self` and still
    /// need [`PipelineLifecycle::tear_down`].
    pub async fn bring_up(
        &mut self,
        session: &RelaySession,
        bus: &Bus,
        capture: CaptureFactory,
        transmit: Option<TransmitFactory>,
        requested: &CapsDescriptor,
        output: &CapsDescriptor,
        state: EndpointState,
    ) -> Result<Negotiated, RelayError> {
        self.construct(bus, capture, transmit)?;
        self.link()?;
        let negotiated = self.configure(requested, output)?;
        session.set_caps(negotiated);
        match negotiated.transmit {
            Some(out) => info!("Negotiated {} -> {}", negotiated.capture, out),
            None => info!("Negotiated {} (no transmit)", negotiated.capture),
        }
        self.start(state).await?;
        Ok(negotiated)
    }

    pub fn transmit_mut(&mut self) -> Option<&mut (dyn TransmitPipeline + 'static)> {
        self.transmit.as_deref_mut()
    }

    /// Both pipelines at once, for the relay loop
    pub fn endpoints(
        &mut self,
    ) -> (
        Option<&mut (dyn CapturePipeline + 'static)>,
        Option<&mut (dyn TransmitPipeline + 'static)>,
    ) {
        (self.capture.as_deref_mut(), self.transmit.as_deref_mut())
    }

    /// Stop and release whatever was constructed
    pub async fn tear_down(&mut self, session: &RelaySession) {
        if let Some(capture) = self.capture.as_mut()
            && let Err(e) = capture.set_state(EndpointState::Stopped).await
        {
            warn!("Capture pipeline did not stop cleanly: {}", e);
        }
        if let Some(transmit) = self.transmit.as_mut()
            && let Err(e) = transmit.set_state(EndpointState::Stopped).await
        {
            warn!("Transmit pipeline did not stop cleanly: {}", e);
        }

        if let Some(mut capture) = self.capture.take() {
            capture.release().await;
            debug!("Released capture pipeline '{}'", capture.name());
        }
        if let Some(mut transmit) = self.transmit.take() {
            transmit.release().await;
            debug!("Released transmit pipeline '{}'", transmit.name());
        }
        session.clear_caps();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::BUS_CAPACITY;
    use crate::pipeline::caps::{CapsFilter, FrameRate, PixelFormat};
    use crate::pipeline::error::ErrorKind;
    use crate::pipeline::testing::{Fault, MockCapture, MockTransmit, Recorder};
    use std::sync::Arc;

    fn vga() -> CapsDescriptor {
        CapsDescriptor::new(PixelFormat::Bgr8, 640, 480, FrameRate::new(30, 1)).unwrap()
    }

    async fn bring_up(
        capture: MockCapture,
        transmit: Option<MockTransmit>,
    ) -> (PipelineLifecycle, RelaySession, Result<Negotiated, RelayError>) {
        let (bus, _events) = Bus::new(BUS_CAPACITY);
        let session = RelaySession::new();
        let mut lifecycle = PipelineLifecycle::new();
        let result = lifecycle
            .bring_up(
                &session,
                &bus,
                capture.into_factory(),
                transmit.map(MockTransmit::into_factory),
                &vga(),
                &vga(),
                EndpointState::Active,
            )
            .await;
        (lifecycle, session, result)
    }

    #[tokio::test]
    async fn test_transmit_started_before_capture() {
        let recorder = Arc::new(Recorder::default());
        let (mut lifecycle, session, result) = bring_up(
            MockCapture::new(Vec::new(), recorder.clone()),
            Some(MockTransmit::new(recorder.clone())),
        )
        .await;
        let negotiated = result.unwrap();
        assert_eq!(negotiated.transmit, Some(vga()));
        assert_eq!(session.caps(), Some(negotiated));

        assert_eq!(
            recorder.states(),
            vec![
                (PipelineRole::Transmit, EndpointState::Active),
                (PipelineRole::Capture, EndpointState::Active),
            ]
        );

        lifecycle.tear_down(&session).await;
        let (capture, transmit) = lifecycle.endpoints();
        assert!(capture.is_none() && transmit.is_none());
        assert_eq!(recorder.released(), 2);
        assert_eq!(session.caps(), None);
    }

    #[tokio::test]
    async fn test_transmit_construct_failure_keeps_capture_for_teardown() {
        let recorder = Arc::new(Recorder::default());
        let (mut lifecycle, session, result) = bring_up(
            MockCapture::new(Vec::new(), recorder.clone()),
            Some(MockTransmit::new(recorder.clone()).fault(Fault::Construct)),
        )
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ElementCreation);
        assert!(lifecycle.endpoints().0.is_some());
        assert!(recorder.states().is_empty());

        lifecycle.tear_down(&session).await;
        assert_eq!(recorder.released(), 1);
        assert_eq!(recorder.pulled(), 0);
    }

    #[tokio::test]
    async fn test_link_failure() {
        let recorder = Arc::new(Recorder::default());
        let (_, _, result) = bring_up(
            MockCapture::new(Vec::new(), recorder.clone()).fault(Fault::Link),
            Some(MockTransmit::new(recorder.clone())),
        )
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Link);
    }

    #[tokio::test]
    async fn test_rejected_caps_never_configure() {
        let recorder = Arc::new(Recorder::default());
        let (_, session, result) = bring_up(
            MockCapture::new(Vec::new(), recorder.clone()),
            Some(
                MockTransmit::new(recorder.clone())
                    .filter(CapsFilter::any(320, 240)),
            ),
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Negotiation);
        assert!(err.to_string().contains("transmit rejected"));
        assert_eq!(session.caps(), None);
        assert!(recorder.states().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure() {
        let recorder = Arc::new(Recorder::default());
        let (mut lifecycle, session, result) = bring_up(
            MockCapture::new(Vec::new(), recorder.clone()).fault(Fault::Start),
            Some(MockTransmit::new(recorder.clone())),
        )
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::PipelineStart);

        lifecycle.tear_down(&session).await;
        lifecycle.tear_down(&session).await;
        assert_eq!(recorder.released(), 2);
        assert_eq!(
            recorder.states().last(),
            Some(&(PipelineRole::Transmit, EndpointState::Stopped))
        );
    }

    #[tokio::test]
    async fn test_ready_without_transmit() {
        let recorder = Arc::new(Recorder::default());
        let (bus, _events) = Bus::new(BUS_CAPACITY);
        let session = RelaySession::new();
        let mut lifecycle = PipelineLifecycle::new();
        let negotiated = lifecycle
            .bring_up(
                &session,
                &bus,
                MockCapture::new(Vec::new(), recorder.clone()).into_factory(),
                None,
                &vga(),
                &vga(),
                EndpointState::Ready,
            )
            .await
            .unwrap();
        assert_eq!(negotiated.transmit, None);
        assert_eq!(recorder.states(), vec![(PipelineRole::Capture, EndpointState::Ready)]);
        assert!(lifecycle.transmit_mut().is_none());
        assert_eq!(lifecycle.endpoints().0.map(|c| c.state()), Some(EndpointState::Ready));
        lifecycle.tear_down(&session).await;
    }
}
