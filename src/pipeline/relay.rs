//! Relay loop
//!
//! Pull-driven: the loop waits for the next capture sample, decodes it,
//! runs the transform, encodes the result and pushes it to the transmit
//! side, then goes back to waiting. While waiting it also watches the
//! cancellation token, the bus and the stats timer, in that priority.
//!
//! A session drains when
//! - the capture side stops producing (`pull_sample` returns `None`),
//! - the transmit side reports end of stream,
//! - a pipeline posts an error,
//! - a push fails, or
//! - a stop is requested.
//!
//! An EOS posted by the capture side alone does not end the loop: samples
//! still queued in the handoff are relayed until `pull_sample` returns
//! `None`.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::Interval;

use super::bridge::FrameBridge;
use super::bus::{Bus, BusMessage, PipelineRole};
use super::caps::{CapsDescriptor, Negotiated};
use super::clock::MediaClock;
use super::error::RelayError;
use super::health::HealthSummary;
use super::lifecycle::PipelineLifecycle;
use super::session::RelaySession;
use super::stage::EndpointState;
use super::state::{DrainReason, RelayState};
use super::types::Sample;
use crate::assets::BUS_CAPACITY;
use crate::capture::{CaptureFactory, CapturePipeline};
use crate::transform::Transform;
use crate::transmit::{TransmitFactory, TransmitPipeline};

/// Outcome of a session that ended without error
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub reason: DrainReason,
    pub health: HealthSummary,
    pub duration: Duration,
}

impl RelayReport {
    pub fn exit_code(&self) -> i32 {
        match self.reason {
            DrainReason::Error(kind) => kind.exit_code(),
            DrainReason::EndOfStream | DrainReason::Cancelled => 0,
        }
    }
}

/// One relay session, ready to run.
///
/// Built by [`super::builder::RelayBuilder`]; consumed by [`Relay::run`] or
/// [`Relay::check`].
pub struct Relay {
    session: Arc<RelaySession>,
    requested: CapsDescriptor,
    capture: CaptureFactory,
    transmit: Option<TransmitFactory>,
    transform: Arc<dyn Transform>,
    stats_interval: Option<Duration>,
}

impl Relay {
    pub(crate) fn new(
        session: Arc<RelaySession>,
        requested: CapsDescriptor,
        capture: CaptureFactory,
        transmit: Option<TransmitFactory>,
        transform: Arc<dyn Transform>,
        stats_interval: Option<Duration>,
    ) -> Self {
        Self {
            session,
            requested,
            capture,
            transmit,
            transform,
            stats_interval,
        }
    }

    pub fn session(&self) -> Arc<RelaySession> {
        self.session.clone()
    }

    /// Bring both pipelines up, relay until the session drains, tear down.
    ///
    /// Returns the first fatal error; tear-down has always completed by
    /// the time this returns.
    pub async fn run(self) -> Result<RelayReport, RelayError> {
        let Relay {
            session,
            requested,
            capture,
            transmit,
            transform,
            stats_interval,
        } = self;

        let (bus, mut events) = Bus::new(BUS_CAPACITY);
        let mut lifecycle = PipelineLifecycle::new();
        session.transition(RelayState::Starting);

        let output = transform.output_caps(&requested);
        info!("Starting relay with transform '{}'", transform.name());
        let negotiated = match lifecycle
            .bring_up(
                &session,
                &bus,
                capture,
                transmit,
                &requested,
                &output,
                EndpointState::Active,
            )
            .await
        {
            Ok(negotiated) => negotiated,
            Err(e) => {
                error!("Bring-up failed ({}): {}", e.kind(), e);
                session.record_error(e.kind());
                lifecycle.tear_down(&session).await;
                session.transition(RelayState::Stopped);
                return Err(e);
            }
        };

        let started = Instant::now();
        session.transition(RelayState::Running {
            started_at: started,
        });

        let stats = stats_interval
            .filter(|period| !period.is_zero())
            .map(|period| tokio::time::interval_at(tokio::time::Instant::now() + period, period));
        let pump = Pump::new(&session, transform.as_ref(), negotiated);
        let outcome = match lifecycle.endpoints() {
            (Some(capture), transmit) => pump.run(capture, transmit, &mut events, stats).await,
            (None, _) => Ok(DrainReason::EndOfStream),
        };

        let reason = match &outcome {
            Ok(reason) => *reason,
            Err(e) => {
                error!("Relay failed ({}): {}", e.kind(), e);
                session.record_error(e.kind());
                DrainReason::Error(e.kind())
            }
        };
        session.transition(RelayState::Draining { reason });
        if reason.is_graceful() {
            info!("Draining: {}", reason);
        } else {
            warn!("Draining: {}", reason);
        }

        if let Some(transmit) = lifecycle.transmit_mut() {
            transmit.end_of_stream().await;
        }
        lifecycle.tear_down(&session).await;
        session.transition(RelayState::Stopped);
        drop(bus);

        let health = session.health().summary();
        let duration = started.elapsed();
        info!("Relay stopped after {:.1}s. {}", duration.as_secs_f64(), health);

        outcome.map(|reason| RelayReport {
            reason,
            health,
            duration,
        })
    }

    /// Construct, link and configure both pipelines, bring them to Ready,
    /// then tear down without relaying anything
    pub async fn check(self) -> Result<Negotiated, RelayError> {
        let Relay {
            session,
            requested,
            capture,
            transmit,
            transform,
            ..
        } = self;

        let (bus, _events) = Bus::new(BUS_CAPACITY);
        let mut lifecycle = PipelineLifecycle::new();
        session.transition(RelayState::Starting);

        let output = transform.output_caps(&requested);
        let result = lifecycle
            .bring_up(
                &session,
                &bus,
                capture,
                transmit,
                &requested,
                &output,
                EndpointState::Ready,
            )
            .await;
        if let Err(e) = &result {
            error!("Check failed ({}): {}", e.kind(), e);
            session.record_error(e.kind());
        }
        lifecycle.tear_down(&session).await;
        session.transition(RelayState::Stopped);
        result
    }
}

enum Step {
    Cancelled,
    Event(Option<BusMessage>),
    Stats,
    Sample(Option<Sample>),
}

async fn tick(stats: &mut Option<Interval>) {
    match stats {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Steady-state part of a session
struct Pump<'a> {
    session: &'a RelaySession,
    transform: &'a dyn Transform,
    negotiated: Negotiated,
    bridge: FrameBridge,
    clock: MediaClock,
}

impl<'a> Pump<'a> {
    fn new(session: &'a RelaySession, transform: &'a dyn Transform, negotiated: Negotiated) -> Self {
        Self {
            session,
            transform,
            negotiated,
            bridge: FrameBridge::new(),
            clock: MediaClock::new(),
        }
    }

    async fn run(
        &self,
        capture: &mut (dyn CapturePipeline + 'static),
        mut transmit: Option<&mut (dyn TransmitPipeline + 'static)>,
        events: &mut mpsc::Receiver<BusMessage>,
        mut stats: Option<Interval>,
    ) -> Result<DrainReason, RelayError> {
        let cancel = self.session.cancel_token();
        let health = self.session.health().clone();
        let mut bus_open = true;
        let mut capture_finished = false;

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                msg = events.recv(), if bus_open => Step::Event(msg),
                _ = tick(&mut stats) => Step::Stats,
                sample = capture.pull_sample() => Step::Sample(sample),
            };

            match step {
                Step::Cancelled => return Ok(DrainReason::Cancelled),
                Step::Event(None) => {
                    debug!("Bus closed");
                    bus_open = false;
                }
                Step::Event(Some(msg)) => {
                    if let Some(reason) = self.handle_event(msg, &mut capture_finished)? {
                        return Ok(reason);
                    }
                }
                Step::Stats => {
                    health.set_capture_drops(capture.dropped_samples());
                    info!("{}", health.summary());
                    if let Some(interval) = &stats
                        && health.is_stalled(interval.period())
                    {
                        warn!("No frame relayed in the last {:?}", interval.period());
                    }
                }
                Step::Sample(None) => {
                    health.set_capture_drops(capture.dropped_samples());
                    info!("Capture stopped producing");
                    return Ok(DrainReason::EndOfStream);
                }
                Step::Sample(Some(sample)) => {
                    health.set_capture_drops(capture.dropped_samples());
                    if let Some(reason) = self.relay_sample(sample, transmit.as_deref_mut()).await? {
                        return Ok(reason);
                    }
                }
            }
        }
    }

    fn handle_event(
        &self,
        msg: BusMessage,
        capture_finished: &mut bool,
    ) -> Result<Option<DrainReason>, RelayError> {
        match msg {
            BusMessage::Error { role, message } => Err(RelayError::AsyncBus { role, message }),
            BusMessage::Warning { role, message } => {
                warn!("{} pipeline: {}", role, message);
                Ok(None)
            }
            BusMessage::Eos {
                role: PipelineRole::Capture,
            } => {
                if !*capture_finished {
                    info!("Capture reached end of stream, relaying pending samples");
                }
                *capture_finished = true;
                Ok(None)
            }
            BusMessage::Eos {
                role: PipelineRole::Transmit,
            } => {
                info!("Transmit reached end of stream");
                Ok(Some(DrainReason::EndOfStream))
            }
            BusMessage::StateChanged { role, state } => {
                debug!("{} pipeline is {}", role, state);
                Ok(None)
            }
        }
    }

    /// Decode, transform, encode and push one sample
    async fn relay_sample(
        &self,
        sample: Sample,
        transmit: Option<&mut (dyn TransmitPipeline + 'static)>,
    ) -> Result<Option<DrainReason>, RelayError> {
        let health = self.session.health();
        health.record_pull();

        let frame = match self.bridge.decode(&sample, &self.negotiated.capture) {
            Ok(frame) => frame,
            Err(e) if e.kind().is_recoverable() => {
                self.skip(&e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        drop(sample);

        let output = self.transform.apply(&frame);
        drop(frame);

        let (Some(transmit), Some(target)) = (transmit, self.negotiated.transmit) else {
            health.record_frame(0);
            return Ok(None);
        };

        let out = match self.bridge.encode(&output, &target, &self.clock) {
            Ok(out) => out,
            Err(e) if e.kind().is_recoverable() => {
                self.skip(&e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if self.session.is_cancelled() || !self.session.is_running() {
            debug!("Session is {}, not pushing sample at {}", self.session.state(), out.pts());
            return Ok(Some(DrainReason::Cancelled));
        }

        let size = out.size();
        if let Err(e) = transmit.push_sample(out).await {
            health.record_push_failure();
            return Err(e);
        }
        health.record_frame(size);
        Ok(None)
    }

    fn skip(&self, err: &RelayError) {
        let health = self.session.health();
        health.record_skip();
        if health.frames_skipped() == 1 {
            warn!("Skipping frame: {}", err);
        } else {
            debug!("Skipping frame: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureConfig, Pattern, SquareMethod};
    use crate::pipeline::builder::RelayBuilder;
    use crate::pipeline::caps::{CapsFilter, FrameRate, PixelFormat};
    use crate::pipeline::error::ErrorKind;
    use crate::pipeline::testing::{
        Ending, Fault, MockCapture, MockTransmit, Recorder, truncated_sample, uniform_samples,
    };
    use crate::transform::{EdgeTransform, Passthrough, SquareTransform, edges};
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    fn caps(format: PixelFormat, width: u32, height: u32) -> CapsDescriptor {
        CapsDescriptor::new(format, width, height, FrameRate::new(30, 1)).unwrap()
    }

    fn small() -> CapsDescriptor {
        caps(PixelFormat::Bgr8, 16, 8)
    }

    fn builder(capture: MockCapture, transmit: MockTransmit) -> RelayBuilder {
        RelayBuilder::new(small(), capture.into_factory()).with_transmit_factory(transmit.into_factory())
    }

    #[tokio::test]
    async fn test_relays_every_sample_until_end_of_stream() {
        let recorder = Arc::new(Recorder::default());
        let capture = MockCapture::new(uniform_samples(&small(), 3, 40), recorder.clone()).ending(Ending::Eos);
        let relay = builder(capture, MockTransmit::new(recorder.clone())).build();
        let session = relay.session();

        let report = relay.run().await.unwrap();
        assert_eq!(report.reason, DrainReason::EndOfStream);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.health.frames_relayed, 3);

        let pushed = recorder.pushed();
        assert_eq!(pushed.len(), 3);
        assert!(pushed.windows(2).all(|w| w[0].pts() < w[1].pts()));
        assert!(pushed.iter().all(|s| s.caps() == &small()));
        assert!(recorder.end_of_stream());
        assert_eq!(recorder.released(), 2);
        assert_eq!(session.state(), RelayState::Stopped);
        assert_eq!(session.last_error(), None);
        assert_eq!(session.caps(), None);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_push() {
        let recorder = Arc::new(Recorder::default());
        let token = CancellationToken::new();
        let capture = MockCapture::new(uniform_samples(&small(), 5, 40), recorder.clone())
            .ending(Ending::Hang)
            .cancel_on_pull(3, token.clone());
        let report = builder(capture, MockTransmit::new(recorder.clone()))
            .with_cancel(token)
            .build()
            .run()
            .await
            .unwrap();

        assert_eq!(report.reason, DrainReason::Cancelled);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(recorder.pulled(), 3);
        assert_eq!(recorder.pushed_count(), 2);
        assert_eq!(recorder.released(), 2);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_capture() {
        let recorder = Arc::new(Recorder::default());
        let token = CancellationToken::new();
        let capture = MockCapture::new(Vec::new(), recorder.clone()).ending(Ending::Hang);
        let relay = builder(capture, MockTransmit::new(recorder.clone()))
            .with_cancel(token.clone())
            .build();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let report = relay.run().await.unwrap();
        stopper.await.unwrap();
        assert_eq!(report.reason, DrainReason::Cancelled);
        assert_eq!(recorder.pushed_count(), 0);
    }

    #[tokio::test]
    async fn test_push_failure_ends_session() {
        let recorder = Arc::new(Recorder::default());
        let capture = MockCapture::new(uniform_samples(&small(), 4, 40), recorder.clone()).ending(Ending::Hang);
        let transmit = MockTransmit::new(recorder.clone()).fault(Fault::Push { after: 1 });
        let relay = builder(capture, transmit).build();
        let session = relay.session();

        let err = relay.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Push);
        assert_eq!(err.kind().exit_code(), 7);
        assert_eq!(recorder.pushed_count(), 1);
        assert_eq!(recorder.pulled(), 2);
        assert_eq!(session.last_error(), Some(ErrorKind::Push));
        assert_eq!(session.health().push_failures(), 1);
        assert_eq!(recorder.released(), 2);
        assert_eq!(session.state(), RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_bus_error_ends_session() {
        let recorder = Arc::new(Recorder::default());
        let capture = MockCapture::new(uniform_samples(&small(), 2, 40), recorder.clone())
            .ending(Ending::Error("device unplugged".into()));
        let err = builder(capture, MockTransmit::new(recorder.clone()))
            .build()
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AsyncBus);
        assert_eq!(err.kind().exit_code(), 6);
        assert!(err.to_string().contains("device unplugged"));
        assert_eq!(recorder.pushed_count(), 2);
        assert_eq!(recorder.released(), 2);
    }

    #[tokio::test]
    async fn test_transmit_bus_error_ends_session() {
        let recorder = Arc::new(Recorder::default());
        let capture = MockCapture::new(uniform_samples(&small(), 5, 40), recorder.clone()).ending(Ending::Hang);
        let transmit = MockTransmit::new(recorder.clone()).ending_after(2, Ending::Error("encoder crashed".into()));
        let relay = builder(capture, transmit).build();
        let session = relay.session();

        let err = relay.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AsyncBus);
        assert_eq!(err.kind().exit_code(), 6);
        assert!(err.to_string().starts_with("transmit pipeline"));
        assert!(err.to_string().contains("encoder crashed"));
        assert_eq!(recorder.pushed_count(), 2);
        assert_eq!(recorder.released(), 2);
        assert_eq!(session.last_error(), Some(ErrorKind::AsyncBus));
        assert_eq!(session.state(), RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_transmit_end_of_stream_drains_at_once() {
        let recorder = Arc::new(Recorder::default());
        let capture = MockCapture::new(uniform_samples(&small(), 5, 40), recorder.clone()).ending(Ending::Hang);
        let transmit = MockTransmit::new(recorder.clone()).ending_after(2, Ending::Eos);
        let report = builder(capture, transmit).build().run().await.unwrap();

        assert_eq!(report.reason, DrainReason::EndOfStream);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(recorder.pulled(), 2);
        assert_eq!(recorder.pushed_count(), 2);
        assert_eq!(report.health.frames_relayed, 2);
        assert_eq!(recorder.released(), 2);
    }

    #[tokio::test]
    async fn test_no_push_unless_running() {
        let recorder = Arc::new(Recorder::default());
        let session = RelaySession::new();
        let negotiated = Negotiated {
            capture: small(),
            transmit: Some(small()),
        };
        let mut transmit: Box<dyn TransmitPipeline> = Box::new(MockTransmit::new(recorder.clone()));
        let pump = Pump::new(&session, &Passthrough, negotiated);
        let sample = uniform_samples(&small(), 1, 40).remove(0);

        let reason = pump
            .relay_sample(sample.clone(), Some(&mut *transmit))
            .await
            .unwrap();
        assert_eq!(reason, Some(DrainReason::Cancelled));
        assert_eq!(recorder.pushed_count(), 0);

        session.transition(RelayState::Starting);
        session.transition(RelayState::Running {
            started_at: Instant::now(),
        });
        let reason = pump.relay_sample(sample, Some(&mut *transmit)).await.unwrap();
        assert_eq!(reason, None);
        assert_eq!(recorder.pushed_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_buffer_is_counted_as_skipped() {
        let recorder = Arc::new(Recorder::default());
        let mut samples = uniform_samples(&small(), 2, 40);
        samples.insert(0, Sample::new(Bytes::new(), small(), Default::default()));
        let report = builder(
            MockCapture::new(samples, recorder.clone()),
            MockTransmit::new(recorder.clone()),
        )
        .build()
        .run()
        .await
        .unwrap();

        assert_eq!(report.health.frames_skipped, 1);
        assert_eq!(report.health.frames_relayed, 2);
        assert_eq!(recorder.pushed_count(), 2);
    }

    #[tokio::test]
    async fn test_unmappable_samples_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let mut samples = uniform_samples(&small(), 2, 40);
        samples.insert(1, truncated_sample(&small()));
        let relay = builder(
            MockCapture::new(samples, recorder.clone()),
            MockTransmit::new(recorder.clone()),
        )
        .build();
        let session = relay.session();

        let report = relay.run().await.unwrap();
        assert_eq!(report.reason, DrainReason::EndOfStream);
        assert_eq!(report.health.samples_pulled, 3);
        assert_eq!(report.health.frames_skipped, 1);
        assert_eq!(recorder.pushed_count(), 2);
        assert_eq!(session.last_error(), None);
    }

    #[tokio::test]
    async fn test_rejected_caps_relay_nothing() {
        let recorder = Arc::new(Recorder::default());
        let capture = MockCapture::new(uniform_samples(&small(), 2, 40), recorder.clone())
            .filter(CapsFilter::any(64, 64).with_formats(&[PixelFormat::Gray8]));
        let relay = builder(capture, MockTransmit::new(recorder.clone())).build();
        let session = relay.session();

        let err = relay.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Negotiation);
        assert_eq!(err.kind().exit_code(), 2);
        assert_eq!(recorder.pulled(), 0);
        assert_eq!(recorder.pushed_count(), 0);
        assert_eq!(recorder.released(), 2);
        assert_eq!(session.last_error(), Some(ErrorKind::Negotiation));
        assert_eq!(session.state(), RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_foreign_sample_caps_are_fatal() {
        let recorder = Arc::new(Recorder::default());
        let other = caps(PixelFormat::Bgr8, 8, 8);
        let relay = builder(
            MockCapture::new(uniform_samples(&other, 1, 40), recorder.clone()),
            MockTransmit::new(recorder.clone()),
        )
        .build();

        let err = relay.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Negotiation);
        assert_eq!(recorder.pushed_count(), 0);
    }

    #[tokio::test]
    async fn test_transmit_construct_failure_never_pulls() {
        let recorder = Arc::new(Recorder::default());
        let capture = MockCapture::new(uniform_samples(&small(), 2, 40), recorder.clone());
        let transmit = MockTransmit::new(recorder.clone()).fault(Fault::Construct);
        let err = builder(capture, transmit).build().run().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ElementCreation);
        assert_eq!(err.kind().exit_code(), 3);
        assert_eq!(recorder.pulled(), 0);
        assert_eq!(recorder.released(), 1);
    }

    #[tokio::test]
    async fn test_start_failure() {
        let recorder = Arc::new(Recorder::default());
        let capture = MockCapture::new(uniform_samples(&small(), 2, 40), recorder.clone());
        let transmit = MockTransmit::new(recorder.clone()).fault(Fault::Start);
        let relay = builder(capture, transmit).build();
        let session = relay.session();

        let err = relay.run().await.unwrap_err();
        assert_eq!(err.kind().exit_code(), 5);
        assert_eq!(recorder.pulled(), 0);
        assert_eq!(session.state(), RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_without_transmit() {
        let recorder = Arc::new(Recorder::default());
        let report = RelayBuilder::new(
            small(),
            MockCapture::new(uniform_samples(&small(), 3, 40), recorder.clone()).into_factory(),
        )
        .build()
        .run()
        .await
        .unwrap();

        assert_eq!(report.health.frames_relayed, 3);
        assert_eq!(report.health.bytes_pushed, 0);
        assert_eq!(recorder.released(), 1);
    }

    #[tokio::test]
    async fn test_rgb_samples_come_back_as_rgb() {
        let recorder = Arc::new(Recorder::default());
        let rgb = caps(PixelFormat::Rgb8, 4, 2);
        let data: Vec<u8> = (0..8).flat_map(|_| [1u8, 2, 3]).collect();
        let sample = Sample::new(Bytes::from(data.clone()), rgb, Default::default());

        RelayBuilder::new(rgb, MockCapture::new(vec![sample], recorder.clone()).into_factory())
            .with_transmit_factory(MockTransmit::new(recorder.clone()).into_factory())
            .build()
            .run()
            .await
            .unwrap();

        let pushed = recorder.pushed();
        assert_eq!(pushed[0].caps(), &rgb);
        assert_eq!(pushed[0].buffer().as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_square_transform_negotiates_output_geometry() {
        let recorder = Arc::new(Recorder::default());
        let report = builder(
            MockCapture::new(uniform_samples(&small(), 2, 200), recorder.clone()),
            MockTransmit::new(recorder.clone()),
        )
        .with_transform(Arc::new(SquareTransform::new(SquareMethod::PadCenter)))
        .build()
        .run()
        .await
        .unwrap();

        assert_eq!(report.health.frames_relayed, 2);
        let pushed = recorder.pushed();
        assert_eq!((pushed[0].caps().width, pushed[0].caps().height), (16, 16));
        // top padding rows are black, the middle is the original frame
        assert!(pushed[0].buffer()[..16 * 3].iter().all(|&v| v == 0));
        assert!(pushed[0].buffer()[8 * 16 * 3..9 * 16 * 3].iter().all(|&v| v == 200));
    }

    #[tokio::test]
    async fn test_edge_transform_on_uniform_gray() {
        let recorder = Arc::new(Recorder::default());
        let vga = caps(PixelFormat::Bgr8, 640, 480);
        RelayBuilder::new(vga, MockCapture::new(uniform_samples(&vga, 1, 128), recorder.clone()).into_factory())
            .with_transmit_factory(MockTransmit::new(recorder.clone()).into_factory())
            .with_transform(Arc::new(EdgeTransform::new()))
            .build()
            .run()
            .await
            .unwrap();

        let pushed = recorder.pushed();
        assert_eq!(pushed.len(), 1);
        let buffer = pushed[0].buffer();
        assert_eq!(buffer.len(), 640 * 480 * 3);

        let text = EdgeTransform::annotation(640 * 480 * 3, 0);
        let (tx, ty, tw, th) = EdgeTransform::annotation_bounds(&text);
        let mut red = 0;
        for (i, px) in buffer.chunks(3).enumerate() {
            let (x, y) = ((i % 640) as i64, (i / 640) as i64);
            let inside = x >= tx && x < tx + tw as i64 && y >= ty && y < ty + th as i64;
            if !inside {
                assert_eq!(px, &[128, 128, 128]);
            } else if px == edges::TEXT_BGR {
                red += 1;
            }
        }
        assert!(red > 0);
    }

    #[tokio::test]
    async fn test_check_brings_up_to_ready_only() {
        let recorder = Arc::new(Recorder::default());
        let relay = builder(
            MockCapture::new(uniform_samples(&small(), 2, 40), recorder.clone()),
            MockTransmit::new(recorder.clone()),
        )
        .build();
        let session = relay.session();

        let negotiated = relay.check().await.unwrap();
        assert_eq!(negotiated.capture, small());
        assert_eq!(recorder.pulled(), 0);
        assert_eq!(
            recorder.states(),
            vec![
                (PipelineRole::Transmit, EndpointState::Ready),
                (PipelineRole::Capture, EndpointState::Ready),
                (PipelineRole::Capture, EndpointState::Stopped),
                (PipelineRole::Transmit, EndpointState::Stopped),
            ]
        );
        assert_eq!(session.state(), RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_pattern_capture_end_to_end() {
        let recorder = Arc::new(Recorder::default());
        // odd row size, so the capture side pads rows
        let requested = CapsDescriptor::new(PixelFormat::Rgb8, 33, 10, FrameRate::new(100, 1)).unwrap();
        let config = CaptureConfig {
            pattern: Pattern::Checker,
            num_buffers: Some(3),
            ..CaptureConfig::default()
        };
        let report = RelayBuilder::new(requested, crate::capture::factory(&config))
            .with_transmit_factory(MockTransmit::new(recorder.clone()).into_factory())
            .build()
            .run()
            .await
            .unwrap();

        assert_eq!(report.reason, DrainReason::EndOfStream);
        assert_eq!(report.health.samples_pulled + report.health.capture_drops, 3);
        assert_eq!(recorder.pushed_count() as u64, report.health.frames_relayed);
        assert!(recorder.pushed().iter().all(|s| s.size() == 33 * 10 * 3));
    }
}
