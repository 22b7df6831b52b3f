//! Capture side of the relay
//!
//! A capture pipeline produces timestamped samples tagged with the
//! negotiated descriptor. Samples reach the relay through a one-deep,
//! drop-oldest handoff: the producer never blocks and the relay only ever
//! sees the most recent unconsumed sample.

use async_trait::async_trait;

use crate::config::{CaptureBackend, CaptureConfig};
use crate::pipeline::bus::BusSender;
use crate::pipeline::error::RelayError;
use crate::pipeline::stage::PipelineEndpoint;
use crate::pipeline::types::Sample;

#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod test_pattern;

#[cfg(feature = "gstreamer")]
pub use gst::V4l2Capture;
pub use test_pattern::TestPatternCapture;

/// Source of samples for the relay loop
#[async_trait]
pub trait CapturePipeline: PipelineEndpoint {
    /// Wait for the next sample; `None` once the pipeline stopped producing
    ///
    /// Must be cancel-safe: dropping the future loses no sample.
    async fn pull_sample(&mut self) -> Option<Sample>;

    /// Samples overwritten before the relay consumed them
    fn dropped_samples(&self) -> u64;
}

/// Builds a capture pipeline once the bus exists
pub type CaptureFactory =
    Box<dyn FnOnce(BusSender) -> Result<Box<dyn CapturePipeline>, RelayError> + Send>;

/// Factory for the backend selected in `config`
pub fn factory(config: &CaptureConfig) -> CaptureFactory {
    let config = config.clone();
    match config.backend {
        CaptureBackend::TestPattern => Box::new(move |bus| {
            Ok(Box::new(TestPatternCapture::new(&config, bus)) as Box<dyn CapturePipeline>)
        }),
        #[cfg(feature = "gstreamer")]
        CaptureBackend::Gstreamer => Box::new(move |bus| {
            Ok(Box::new(V4l2Capture::new(&config, bus)?) as Box<dyn CapturePipeline>)
        }),
        #[cfg(not(feature = "gstreamer"))]
        CaptureBackend::Gstreamer => Box::new(move |bus| {
            Err(RelayError::element(
                bus.role(),
                "v4l2src",
                "built without the gstreamer feature",
            ))
        }),
    }
}
