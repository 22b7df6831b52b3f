//! Transmit side of the relay
//!
//! A transmit pipeline accepts samples tagged with its negotiated
//! descriptor and sends them over the network. A push either succeeds or
//! fails; the relay never waits for network capacity beyond what the
//! pipeline itself queues.

use async_trait::async_trait;

use crate::config::{TransmitBackend, TransmitConfig};
use crate::pipeline::bus::BusSender;
use crate::pipeline::error::RelayError;
use crate::pipeline::stage::PipelineEndpoint;
use crate::pipeline::types::Sample;

#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod udp;

#[cfg(feature = "gstreamer")]
pub use gst::H264Transmit;
pub use udp::UdpTransmit;

/// Sink for the relay's output samples
#[async_trait]
pub trait TransmitPipeline: PipelineEndpoint {
    /// Hand over one sample; ownership moves to the pipeline
    async fn push_sample(&mut self, sample: Sample) -> Result<(), RelayError>;

    /// No more samples will be pushed
    async fn end_of_stream(&mut self);
}

/// Builds a transmit pipeline once the bus exists
pub type TransmitFactory =
    Box<dyn FnOnce(BusSender) -> Result<Box<dyn TransmitPipeline>, RelayError> + Send>;

/// Factory for the backend selected in `config`
pub fn factory(config: &TransmitConfig) -> TransmitFactory {
    let config = config.clone();
    match config.backend {
        TransmitBackend::Udp => Box::new(move |bus| {
            Ok(Box::new(UdpTransmit::new(&config, bus)?) as Box<dyn TransmitPipeline>)
        }),
        #[cfg(feature = "gstreamer")]
        TransmitBackend::Gstreamer => Box::new(move |bus| {
            Ok(Box::new(H264Transmit::new(&config, bus)?) as Box<dyn TransmitPipeline>)
        }),
        #[cfg(not(feature = "gstreamer"))]
        TransmitBackend::Gstreamer => Box::new(move |bus| {
            Err(RelayError::element(
                bus.role(),
                "x264enc",
                "built without the gstreamer feature",
            ))
        }),
    }
}
