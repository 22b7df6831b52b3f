//! Assembles a [`Relay`] from configuration or from explicit parts.
//!
//! One builder covers every variant: with or without a transmit side, any
//! capture backend, any transform.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::caps::CapsDescriptor;
use super::error::RelayError;
use super::relay::Relay;
use super::session::RelaySession;
use crate::capture::{self, CaptureFactory};
use crate::config::RelayConfig;
use crate::transform::{self, Passthrough, Transform};
use crate::transmit::{self, TransmitFactory};

pub struct RelayBuilder {
    requested: CapsDescriptor,
    capture: CaptureFactory,
    transmit: Option<TransmitFactory>,
    transform: Arc<dyn Transform>,
    cancel: CancellationToken,
    stats_interval: Option<Duration>,
}

impl RelayBuilder {
    /// Capture-only relay with a passthrough transform
    pub fn new(requested: CapsDescriptor, capture: CaptureFactory) -> Self {
        Self {
            requested,
            capture,
            transmit: None,
            transform: Arc::new(Passthrough),
            cancel: CancellationToken::new(),
            stats_interval: None,
        }
    }

    /// Validate `config` and select the backends it names
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let mut builder = Self::new(config.to_caps()?, capture::factory(&config.capture))
            .with_transform(transform::from_config(&config.transform))
            .with_stats_interval(config.stats_interval());
        if let Some(transmit) = &config.transmit {
            builder = builder.with_transmit_factory(transmit::factory(transmit));
        }
        Ok(builder)
    }

    pub fn requested(&self) -> &CapsDescriptor {
        &self.requested
    }

    pub fn has_transmit(&self) -> bool {
        self.transmit.is_some()
    }

    pub fn with_capture_factory(mut self, capture: CaptureFactory) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_transmit_factory(mut self, transmit: TransmitFactory) -> Self {
        self.transmit = Some(transmit);
        self
    }

    /// Frames are transformed and then dropped
    pub fn without_transmit(mut self) -> Self {
        self.transmit = None;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = transform;
        self
    }

    /// Stop the relay when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn build(self) -> Relay {
        Relay::new(
            Arc::new(RelaySession::with_cancel(self.cancel)),
            self.requested,
            self.capture,
            self.transmit,
            self.transform,
            self.stats_interval,
        )
    }
}
