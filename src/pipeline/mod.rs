//! Core of the relay
//!
//! Everything between the two external pipelines lives here:
//! - Caps: the format contract both sides agree on
//! - Bridge: sample <-> frame conversion
//! - Handoff: the one-deep slot samples travel through and the bus
//!   carrying errors and end-of-stream from the pipelines
//! - Control: session state, lifecycle coordinator and the relay loop
//! - Health: counters logged while running and at shutdown

pub mod bridge;
pub mod builder;
pub mod bus;
pub mod caps;
pub mod clock;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod relay;
pub mod session;
pub mod slot;
pub mod stage;
pub mod state;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use bridge::FrameBridge;
pub use builder::RelayBuilder;
pub use bus::{Bus, BusMessage, BusSender, PipelineRole};
pub use caps::{CapsDescriptor, CapsFilter, FrameRate, Negotiated, PixelFormat};
pub use clock::MediaClock;
pub use error::{ErrorKind, RelayError};
pub use health::PipelineHealth;
pub use relay::{Relay, RelayReport};
pub use session::RelaySession;
pub use stage::{EndpointState, PipelineEndpoint};
pub use state::{DrainReason, RelayState};
pub use types::{Frame, Sample, Timestamp};
