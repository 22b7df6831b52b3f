//! Pipeline endpoint trait shared by the capture and transmit sides
//!
//! Each side of the relay is an independently clocked pipeline that the
//! core drives through the same small surface: construct, link, configure
//! with negotiated caps, then command through [`EndpointState`].

use async_trait::async_trait;

use super::caps::{CapsDescriptor, CapsFilter};
use super::error::RelayError;

/// Externally commanded state of one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// Constructed, holds no resources
    Idle,

    /// Resources acquired (device opened, socket bound), not producing
    Ready,

    /// Producing or consuming samples
    Active,

    /// Commanded to stop; resources may still be held until released
    Stopped,
}

impl EndpointState {
    pub fn description(&self) -> &'static str {
        match self {
            EndpointState::Idle => "Idle",
            EndpointState::Ready => "Ready",
            EndpointState::Active => "Active",
            EndpointState::Stopped => "Stopped",
        }
    }

    /// Check if an endpoint may be commanded from this state to `target`
    pub fn can_transition_to(&self, target: &EndpointState) -> bool {
        use EndpointState::*;

        match (self, target) {
            (Idle, Ready) | (Idle, Active) => true,
            (Ready, Active) => true,
            (Active, Ready) => true,
            // stopping is always allowed, and repeatable
            (_, Stopped) => true,
            (Stopped, _) => false,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Common surface of the capture and transmit pipelines
#[async_trait]
pub trait PipelineEndpoint: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// What this endpoint is able to accept
    fn caps_filter(&self) -> CapsFilter;

    /// Connect the endpoint's internal elements
    fn link(&mut self) -> Result<(), RelayError>;

    /// Fix the descriptor samples will carry across this boundary
    fn configure(&mut self, caps: &CapsDescriptor) -> Result<(), RelayError>;

    /// Command the endpoint to `state`, returning once it is reached
    async fn set_state(&mut self, state: EndpointState) -> Result<(), RelayError>;

    fn state(&self) -> EndpointState;

    /// Release everything the endpoint owns. Must be safe to call twice.
    async fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_transitions() {
        use EndpointState::*;

        assert!(Idle.can_transition_to(&Ready));
        assert!(Ready.can_transition_to(&Active));
        assert!(Idle.can_transition_to(&Stopped));
        assert!(Active.can_transition_to(&Stopped));
        assert!(Stopped.can_transition_to(&Stopped));

        assert!(!Stopped.can_transition_to(&Active));
        assert!(!Ready.can_transition_to(&Idle));
    }
}
