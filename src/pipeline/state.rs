//! Relay session state machine

use std::time::Instant;

use super::error::ErrorKind;

/// Why a running session started draining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// The capture side finished producing
    EndOfStream,

    /// External stop request (signal, key press)
    Cancelled,

    /// A session-fatal error
    Error(ErrorKind),
}

impl DrainReason {
    /// Whether the session ends without error
    pub fn is_graceful(&self) -> bool {
        !matches!(self, DrainReason::Error(_))
    }
}

impl std::fmt::Display for DrainReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainReason::EndOfStream => write!(f, "end of stream"),
            DrainReason::Cancelled => write!(f, "cancelled"),
            DrainReason::Error(kind) => write!(f, "{}", kind),
        }
    }
}

/// Relay state machine
///
/// `Idle → Starting → Running → Draining → Stopped`, with `Starting →
/// Stopped` when bring-up fails. Transitions are validated so the loop and
/// the lifecycle coordinator cannot disagree on where the session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Session created, nothing constructed yet
    Idle,

    /// Pipelines being constructed, linked, negotiated and started
    Starting,

    /// Frames are being relayed
    Running {
        /// When the session started running
        started_at: Instant,
    },

    /// No new samples accepted; pipelines being stopped
    Draining { reason: DrainReason },

    /// Both pipelines stopped and released
    Stopped,
}

impl RelayState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &RelayState) -> bool {
        use RelayState::*;

        match (self, target) {
            (Idle, Starting) => true,

            (Starting, Running { .. }) => true,
            // bring-up failed
            (Starting, Stopped) => true,

            (Running { .. }, Draining { .. }) => true,

            (Draining { .. }, Stopped) => true,

            // From Stopped - no transitions allowed
            (Stopped, _) => false,

            (Running { .. }, Running { .. }) => true,
            (a, b) if a == b => true,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            RelayState::Idle => "Idle",
            RelayState::Starting => "Starting",
            RelayState::Running { .. } => "Running",
            RelayState::Draining { .. } => "Draining",
            RelayState::Stopped => "Stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RelayState::Running { .. })
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayState::Draining { reason } => write!(f, "Draining ({})", reason),
            other => write!(f, "{}", other.description()),
        }
    }
}
