//! Error kinds raised while bringing up and running a relay session
//!
//! Errors fall into three groups:
//! - **Bring-up errors** (negotiation, element creation, linking, start):
//!   fatal, abort the session before any frame is relayed
//! - **Per-frame errors** (buffer map, empty frame): recoverable, the
//!   current frame is skipped
//! - **Session errors** (push failure, asynchronous pipeline error): move
//!   the session into draining. End of stream is a drain reason, not an
//!   error

use super::bus::PipelineRole;

/// Fieldless classification of a [`RelayError`].
///
/// This is what the session's last-error slot records and what the process
/// exit code is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Negotiation,
    ElementCreation,
    Link,
    PipelineStart,
    BufferMap,
    EmptyFrame,
    Push,
    AsyncBus,
    Io,
}

impl ErrorKind {
    /// Per-frame errors: the loop logs them and skips the frame
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorKind::BufferMap | ErrorKind::EmptyFrame)
    }

    /// Process exit code for a session that ended with this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Config => 1,
            ErrorKind::Negotiation => 2,
            ErrorKind::ElementCreation => 3,
            ErrorKind::Link => 4,
            ErrorKind::PipelineStart => 5,
            ErrorKind::AsyncBus => 6,
            ErrorKind::Push => 7,
            ErrorKind::Io => 8,
            // never terminate a session on their own
            ErrorKind::BufferMap | ErrorKind::EmptyFrame => 9,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::Negotiation => "NegotiationError",
            ErrorKind::ElementCreation => "ElementCreationError",
            ErrorKind::Link => "LinkError",
            ErrorKind::PipelineStart => "PipelineStartError",
            ErrorKind::BufferMap => "BufferMapError",
            ErrorKind::EmptyFrame => "EmptyFrameError",
            ErrorKind::Push => "PushError",
            ErrorKind::AsyncBus => "AsyncBusError",
            ErrorKind::Io => "IoError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors produced by the bridge, the pipelines and the relay loop.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("caps negotiation failed: {reason}")]
    Negotiation { reason: String },

    #[error("{pipeline}: could not create element '{element}': {reason}")]
    ElementCreation {
        pipeline: PipelineRole,
        element: String,
        reason: String,
    },

    #[error("{pipeline}: could not link elements: {reason}")]
    Link {
        pipeline: PipelineRole,
        reason: String,
    },

    #[error("{pipeline}: failed to reach {target} state: {reason}")]
    PipelineStart {
        pipeline: PipelineRole,
        target: String,
        reason: String,
    },

    #[error("could not map buffer for reading: {reason}")]
    BufferMap { reason: String },

    #[error("frame has zero area ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("transmit pipeline rejected sample: {reason}")]
    Push { reason: String },

    #[error("{role} pipeline reported an error: {message}")]
    AsyncBus { role: PipelineRole, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Config(_) => ErrorKind::Config,
            RelayError::Negotiation { .. } => ErrorKind::Negotiation,
            RelayError::ElementCreation { .. } => ErrorKind::ElementCreation,
            RelayError::Link { .. } => ErrorKind::Link,
            RelayError::PipelineStart { .. } => ErrorKind::PipelineStart,
            RelayError::BufferMap { .. } => ErrorKind::BufferMap,
            RelayError::EmptyFrame { .. } => ErrorKind::EmptyFrame,
            RelayError::Push { .. } => ErrorKind::Push,
            RelayError::AsyncBus { .. } => ErrorKind::AsyncBus,
            RelayError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn negotiation(reason: impl Into<String>) -> Self {
        RelayError::Negotiation {
            reason: reason.into(),
        }
    }

    pub fn element(pipeline: PipelineRole, element: &str, reason: impl ToString) -> Self {
        RelayError::ElementCreation {
            pipeline,
            element: element.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn link(pipeline: PipelineRole, reason: impl ToString) -> Self {
        RelayError::Link {
            pipeline,
            reason: reason.to_string(),
        }
    }

    pub fn start(pipeline: PipelineRole, target: impl ToString, reason: impl ToString) -> Self {
        RelayError::PipelineStart {
            pipeline,
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn push(reason: impl ToString) -> Self {
        RelayError::Push {
            reason: reason.to_string(),
        }
    }
}
