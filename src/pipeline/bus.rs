//! Asynchronous event channel between the pipelines and the relay loop
//!
//! Both pipelines report errors, end-of-stream and state changes from
//! their own execution contexts (streaming threads, producer tasks). Those
//! notifications are never handled inline: they are posted to a bounded
//! queue and the relay loop receives them at its own pace.

use log::{debug, warn};
use tokio::sync::mpsc;

use super::stage::EndpointState;

/// Which of the two pipelines a message or error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineRole {
    Capture,
    Transmit,
}

impl std::fmt::Display for PipelineRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineRole::Capture => write!(f, "capture"),
            PipelineRole::Transmit => write!(f, "transmit"),
        }
    }
}

/// Notification posted by a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// The pipeline failed internally and cannot keep producing/consuming
    Error { role: PipelineRole, message: String },

    /// Non-fatal condition worth logging
    Warning { role: PipelineRole, message: String },

    /// Natural completion of the stream
    Eos { role: PipelineRole },

    /// The pipeline reached a new state
    StateChanged {
        role: PipelineRole,
        state: EndpointState,
    },
}

impl BusMessage {
    pub fn role(&self) -> PipelineRole {
        match self {
            BusMessage::Error { role, .. }
            | BusMessage::Warning { role, .. }
            | BusMessage::Eos { role }
            | BusMessage::StateChanged { role, .. } => *role,
        }
    }
}

/// Sending half handed to one pipeline.
///
/// Posting never blocks: it may be called from a streaming thread that must
/// not wait on the relay loop.
#[derive(Debug, Clone)]
pub struct BusSender {
    role: PipelineRole,
    tx: mpsc::Sender<BusMessage>,
}

impl BusSender {
    pub fn role(&self) -> PipelineRole {
        self.role
    }

    pub fn error(&self, message: impl Into<String>) {
        self.post(BusMessage::Error {
            role: self.role,
            message: message.into(),
        });
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.post(BusMessage::Warning {
            role: self.role,
            message: message.into(),
        });
    }

    pub fn eos(&self) {
        self.post(BusMessage::Eos { role: self.role });
    }

    pub fn state_changed(&self, state: EndpointState) {
        self.post(BusMessage::StateChanged {
            role: self.role,
            state,
        });
    }

    fn post(&self, msg: BusMessage) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!("Bus full, dropping {:?}", msg);
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                debug!("Bus closed, dropping {:?}", msg);
            }
        }
    }
}

/// Factory for per-pipeline senders sharing one queue
#[derive(Debug, Clone)]
pub struct Bus {
    tx: mpsc::Sender<BusMessage>,
}

impl Bus {
    /// Create a bus with the given queue depth and its receiving end
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn sender(&self, role: PipelineRole) -> BusSender {
        BusSender {
            role,
            tx: self.tx.clone(),
        }
    }
}
