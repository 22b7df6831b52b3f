//! Shared relay session state
//!
//! One record per run, passed by reference to everything that may touch
//! it: the relay loop, the lifecycle coordinator, signal handlers and the
//! capture producer. All fields are synchronized since they can be
//! written from several execution contexts at once.

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

use super::caps::Negotiated;
use super::error::ErrorKind;
use super::health::PipelineHealth;
use super::state::RelayState;
use crate::utils::lock;

pub struct RelaySession {
    state: Mutex<RelayState>,
    running: AtomicBool,
    last_error: Mutex<Option<ErrorKind>>,
    caps: Mutex<Option<Negotiated>>,
    cancel: CancellationToken,
    health: Arc<PipelineHealth>,
}

impl RelaySession {
    pub fn new() -> Self {
        Self::with_cancel(CancellationToken::new())
    }

    /// Session observing an externally owned cancellation token
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            state: Mutex::new(RelayState::Idle),
            running: AtomicBool::new(false),
            last_error: Mutex::new(None),
            caps: Mutex::new(None),
            cancel,
            health: Arc::new(PipelineHealth::new()),
        }
    }

    pub fn state(&self) -> RelayState {
        *lock(&self.state)
    }

    /// Move to `target` if the state machine allows it.
    ///
    /// Returns `false` (and leaves the state untouched) otherwise.
    pub fn transition(&self, target: RelayState) -> bool {
        let mut state = lock(&self.state);
        if !state.can_transition_to(&target) {
            warn!("Rejected session transition {} -> {}", *state, target);
            return false;
        }
        if *state != target {
            debug!("Session {} -> {}", *state, target);
        }
        *state = target;
        self.running.store(target.is_running(), Ordering::Release);
        true
    }

    /// Whether the loop should keep accepting samples
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Record a session-level error; the first one wins
    pub fn record_error(&self, kind: ErrorKind) {
        let mut last = lock(&self.last_error);
        if last.is_none() {
            *last = Some(kind);
        } else {
            debug!("Ignoring subsequent {} (already recorded {:?})", kind, *last);
        }
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        *lock(&self.last_error)
    }

    pub fn set_caps(&self, caps: Negotiated) {
        lock(&self.caps).replace(caps);
    }

    pub fn caps(&self) -> Option<Negotiated> {
        *lock(&self.caps)
    }

    pub fn clear_caps(&self) {
        lock(&self.caps).take();
    }

    /// Request a stop; observed at the next loop iteration
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stop requested");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("state", &self.state())
            .field("last_error", &self.last_error())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
