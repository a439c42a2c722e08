//! # Backend contract.
//!
//! [`Backend`] is the uniform interface the [`Supervisor`](crate::Supervisor)
//! drives. A backend is used for a single run:
//!
//! ```text
//! Idle ──run()──► Ready ──► Running ──aclose()──► Stopped
//!                                   └─failure───► Failed
//! ```
//!
//! `register_payload` and the blocking calls are only admitted in `Ready` and
//! `Running`. Closing an idle or finished backend is a no-op.

use std::fmt;

use async_trait::async_trait;

use crate::error::{Failure, RuntimeError};
use crate::payloads::{Flavour, Payload, PayloadResult};

/// Lifecycle state of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Created, `run()` not called yet.
    Idle,
    /// Accepts payloads; the main loop may not consume them yet.
    Ready,
    /// Main loop is consuming payloads.
    Running,
    /// Closed without failure.
    Stopped,
    /// Ended by a failure.
    Failed,
}

impl BackendState {
    /// True for `Stopped` and `Failed`.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackendState::Stopped | BackendState::Failed)
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BackendState::Idle => "idle",
            BackendState::Ready => "ready",
            BackendState::Running => "running",
            BackendState::Stopped => "stopped",
            BackendState::Failed => "failed",
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Execution engine for one [`Flavour`] of payloads.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Flavour this backend executes.
    fn flavour(&self) -> Flavour;

    /// Current lifecycle state.
    fn state(&self) -> BackendState;

    /// Queues a fire-and-forget payload. Never blocks.
    ///
    /// # Errors
    /// - [`RuntimeError::IncompatiblePayload`] if the payload kind does not match
    /// - [`RuntimeError::NotRunning`] before `run()` made the backend ready
    /// - [`RuntimeError::BackendClosed`] once the backend is closing or closed
    fn register_payload(&self, payload: Payload) -> Result<(), RuntimeError>;

    /// Runs `payload` and blocks the calling OS thread until it completes.
    ///
    /// The payload's value or error is returned unchanged. Admission errors are
    /// returned as [`RuntimeError`] inside the `anyhow::Error`.
    ///
    /// Must not be called from within an async context; use
    /// [`Backend::run_payload_async`] there.
    fn run_payload(&self, payload: Payload) -> PayloadResult;

    /// Awaitable variant of [`Backend::run_payload`].
    async fn run_payload_async(&self, payload: Payload) -> PayloadResult;

    /// Completes once the backend accepts payloads (or has already ended).
    async fn ready(&self);

    /// Main loop. Returns `Ok` when closed, or the first failure.
    async fn run(&self) -> Result<(), Failure>;

    /// Requests shutdown and waits until the backend has quiesced.
    async fn aclose(&self);

    /// Blocking [`Backend::aclose`], for callers outside any runtime.
    fn stop(&self) {
        futures::executor::block_on(self.aclose());
    }
}
