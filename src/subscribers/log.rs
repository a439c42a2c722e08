//! # LogWriter: events as `tracing` records
//!
//! The default subscriber of [`ServiceRunner`](crate::ServiceRunner). Every
//! event becomes one record under the `runvisor` target; failures are `error`,
//! shutdown anomalies `warn`, lifecycle milestones `info`, bookkeeping `debug`.
//!
//! ## Example output
//! ```text
//! INFO runvisor: backend started flavour=isolated
//! ERROR runvisor: backend aborted flavour=thread reason="payload poll failed: no such pool: gpu"
//! WARN runvisor: grace exceeded flavour=native delay_ms=5000
//! INFO runvisor: runtime stopped
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let flavour = e.flavour.map(|f| f.as_label()).unwrap_or("-");
        let subject = e.subject.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::RuntimeStarting => {
                tracing::info!(target: "runvisor", "runtime starting");
            }
            EventKind::RuntimeReady => {
                tracing::info!(target: "runvisor", "runtime ready");
            }
            EventKind::RuntimeStopped => {
                tracing::info!(target: "runvisor", "runtime stopped");
            }
            EventKind::RuntimeTerminated => {
                tracing::error!(target: "runvisor", flavour, reason, "runtime terminated");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: "runvisor", reason, "shutdown requested");
            }
            EventKind::BackendStarted => {
                tracing::info!(target: "runvisor", flavour, "backend started");
            }
            EventKind::BackendStopped => {
                tracing::info!(target: "runvisor", flavour, "backend stopped");
            }
            EventKind::BackendAborted => {
                tracing::error!(target: "runvisor", flavour, reason, "backend aborted");
            }
            EventKind::BackendCancelled => {
                tracing::warn!(target: "runvisor", flavour, "backend cancelled");
            }
            EventKind::GraceExceeded => {
                tracing::warn!(
                    target: "runvisor",
                    flavour,
                    delay_ms = e.delay_ms,
                    "grace exceeded"
                );
            }
            EventKind::PayloadQueued => {
                tracing::debug!(target: "runvisor", flavour, payload = subject, "payload queued");
            }
            EventKind::PayloadDiscarded => {
                tracing::warn!(
                    target: "runvisor",
                    flavour,
                    payload = subject,
                    reason,
                    "payload discarded"
                );
            }
            EventKind::ServiceAdopted => {
                tracing::info!(target: "runvisor", flavour, service = subject, "service adopted");
            }
            EventKind::ReaperStarted => {
                tracing::debug!(target: "runvisor", delay_ms = e.delay_ms, "reaper started");
            }
            EventKind::ReaperStopped => {
                tracing::debug!(target: "runvisor", "reaper stopped");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
