//! Error types used by the runvisor runtime and its backends.
//!
//! This module defines three types:
//!
//! - [`RuntimeError`] : errors raised by the runtime itself; a backend failure
//!   surfaces from [`ServiceRunner::accept`](crate::ServiceRunner::accept) as
//!   [`RuntimeError::Terminated`], carrying the [`Failure`] as its source.
//! - [`Failure`] : the terminal value of one backend: why it gave up.
//! - [`OrphanedReturn`] : a fire-and-forget payload produced a value.
//!
//! Both enums provide `as_label` for logs/metrics.

use std::io;

use thiserror::Error;

use crate::payloads::{Flavour, PayloadKind, Value};

/// A fire-and-forget payload returned a value without anyone to receive it.
#[derive(Error, Debug)]
#[error("no caller to receive {value} from {payload}")]
pub struct OrphanedReturn {
    /// Name of the payload that produced the value.
    pub payload: String,
    /// The value nobody received.
    pub value: Value,
}

/// # Terminal failure of a backend.
///
/// A backend records at most one failure per run; the first payload to
/// misbehave ends the run and later ones are not reported.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Failure {
    /// A fire-and-forget payload returned an error.
    #[error("payload {payload} failed")]
    Raised {
        /// Name of the failing payload.
        payload: String,
        /// The payload's error, unchanged.
        #[source]
        error: anyhow::Error,
    },

    /// A fire-and-forget payload produced a value.
    #[error(transparent)]
    Orphaned(#[from] OrphanedReturn),

    /// A payload or the backend itself panicked.
    #[error("{payload} panicked: {message}")]
    Panicked {
        /// Name of the panicking payload (or backend).
        payload: String,
        /// Recovered panic message.
        message: String,
    },

    /// The backend could not acquire an OS resource (thread, scheduler).
    #[error("{flavour} backend could not start")]
    Unavailable {
        /// Flavour of the backend.
        flavour: Flavour,
        /// The underlying OS error.
        #[source]
        error: io::Error,
    },
}

impl Failure {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Failure::Raised { .. } => "payload_raised",
            Failure::Orphaned(_) => "payload_orphaned_return",
            Failure::Panicked { .. } => "payload_panicked",
            Failure::Unavailable { .. } => "backend_unavailable",
        }
    }

    /// Name of the payload that caused the failure, if a payload did.
    pub fn payload(&self) -> Option<&str> {
        match self {
            Failure::Raised { payload, .. } | Failure::Panicked { payload, .. } => Some(payload),
            Failure::Orphaned(orphan) => Some(&orphan.payload),
            Failure::Unavailable { .. } => None,
        }
    }

    /// The payload's own error, if it raised one.
    pub fn raised(&self) -> Option<&anyhow::Error> {
        match self {
            Failure::Raised { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The orphaned return, if that is what ended the run.
    pub fn orphaned(&self) -> Option<&OrphanedReturn> {
        match self {
            Failure::Orphaned(orphan) => Some(orphan),
            _ => None,
        }
    }
}

/// # Errors produced by the runvisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A backend failed; every backend was closed and the run ended.
    #[error("runtime terminated by {flavour} backend")]
    Terminated {
        /// Flavour of the backend that failed first.
        flavour: Flavour,
        /// Why it failed.
        #[source]
        failure: Failure,
    },

    /// An exclusive section is already entered elsewhere.
    #[error("exclusive call to {section} violated")]
    AlreadyAccepting {
        /// Name of the guarded section.
        section: &'static str,
    },

    /// The payload kind does not match the flavour it was submitted to.
    #[error("{flavour} backend cannot run {kind} payload {payload}")]
    IncompatiblePayload {
        /// Requested flavour.
        flavour: Flavour,
        /// Kind of the rejected payload.
        kind: PayloadKind,
        /// Name of the rejected payload.
        payload: String,
    },

    /// The backend is shutting down or has stopped.
    #[error("{flavour} backend is closed; discarding {payload}")]
    BackendClosed {
        /// Flavour of the closed backend.
        flavour: Flavour,
        /// Name of the discarded payload.
        payload: String,
    },

    /// A blocking call was made while no backend of that flavour runs.
    #[error("{flavour} backend is not running")]
    NotRunning {
        /// Requested flavour.
        flavour: Flavour,
    },

    /// A blocking call was made from a thread that drives a tokio runtime.
    #[error("blocking call to {flavour} backend from an async context; await {payload} instead")]
    BlockingInAsync {
        /// Requested flavour.
        flavour: Flavour,
        /// Name of the rejected payload.
        payload: String,
    },

    /// An OS resource (thread, runtime) could not be created.
    #[error("runtime i/o error: {0}")]
    Io(#[from] io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use runvisor::{Flavour, RuntimeError};
    ///
    /// let err = RuntimeError::NotRunning { flavour: Flavour::Thread };
    /// assert_eq!(err.as_label(), "runtime_not_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Terminated { .. } => "runtime_terminated",
            RuntimeError::AlreadyAccepting { .. } => "runtime_already_accepting",
            RuntimeError::IncompatiblePayload { .. } => "runtime_incompatible_payload",
            RuntimeError::BackendClosed { .. } => "runtime_backend_closed",
            RuntimeError::NotRunning { .. } => "runtime_not_running",
            RuntimeError::BlockingInAsync { .. } => "runtime_blocking_in_async",
            RuntimeError::Io(_) => "runtime_io",
        }
    }

    /// The backend failure that ended the run, if any.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RuntimeError::Terminated { failure, .. } => Some(failure),
            _ => None,
        }
    }
}

/// Renders an error and its sources as `outer: inner: root`.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
