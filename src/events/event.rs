//! # Runtime events emitted by backends, the supervisor and the service runner.
//!
//! [`EventKind`] classifies events; [`Event`] carries the metadata (flavour,
//! subject, reason, delay).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so events can be ordered even when subscribers receive them
//! out of order.
//!
//! ## Example
//! ```rust
//! use runvisor::{Event, EventKind, Flavour};
//!
//! let ev = Event::now(EventKind::BackendAborted)
//!     .with_flavour(Flavour::Thread)
//!     .with_reason("payload poll failed");
//!
//! assert_eq!(ev.flavour, Some(Flavour::Thread));
//! assert_eq!(ev.reason.as_deref(), Some("payload poll failed"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::payloads::Flavour;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Runtime events ===
    /// The supervisor is starting its backends.
    RuntimeStarting,
    /// All backends are ready and queued payloads were dispatched.
    RuntimeReady,
    /// Every backend has been closed; the run is over.
    RuntimeStopped,
    /// A backend failure ended the run (`reason` holds the failure).
    RuntimeTerminated,
    /// Shutdown requested (OS signal or explicit stop).
    ShutdownRequested,

    // === Backend events ===
    /// A backend entered its main loop.
    BackendStarted,
    /// A backend left its main loop after being closed.
    BackendStopped,
    /// A backend left its main loop because of a failure.
    BackendAborted,
    /// A backend's main loop was dropped before it finished.
    BackendCancelled,
    /// Cancelled payloads outlived the grace period and were aborted.
    GraceExceeded,

    // === Payload events ===
    /// A payload was buffered because its backend does not exist yet.
    PayloadQueued,
    /// A queued payload could not be handed to its backend.
    PayloadDiscarded,

    // === Service events ===
    /// A service was handed to its backend.
    ServiceAdopted,
    /// The reaper loop started.
    ReaperStarted,
    /// The reaper loop acknowledged shutdown.
    ReaperStopped,
}

/// Runtime event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Global monotonic sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Backend the event refers to.
    pub flavour: Option<Flavour>,
    /// Payload, service or subscriber name.
    pub subject: Option<Arc<str>>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Delay in milliseconds (grace, reaper interval).
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates an event of the given kind, stamped now.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            flavour: None,
            subject: None,
            reason: None,
            delay_ms: None,
        }
    }

    /// Attaches a backend flavour.
    #[inline]
    pub fn with_flavour(mut self, flavour: Flavour) -> Self {
        self.flavour = Some(flavour);
        self
    }

    /// Attaches a subject name.
    #[inline]
    pub fn with_subject(mut self, subject: impl Into<Arc<str>>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::now(EventKind::ServiceAdopted);
        let b = Event::now(EventKind::ServiceAdopted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delays_saturate() {
        let ev = Event::now(EventKind::GraceExceeded).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
