//! # Backend selection.
//!
//! Exactly one backend exists per [`Flavour`] inside a
//! [`Supervisor`](crate::Supervisor). Cooperative flavours accept async
//! payloads, the thread flavour accepts blocking ones.

use std::fmt;

/// Identifier selecting which backend executes a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flavour {
    /// Tasks on the coordinating runtime itself.
    Native,
    /// Tasks on a dedicated thread that owns a separate single-threaded runtime.
    Isolated,
    /// Blocking routines, each on its own detached OS thread.
    Thread,
}

impl Flavour {
    /// All flavours, in backend start order.
    pub const ALL: [Flavour; 3] = [Flavour::Native, Flavour::Isolated, Flavour::Thread];

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Flavour::Native => "native",
            Flavour::Isolated => "isolated",
            Flavour::Thread => "thread",
        }
    }

    /// Kind of payload this flavour executes.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Flavour::Native | Flavour::Isolated => PayloadKind::Cooperative,
            Flavour::Thread => PayloadKind::Blocking,
        }
    }

    /// Returns true if payloads of `kind` can run under this flavour.
    #[inline]
    pub fn accepts(&self, kind: PayloadKind) -> bool {
        self.kind() == kind
    }
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Execution model of a payload body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Async body, suspends at `.await` points.
    Cooperative,
    /// Plain function, suspends only in OS-level blocking calls.
    Blocking,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Cooperative => f.write_str("cooperative"),
            PayloadKind::Blocking => f.write_str("blocking"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooperative_flavours_reject_blocking_payloads() {
        assert!(Flavour::Native.accepts(PayloadKind::Cooperative));
        assert!(Flavour::Isolated.accepts(PayloadKind::Cooperative));
        assert!(!Flavour::Native.accepts(PayloadKind::Blocking));
        assert!(Flavour::Thread.accepts(PayloadKind::Blocking));
        assert!(!Flavour::Thread.accepts(PayloadKind::Cooperative));
    }

    #[test]
    fn labels_are_distinct() {
        let labels: std::collections::HashSet<_> =
            Flavour::ALL.iter().map(Flavour::as_label).collect();
        assert_eq!(labels.len(), Flavour::ALL.len());
        assert_eq!(Flavour::Isolated.to_string(), "isolated");
    }
}
