//! Registry records binding a service to its flavour and start state.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::payloads::{Flavour, Payload};
use crate::services::{BlockingService, Service};

/// Stable identifier of a registered service. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceHandle(pub(crate) u64);

impl ServiceHandle {
    /// Numeric id of the handle.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service#{}", self.0)
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    /// Handle returned at registration.
    pub handle: ServiceHandle,
    /// Service type name.
    pub name: String,
    /// Backend the service runs on.
    pub flavour: Flavour,
    /// Whether the service was handed to its backend.
    pub started: bool,
    /// Whether the service object still exists.
    pub alive: bool,
}

pub(crate) enum Target {
    Cooperative(Weak<dyn Service>),
    Blocking(Weak<dyn BlockingService>),
}

pub(crate) struct ServiceUnit {
    pub(crate) handle: ServiceHandle,
    pub(crate) name: String,
    pub(crate) flavour: Flavour,
    pub(crate) started: bool,
    pub(crate) target: Target,
}

impl ServiceUnit {
    pub(crate) fn is_alive(&self) -> bool {
        match &self.target {
            Target::Cooperative(w) => w.strong_count() > 0,
            Target::Blocking(w) => w.strong_count() > 0,
        }
    }

    /// Payload calling the service's `run`, or `None` if the service is gone.
    ///
    /// The payload keeps the service alive until `run` returns.
    pub(crate) fn payload(&self) -> Option<Payload> {
        let name = self.name.clone();
        match &self.target {
            Target::Cooperative(w) => {
                let svc: Arc<dyn Service> = w.upgrade()?;
                Some(Payload::task(name, move |ctx| async move {
                    svc.run(ctx).await
                }))
            }
            Target::Blocking(w) => {
                let svc: Arc<dyn BlockingService> = w.upgrade()?;
                Some(Payload::blocking(name, move |ctx| svc.run(ctx)))
            }
        }
    }

    pub(crate) fn info(&self) -> UnitInfo {
        UnitInfo {
            handle: self.handle,
            name: self.name.clone(),
            flavour: self.flavour,
            started: self.started,
            alive: self.is_alive(),
        }
    }
}
