//! # Service registry.
//!
//! [`ServiceRegistry`] records which services exist and on which flavour they
//! run. It never owns a service: entries hold a [`Weak`] reference, and a
//! service whose last `Arc` is gone is skipped and eventually pruned.
//!
//! ## Rules
//! - Handles are allocated from a counter and never reused.
//! - A unit is marked started exactly once, when its `run` was handed to the
//!   supervisor successfully.
//! - Only one [`ServiceRunner`](crate::ServiceRunner) may accept on a registry
//!   at a time; the exclusive guard lives here.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;

use super::unit::{ServiceUnit, Target};
use super::{BlockingService, Service, ServiceHandle, UnitInfo};
use crate::core::Supervisor;
use crate::error::RuntimeError;
use crate::events::{Event, EventKind};
use crate::guard::{Exclusive, ExclusiveGuard};
use crate::naming::pretty_type;
use crate::payloads::{Flavour, PayloadKind};

static GLOBAL: LazyLock<Arc<ServiceRegistry>> = LazyLock::new(|| Arc::new(ServiceRegistry::new()));

/// Set of registered services, keyed by [`ServiceHandle`].
pub struct ServiceRegistry {
    units: Mutex<BTreeMap<ServiceHandle, ServiceUnit>>,
    next_id: AtomicU64,
    accepting: Exclusive,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// Creates an empty, private registry.
    pub fn new() -> Self {
        Self {
            units: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            accepting: Exclusive::new("ServiceRunner::accept"),
        }
    }

    /// Process-wide registry used by [`ServiceRunner::new`](crate::ServiceRunner::new).
    pub fn global() -> Arc<ServiceRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Registers a cooperative service to run under `flavour`.
    ///
    /// # Errors
    /// [`RuntimeError::IncompatiblePayload`] if `flavour` runs blocking payloads.
    pub fn register<S: Service>(
        &self,
        service: &Arc<S>,
        flavour: Flavour,
    ) -> Result<ServiceHandle, RuntimeError> {
        let weak = Arc::downgrade(service) as Weak<dyn Service>;
        self.insert(
            pretty_type::<S>(),
            flavour,
            PayloadKind::Cooperative,
            Target::Cooperative(weak),
        )
    }

    /// Registers a blocking service; `flavour` must be [`Flavour::Thread`].
    pub fn register_blocking<S: BlockingService>(
        &self,
        service: &Arc<S>,
        flavour: Flavour,
    ) -> Result<ServiceHandle, RuntimeError> {
        let weak = Arc::downgrade(service) as Weak<dyn BlockingService>;
        self.insert(
            pretty_type::<S>(),
            flavour,
            PayloadKind::Blocking,
            Target::Blocking(weak),
        )
    }

    fn insert(
        &self,
        name: String,
        flavour: Flavour,
        kind: PayloadKind,
        target: Target,
    ) -> Result<ServiceHandle, RuntimeError> {
        if !flavour.accepts(kind) {
            return Err(RuntimeError::IncompatiblePayload {
                flavour,
                kind,
                payload: name,
            });
        }
        let handle = ServiceHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.units.lock().insert(
            handle,
            ServiceUnit {
                handle,
                name,
                flavour,
                started: false,
                target,
            },
        );
        Ok(handle)
    }

    /// Removes a unit. Returns false if the handle is unknown.
    ///
    /// A service that was already started keeps running.
    pub fn deregister(&self, handle: ServiceHandle) -> bool {
        self.units.lock().remove(&handle).is_some()
    }

    /// Drops units whose service no longer exists; returns how many.
    pub fn prune(&self) -> usize {
        let mut units = self.units.lock();
        let before = units.len();
        units.retain(|_, unit| unit.is_alive());
        before - units.len()
    }

    /// True if the unit behind `handle` was handed to its backend.
    pub fn is_started(&self, handle: ServiceHandle) -> bool {
        self.units
            .lock()
            .get(&handle)
            .is_some_and(|unit| unit.started)
    }

    /// Number of units, including dead ones not pruned yet.
    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    /// True if no unit is registered.
    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }

    /// Snapshot of every unit, ordered by handle.
    pub fn units(&self) -> Vec<UnitInfo> {
        self.units.lock().values().map(ServiceUnit::info).collect()
    }

    pub(crate) fn accepting(&self) -> Result<ExclusiveGuard<'_>, RuntimeError> {
        self.accepting.enter()
    }

    /// Drops dead units, then hands every live, unstarted unit to `sup`.
    ///
    /// Returns how many units were adopted.
    pub(crate) fn adopt_pending(&self, sup: &Supervisor) -> usize {
        let mut adopted = 0;
        let mut units = self.units.lock();
        units.retain(|_, unit| unit.is_alive());
        for unit in units.values_mut().filter(|unit| !unit.started) {
            let Some(payload) = unit.payload() else {
                continue;
            };
            match sup.register_payload(payload, unit.flavour) {
                Ok(()) => {
                    unit.started = true;
                    adopted += 1;
                    sup.bus().publish(
                        Event::now(EventKind::ServiceAdopted)
                            .with_flavour(unit.flavour)
                            .with_subject(unit.name.as_str()),
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        service = %unit.name,
                        handle = %unit.handle,
                        %error,
                        "service not adopted"
                    );
                }
            }
        }
        adopted
    }
}
