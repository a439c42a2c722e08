//! # Long-lived services and the runner that adopts them.
//!
//! A service is an object with a `run` entry point ([`Service`] or
//! [`BlockingService`]). Registering it with a [`ServiceRegistry`] makes it
//! discoverable; the registry only keeps a weak reference, so dropping the
//! last `Arc` before it is adopted means it never starts.
//!
//! [`ServiceRunner::accept`] launches the [`Supervisor`](crate::Supervisor)
//! together with a reaper loop that hands every unstarted service to its
//! backend:
//!
//! ```text
//! accept() ─► prune ─► adopt pending ─► register reaper (isolated) ─► Supervisor::run()
//!
//! reaper: loop {
//!   adopt every live, unstarted unit ─► Supervisor::register_payload(run, flavour)
//!   sleep backoff.next(n) (first = accept_delay/10, doubling, capped at accept_delay)
//! }
//! ```

mod registry;
mod runner;
mod service;
mod unit;

pub use registry::ServiceRegistry;
pub use runner::{ServiceRunner, ServiceRunnerBuilder};
pub use service::{BlockingService, Service};
pub use unit::{ServiceHandle, UnitInfo};
