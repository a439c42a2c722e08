//! Runtime events: types and broadcast bus.
//!
//! Every lifecycle transition of the runtime is published as an [`Event`] on
//! the [`Bus`]. The supervisor forwards the bus to its
//! [`SubscriberSet`](crate::SubscriberSet), which is where logging happens.
//!
//! ## Quick reference
//! - **Publishers**: backends (start/stop/abort), payload groups (grace),
//!   `Supervisor` (runtime start/stop, queued payloads), `ServiceRegistry`
//!   (adoptions), the reaper.
//! - **Consumer**: the supervisor's fan-out listener.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
