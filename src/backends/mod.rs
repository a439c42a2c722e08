//! # Execution backends.
//!
//! A backend executes the payloads of one [`Flavour`]. All three share the
//! [`Backend`] contract: accept payloads, run until closed, report at most one
//! [`Failure`](crate::Failure).
//!
//! ```text
//!                 ┌───────────────── coordinating runtime ─────────────────┐
//!  register ──►   │ NativeBackend   ── JoinSet on this runtime              │
//!  register ──►   │ IsolatedBackend ── mpsc ──► [thread: current_thread rt] │
//!  register ──►   │ ThreadBackend   ── std::thread per payload (detached)   │
//!                 │        ▲ failures (mpsc)                                │
//!                 └────────┴────────────────────────────────────────────────┘
//! ```
//!
//! - [`NativeBackend`] and [`IsolatedBackend`] group their payloads: closing
//!   cancels every payload and waits until each has actually stopped
//!   (aborting the ones that outlive [`Config::grace`](crate::Config::grace)).
//! - [`ThreadBackend`] never interrupts its threads; closing only stops
//!   accepting new payloads and stops listening for failures.

mod backend;
mod group;
mod isolated;
mod lifecycle;
mod native;
mod thread;

use std::sync::Arc;

pub use backend::{Backend, BackendState};
pub use isolated::IsolatedBackend;
pub use native::NativeBackend;
pub use thread::ThreadBackend;

use crate::config::Config;
use crate::events::Bus;
use crate::payloads::Flavour;

/// Creates the backend for `flavour`.
pub(crate) fn create(flavour: Flavour, cfg: &Config, bus: &Bus) -> Arc<dyn Backend> {
    match flavour {
        Flavour::Native => Arc::new(NativeBackend::new(cfg.grace, bus.clone())),
        Flavour::Isolated => Arc::new(IsolatedBackend::new(cfg.grace, bus.clone())),
        Flavour::Thread => Arc::new(ThreadBackend::new(bus.clone())),
    }
}
