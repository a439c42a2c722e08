//! # runvisor
//!
//! **Runvisor** runs heterogeneous long-lived control loops as one unit: async
//! payloads on the coordinating tokio runtime or on an isolated runtime
//! thread, and blocking payloads on plain OS threads. They start together,
//! fail together and shut down together.
//!
//! ## Architecture
//! ```text
//!   Service (registered)        Payload / Call (ad hoc)
//!          │                            │
//!          ▼                            ▼
//! ┌─────────────────┐   reaper   ┌──────────────────────────────────────────┐
//! │ ServiceRegistry │ ─────────► │ ServiceRunner (accept / execute / adopt) │
//! │  (Weak units)   │            └────────────────────┬─────────────────────┘
//! └─────────────────┘                                 ▼
//!                 ┌───────────────────────────────────────────────────────────┐
//!                 │ Supervisor: pre-start queue, one backend per Flavour,     │
//!                 │ first failure closes every backend                        │
//!                 └───────┬───────────────────┬───────────────────┬───────────┘
//!                         ▼                   ▼                   ▼
//!                  NativeBackend      IsolatedBackend        ThreadBackend
//!                  (JoinSet here)   (thread + own runtime)  (detached threads)
//!                         │                   │                   │
//!                         └────── publish(Event) ──► Bus ──► SubscriberSet ──► LogWriter
//! ```
//!
//! ## Failure propagation
//! A fire-and-forget payload that errors, panics or returns a value ends its
//! backend's run with a [`Failure`]. The supervisor then closes every backend
//! and [`ServiceRunner::accept`] returns [`RuntimeError::Terminated`], whose
//! source chain leads to the payload's own error.
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                          |
//! |-------------------|----------------------------------------------------------|---------------------------------------------|
//! | **Payloads**      | Fire-and-forget work and typed blocking calls.           | [`Payload`], [`Call`], [`Flavour`]          |
//! | **Backends**      | Execution engines behind one contract.                   | [`Backend`], [`BackendState`]               |
//! | **Supervision**   | Start, fail and stop all backends as a group.            | [`Supervisor`]                              |
//! | **Services**      | Long-lived objects adopted once the runtime runs.        | [`Service`], [`ServiceRegistry`], [`ServiceRunner`] |
//! | **Subscriber API**| Hook into lifecycle events.                              | [`Subscribe`], [`LogWriter`]                |
//! | **Errors**        | Typed runtime errors with the payload error as source.   | [`RuntimeError`], [`Failure`]               |
//! | **Configuration** | Centralize runtime settings.                             | [`Config`]                                  |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//! use runvisor::{Config, Flavour, Service, ServiceRunner};
//!
//! struct Balancer;
//!
//! #[async_trait]
//! impl Service for Balancer {
//!     async fn run(&self, ctx: CancellationToken) -> anyhow::Result<()> {
//!         while !ctx.is_cancelled() {
//!             // observe the pool, adjust its demand
//!             tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     runvisor::logging::init_logging(None)?;
//!     let runner = ServiceRunner::new(Config::default());
//!
//!     let balancer = Arc::new(Balancer);
//!     runner.registry().register(&balancer, Flavour::Native)?;
//!
//!     runner.accept()?; // until Ctrl-C or the first failure
//!     Ok(())
//! }
//! ```
mod backends;
mod config;
mod core;
mod error;
mod events;
pub mod guard;
pub mod logging;
pub mod naming;
mod payloads;
mod policies;
mod services;
mod subscribers;

// ---- Public re-exports ----

pub use backends::{Backend, BackendState, IsolatedBackend, NativeBackend, ThreadBackend};
pub use config::Config;
pub use crate::core::Supervisor;
pub use error::{Failure, OrphanedReturn, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use payloads::{Call, Flavour, Payload, PayloadKind, PayloadResult, Value};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use services::{
    BlockingService, Service, ServiceHandle, ServiceRegistry, ServiceRunner, ServiceRunnerBuilder,
    UnitInfo,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
