//! Delay policies.
//!
//! The reaper of [`ServiceRunner`](crate::ServiceRunner) rescans the service
//! registry with a growing interval so that scanning becomes cheap once the
//! set of services stabilizes.
//!
//! ## Contents
//! - [`BackoffPolicy`] how scan delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization applied to each delay
//!
//! ## Quick wiring
//! ```text
//! Config { accept_delay, reaper_jitter }
//!      └─► Config::reaper_backoff() ─► BackoffPolicy { first: accept_delay/10, factor: 2, max: accept_delay }
//!           └─► reaper: sleep(backoff.next(n)) after the n-th scan of this accept
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
