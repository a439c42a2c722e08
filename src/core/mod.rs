//! Runtime core: the supervisor and its shutdown sources.
//!
//! - [`supervisor`]: owns one backend per flavour, buffers early payloads and
//!   tears every backend down as soon as one fails;
//! - [`shutdown`]: cross-platform termination signal handling.

mod shutdown;
mod supervisor;

pub use supervisor::Supervisor;
