//! Service traits.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Long-lived cooperative service, run by the native or isolated backend.
///
/// `ctx` is cancelled when the runtime shuts down; `run` should return soon
/// after. Returning at all, with `Ok` or `Err`, is treated like any other
/// fire-and-forget payload: an error terminates the runtime.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use runvisor::{Flavour, Service, ServiceRegistry};
///
/// struct Heartbeat;
///
/// #[async_trait]
/// impl Service for Heartbeat {
///     async fn run(&self, ctx: CancellationToken) -> anyhow::Result<()> {
///         while !ctx.is_cancelled() {
///             tokio::time::sleep(std::time::Duration::from_secs(1)).await;
///         }
///         Ok(())
///     }
/// }
///
/// let beat = Arc::new(Heartbeat);
/// ServiceRegistry::global().register(&beat, Flavour::Native)?;
/// # Ok::<(), runvisor::RuntimeError>(())
/// ```
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Service main loop.
    async fn run(&self, ctx: CancellationToken) -> anyhow::Result<()>;
}

/// Long-lived blocking service, run on its own thread by the thread backend.
///
/// The thread is never interrupted; poll `ctx` to notice shutdown.
pub trait BlockingService: Send + Sync + 'static {
    /// Service main loop.
    fn run(&self, ctx: CancellationToken) -> anyhow::Result<()>;
}
