//! # ServiceRunner: the daemon entry point.
//!
//! [`ServiceRunner`] ties a [`Supervisor`] to a [`ServiceRegistry`]:
//! [`accept`](ServiceRunner::accept) blocks running the runtime and a reaper
//! loop that adopts services as they get registered, and
//! [`shutdown`](ServiceRunner::shutdown) stops both.
//!
//! ## Shutdown
//! ```text
//! shutdown():
//!   cancel reaper token ─► wait until the reaper acknowledged
//!     ─► cancel launch token ─► wait until accept() returned
//! ```
//! Both tokens belong to one `accept()`. A shutdown while no `accept()` is in
//! progress does nothing, so a late call can never end the next one.
//!
//! ## Example
//! ```no_run
//! use runvisor::{Call, Config, Flavour, ServiceRunner};
//!
//! let runner = ServiceRunner::new(Config::default());
//! let worker = runner.clone();
//! std::thread::spawn(move || {
//!     let total = worker.execute(Call::blocking("sum", |_ctx| Ok(1 + 2)), Flavour::Thread);
//!     println!("{total:?}");
//!     worker.shutdown();
//! });
//! runner.accept()?;
//! # Ok::<(), runvisor::RuntimeError>(())
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::ServiceRegistry;
use crate::config::Config;
use crate::core::Supervisor;
use crate::error::RuntimeError;
use crate::events::{Event, EventKind};
use crate::guard::ExclusiveGuard;
use crate::payloads::{Call, Flavour, Payload};
use crate::policies::BackoffPolicy;
use crate::subscribers::{LogWriter, Subscribe};

/// Runs the supervisor and adopts registered services.
///
/// Cheap to clone; clones share the same runtime.
#[derive(Clone)]
pub struct ServiceRunner {
    inner: Arc<Inner>,
}

struct Inner {
    supervisor: Supervisor,
    registry: Arc<ServiceRegistry>,
    backoff: BackoffPolicy,
    latch: Mutex<ShutdownLatch>,
    accepting: watch::Sender<bool>,
    reaper_running: watch::Sender<bool>,
}

/// Stop tokens of the `accept()` in progress, if any.
#[derive(Default)]
struct ShutdownLatch {
    armed: bool,
    reaper: CancellationToken,
    launch: CancellationToken,
}

/// Builder for [`ServiceRunner`].
pub struct ServiceRunnerBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    registry: Option<Arc<ServiceRegistry>>,
}

impl ServiceRunnerBuilder {
    /// Replaces the subscribers (default: one [`LogWriter`]).
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Uses `registry` instead of [`ServiceRegistry::global`].
    pub fn with_registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds the runner.
    pub fn build(self) -> ServiceRunner {
        let (reaper_running, _) = watch::channel(false);
        let (accepting, _) = watch::channel(false);
        ServiceRunner {
            inner: Arc::new(Inner {
                backoff: self.cfg.reaper_backoff(),
                supervisor: Supervisor::new(self.cfg, self.subscribers),
                registry: self.registry.unwrap_or_else(ServiceRegistry::global),
                latch: Mutex::new(ShutdownLatch::default()),
                accepting,
                reaper_running,
            }),
        }
    }
}

impl ServiceRunner {
    /// Runner over the global registry, logging through [`LogWriter`].
    pub fn new(cfg: Config) -> Self {
        Self::builder(cfg).build()
    }

    /// Starts building a runner.
    pub fn builder(cfg: Config) -> ServiceRunnerBuilder {
        ServiceRunnerBuilder {
            cfg,
            subscribers: vec![Arc::new(LogWriter::new())],
            registry: None,
        }
    }

    /// Registry this runner adopts services from.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.inner.registry
    }

    /// The underlying supervisor.
    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    /// Runs the daemon, blocking the calling thread until it stops.
    ///
    /// # Errors
    /// - [`RuntimeError::AlreadyAccepting`] immediately, if another `accept()`
    ///   runs on the same registry (the running one is not disturbed)
    /// - [`RuntimeError::Terminated`] when a backend failed; its source chain
    ///   leads to the payload's own error
    pub fn accept(&self) -> Result<(), RuntimeError> {
        let accepting = self.inner.registry.accepting()?;
        let (reaper, launch) = self.inner.arm();
        let _armed = Disarm {
            inner: &self.inner,
            accepting: Some(accepting),
        };

        let pruned = self.inner.registry.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "dropped services that no longer exist");
        }
        self.inner.registry.adopt_pending(&self.inner.supervisor);

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.supervisor.register_payload(
            Payload::task("service-reaper", move |ctx| async move {
                if let Some(inner) = inner.upgrade() {
                    inner.reap(ctx, reaper).await;
                }
                Ok(())
            }),
            Flavour::Isolated,
        )?;

        self.inner.supervisor.run_until(async move {
            launch.cancelled().await;
            "shutdown requested"
        })
    }

    /// Stops the reaper, then the supervisor; blocks until both are down.
    ///
    /// Idempotent, and a no-op while no `accept()` is in progress. Must not
    /// be called from a payload; use [`ServiceRunner::request_shutdown`] there.
    pub fn shutdown(&self) {
        let launch = {
            let latch = self.inner.latch.lock();
            if !latch.armed {
                return;
            }
            latch.reaper.cancel();
            latch.launch.clone()
        };
        futures::executor::block_on(async {
            let mut reaper = self.inner.reaper_running.subscribe();
            let _ = reaper.wait_for(|running| !*running).await;
            launch.cancel();
            let mut accepting = self.inner.accepting.subscribe();
            let _ = accepting.wait_for(|armed| !*armed).await;
        });
    }

    /// Asks the running `accept()` to return, without waiting.
    pub fn request_shutdown(&self) {
        let latch = self.inner.latch.lock();
        if latch.armed {
            latch.reaper.cancel();
            latch.launch.cancel();
        }
    }

    /// True while the reaper loop is alive.
    pub fn is_running(&self) -> bool {
        *self.inner.reaper_running.borrow()
    }

    /// Runs `call` on the `flavour` backend, blocking until it returns.
    ///
    /// The call's own error is returned unchanged. From within an async
    /// context use [`ServiceRunner::execute_async`]; cooperative flavours
    /// refuse a blocking call there with [`RuntimeError::BlockingInAsync`].
    pub fn execute<T: Send + Sync + 'static>(
        &self,
        call: Call<T>,
        flavour: Flavour,
    ) -> anyhow::Result<T> {
        let out = self
            .inner
            .supervisor
            .run_payload(call.into_payload(), flavour)?;
        Call::finish(out)
    }

    /// Awaitable variant of [`ServiceRunner::execute`].
    pub async fn execute_async<T: Send + Sync + 'static>(
        &self,
        call: Call<T>,
        flavour: Flavour,
    ) -> anyhow::Result<T> {
        let out = self
            .inner
            .supervisor
            .run_payload_async(call.into_payload(), flavour)
            .await?;
        Call::finish(out)
    }

    /// Submits a fire-and-forget payload (buffered until `accept()` runs).
    pub fn adopt(&self, payload: Payload, flavour: Flavour) -> Result<(), RuntimeError> {
        self.inner.supervisor.register_payload(payload, flavour)
    }
}

impl Inner {
    /// Hands out fresh stop tokens for an `accept()` that is starting.
    fn arm(&self) -> (CancellationToken, CancellationToken) {
        let mut latch = self.latch.lock();
        *latch = ShutdownLatch {
            armed: true,
            ..ShutdownLatch::default()
        };
        self.accepting.send_replace(true);
        (latch.reaper.clone(), latch.launch.clone())
    }

    /// Adopts new services until shutdown, backing off between scans.
    async fn reap(&self, ctx: CancellationToken, stop: CancellationToken) {
        self.reaper_running.send_replace(true);
        let _running = ReaperFlag {
            flag: &self.reaper_running,
        };
        let bus = self.supervisor.bus();
        bus.publish(Event::now(EventKind::ReaperStarted).with_delay(self.backoff.max));

        let mut step = 0u32;
        while !stop.is_cancelled() {
            self.registry.adopt_pending(&self.supervisor);
            let delay = self.backoff.next(step);
            step = step.saturating_add(1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.cancelled() => break,
                _ = ctx.cancelled() => break,
            }
        }
        bus.publish(Event::now(EventKind::ReaperStopped));
    }
}

/// Clears the reaper flag however the reaper ends.
struct ReaperFlag<'a> {
    flag: &'a watch::Sender<bool>,
}

impl Drop for ReaperFlag<'_> {
    fn drop(&mut self) {
        self.flag.send_replace(false);
    }
}

/// Marks the `accept()` as over, so later shutdowns are no-ops.
///
/// The registry is released first: once a waiting `shutdown()` returns, the
/// next `accept()` can enter.
struct Disarm<'a> {
    inner: &'a Inner,
    accepting: Option<ExclusiveGuard<'a>>,
}

impl Drop for Disarm<'_> {
    fn drop(&mut self) {
        drop(self.accepting.take());
        let mut latch = self.inner.latch.lock();
        latch.armed = false;
        self.inner.accepting.send_replace(false);
    }
}
