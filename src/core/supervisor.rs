//! # Supervisor: the runtime facade over all backends.
//!
//! The [`Supervisor`] owns the event bus, the subscriber fan-out and, while a
//! launch is in progress, one [`Backend`] per [`Flavour`]. Payloads are routed
//! by flavour; payloads submitted while no backend exists are buffered and
//! dispatched exactly once when the next launch has made every backend ready.
//!
//! ## Launch
//! ```text
//! launch():
//!   start fan-out (Bus ─► SubscriberSet)
//!   create backends ──► spawn run() of each ──► await every ready()
//!   flush pre-start queue (under the slot lock, while publishing the backends)
//!   select! {
//!     stop requested         ─► Ok(())
//!     OS signal (optional)   ─► Ok(())
//!     caller's shutdown      ─► Ok(())
//!     first backend run ends ─► Err(Terminated { flavour, failure }) | Ok(())
//!   }
//!   aclose() every backend ──► await every run() ──► back to buffering
//! ```
//!
//! ## Rules
//! - At most one launch at a time; a concurrent one fails with
//!   [`RuntimeError::AlreadyAccepting`].
//! - `stop()` only concerns the launch in progress. Requested while nothing
//!   runs it does nothing, so a late `stop()` never ends the next launch.
//! - Closing backends is idempotent; `stop()` never blocks when nothing runs.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use runvisor::{Config, Flavour, LogWriter, Payload, Supervisor};
//!
//! let sup = Supervisor::new(Config::default(), vec![Arc::new(LogWriter::new())]);
//! sup.register_payload(
//!     Payload::blocking("poll", |ctx| {
//!         while !ctx.is_cancelled() {
//!             std::thread::sleep(std::time::Duration::from_secs(1));
//!         }
//!         Ok(())
//!     }),
//!     Flavour::Thread,
//! )?;
//! sup.run()?; // until Ctrl-C or a payload failure
//! # Ok::<(), runvisor::RuntimeError>(())
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::backends::{self, Backend};
use crate::config::Config;
use crate::core::shutdown;
use crate::error::{Failure, RuntimeError, error_chain};
use crate::events::{Bus, Event, EventKind};
use crate::guard::Exclusive;
use crate::naming::panic_message;
use crate::payloads::{Flavour, Payload, PayloadResult};
use crate::subscribers::{Subscribe, SubscriberSet};

type BackendMap = HashMap<Flavour, Arc<dyn Backend>>;

/// Backends of the current launch, or the payloads waiting for one.
#[derive(Default)]
struct Slots {
    backends: Option<BackendMap>,
    pending: Vec<(Flavour, Payload)>,
}

/// Owns the backends and drives them as one group.
pub struct Supervisor {
    cfg: Config,
    bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    slots: Mutex<Slots>,
    stop: Mutex<CancellationToken>,
    running: watch::Sender<bool>,
    launching: Exclusive,
    /// Subscribed at construction so events published before launch are kept.
    listener: Mutex<Option<broadcast::Receiver<Event>>>,
}

/// Forwarding task between the bus and the subscriber set.
struct Fanout {
    stop: CancellationToken,
    task: JoinHandle<broadcast::Receiver<Event>>,
}

impl Supervisor {
    /// Creates an idle supervisor with the given config and subscribers.
    pub fn new(cfg: Config, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let listener = bus.subscribe();
        let (running, _) = watch::channel(false);
        Self {
            cfg,
            bus,
            subscribers,
            slots: Mutex::new(Slots::default()),
            stop: Mutex::new(CancellationToken::new()),
            running,
            launching: Exclusive::new("Supervisor::launch"),
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Event bus shared by the backends.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// True while a launch is in progress.
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Backend of `flavour` in the current launch.
    fn backend(&self, flavour: Flavour) -> Option<Arc<dyn Backend>> {
        self.slots
            .lock()
            .backends
            .as_ref()
            .and_then(|map| map.get(&flavour).cloned())
    }

    /// Submits a fire-and-forget payload to the `flavour` backend.
    ///
    /// Buffered if no launch is in progress. Never blocks.
    pub fn register_payload(&self, payload: Payload, flavour: Flavour) -> Result<(), RuntimeError> {
        if !flavour.accepts(payload.kind()) {
            return Err(RuntimeError::IncompatiblePayload {
                flavour,
                kind: payload.kind(),
                payload: payload.name().to_string(),
            });
        }

        let backend = {
            let mut slots = self.slots.lock();
            match slots.backends.as_ref() {
                Some(map) => map.get(&flavour).cloned(),
                None => {
                    self.bus.publish(
                        Event::now(EventKind::PayloadQueued)
                            .with_flavour(flavour)
                            .with_subject(payload.name()),
                    );
                    slots.pending.push((flavour, payload));
                    return Ok(());
                }
            }
        };
        match backend {
            Some(backend) => backend.register_payload(payload),
            None => Err(RuntimeError::NotRunning { flavour }),
        }
    }

    /// Runs `payload` on the `flavour` backend and blocks until it completes.
    ///
    /// Fails with [`RuntimeError::NotRunning`] outside a launch. Cooperative
    /// flavours refuse callers that drive a tokio runtime with
    /// [`RuntimeError::BlockingInAsync`].
    pub fn run_payload(&self, payload: Payload, flavour: Flavour) -> PayloadResult {
        match self.backend(flavour) {
            Some(backend) => backend.run_payload(payload),
            None => Err(RuntimeError::NotRunning { flavour }.into()),
        }
    }

    /// Awaitable variant of [`Supervisor::run_payload`].
    pub async fn run_payload_async(&self, payload: Payload, flavour: Flavour) -> PayloadResult {
        match self.backend(flavour) {
            Some(backend) => backend.run_payload_async(payload).await,
            None => Err(RuntimeError::NotRunning { flavour }.into()),
        }
    }

    /// Blocks the calling thread running every backend on a fresh runtime.
    ///
    /// Returns `Ok` after a stop request or a termination signal, and
    /// [`RuntimeError::Terminated`] after a backend failure.
    pub fn run(&self) -> Result<(), RuntimeError> {
        self.run_until(std::future::pending())
    }

    /// [`Supervisor::run`] that also stops gracefully once `shutdown`
    /// completes with a reason.
    pub(crate) fn run_until<F>(&self, shutdown: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = &'static str>,
    {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(n) = self.cfg.worker_threads() {
            builder.worker_threads(n);
        }
        let rt = builder.enable_all().thread_name("runvisor-worker").build()?;
        let res = rt.block_on(self.launch_until(shutdown));
        // Abandoned thread payloads must not delay the return.
        rt.shutdown_background();
        res
    }

    /// Runs every backend on the current tokio runtime until stopped or failed.
    pub async fn launch(&self) -> Result<(), RuntimeError> {
        self.launch_until(std::future::pending()).await
    }

    /// [`Supervisor::launch`] that also stops gracefully once `shutdown`
    /// completes with a reason.
    pub(crate) async fn launch_until<F>(&self, shutdown: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = &'static str>,
    {
        let _exclusive = self.launching.enter()?;
        let stop = {
            let stop = self.stop.lock();
            self.running.send_replace(true);
            stop.clone()
        };
        let reset = LaunchReset { sup: self };

        let fanout = self.start_fanout();
        let res = self.drive(&stop, shutdown).await;
        self.stop_fanout(fanout).await;

        drop(reset);
        res
    }

    /// Asks the current launch to stop. Never blocks.
    ///
    /// Does nothing while no launch is in progress.
    pub fn request_stop(&self) {
        let stop = self.stop.lock();
        if *self.running.borrow() {
            stop.cancel();
        }
    }

    /// Requests a stop and waits until no launch is in progress.
    pub async fn stopped(&self) {
        self.request_stop();
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Blocking [`Supervisor::stopped`]. Idempotent.
    pub fn stop(&self) {
        futures::executor::block_on(self.stopped());
    }

    async fn drive<F>(&self, stop: &CancellationToken, shutdown: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = &'static str>,
    {
        self.bus.publish(Event::now(EventKind::RuntimeStarting));

        let backends: Vec<Arc<dyn Backend>> = Flavour::ALL
            .iter()
            .map(|flavour| backends::create(*flavour, &self.cfg, &self.bus))
            .collect();

        let mut runs: JoinSet<(Flavour, Result<(), Failure>)> = JoinSet::new();
        for backend in &backends {
            let backend = Arc::clone(backend);
            runs.spawn(async move {
                let flavour = backend.flavour();
                let res = AssertUnwindSafe(backend.run())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(Failure::Panicked {
                            payload: format!("{flavour} backend"),
                            message: panic_message(panic.as_ref()),
                        })
                    });
                (flavour, res)
            });
        }
        for backend in &backends {
            backend.ready().await;
        }
        self.flush(&backends);
        self.bus.publish(Event::now(EventKind::RuntimeReady));

        let outcome = tokio::select! {
            _ = stop.cancelled() => {
                self.bus.publish(
                    Event::now(EventKind::ShutdownRequested).with_reason("stop requested"),
                );
                Ok(())
            }
            signal = shutdown::signalled(self.cfg.handle_signals) => {
                self.bus.publish(Event::now(EventKind::ShutdownRequested).with_reason(signal));
                Ok(())
            }
            reason = shutdown => {
                self.bus.publish(Event::now(EventKind::ShutdownRequested).with_reason(reason));
                Ok(())
            }
            joined = runs.join_next() => first_exit(joined),
        };

        futures::future::join_all(backends.iter().map(|b| b.aclose())).await;
        while runs.join_next().await.is_some() {}
        self.slots.lock().backends = None;

        if let Err(err) = &outcome {
            let mut ev = Event::now(EventKind::RuntimeTerminated).with_reason(error_chain(err));
            if let RuntimeError::Terminated { flavour, .. } = err {
                ev = ev.with_flavour(*flavour);
            }
            self.bus.publish(ev);
        }
        self.bus.publish(Event::now(EventKind::RuntimeStopped));
        outcome
    }

    /// Dispatches the pre-start queue once and publishes the backends.
    fn flush(&self, backends: &[Arc<dyn Backend>]) {
        let map: BackendMap = backends
            .iter()
            .map(|b| (b.flavour(), Arc::clone(b)))
            .collect();

        let mut slots = self.slots.lock();
        for (flavour, payload) in std::mem::take(&mut slots.pending) {
            let name = payload.name().to_string();
            let res = match map.get(&flavour) {
                Some(backend) => backend.register_payload(payload),
                None => Err(RuntimeError::NotRunning { flavour }),
            };
            if let Err(err) = res {
                self.bus.publish(
                    Event::now(EventKind::PayloadDiscarded)
                        .with_flavour(flavour)
                        .with_subject(name)
                        .with_reason(err.to_string()),
                );
            }
        }
        slots.backends = Some(map);
    }

    fn start_fanout(&self) -> Fanout {
        let rx = self.listener.lock().take();
        let mut rx = rx.unwrap_or_else(|| self.bus.subscribe());
        let set = SubscriberSet::new(&self.subscribers);
        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let stop = stop.clone();
            async move {
                loop {
                    tokio::select! {
                        biased;
                        ev = rx.recv() => match ev {
                            Ok(ev) => set.emit(&ev),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped, "event listener lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                        _ = stop.cancelled() => {
                            loop {
                                match rx.try_recv() {
                                    Ok(ev) => set.emit(&ev),
                                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                                    Err(_) => break,
                                }
                            }
                            break;
                        }
                    }
                }
                set.shutdown().await;
                rx
            }
        });
        Fanout { stop, task }
    }

    async fn stop_fanout(&self, fanout: Fanout) {
        fanout.stop.cancel();
        if let Ok(rx) = fanout.task.await {
            *self.listener.lock() = Some(rx);
        }
    }
}

/// Maps the first finished backend run to the launch outcome.
fn first_exit(
    joined: Option<Result<(Flavour, Result<(), Failure>), JoinError>>,
) -> Result<(), RuntimeError> {
    match joined {
        Some(Ok((flavour, Err(failure)))) => Err(RuntimeError::Terminated { flavour, failure }),
        _ => Ok(()),
    }
}

/// Returns the supervisor to buffering when a launch ends, even if dropped.
struct LaunchReset<'a> {
    sup: &'a Supervisor,
}

impl Drop for LaunchReset<'_> {
    fn drop(&mut self) {
        self.sup.slots.lock().backends = None;
        let mut stop = self.sup.stop.lock();
        *stop = CancellationToken::new();
        self.sup.running.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use crate::payloads::Value;

    fn quiet() -> Config {
        Config::default()
            .with_signals(false)
            .with_grace(Duration::from_millis(200))
    }

    fn wait_until(deadline: Duration, cond: impl Fn() -> bool) -> bool {
        let t0 = Instant::now();
        while t0.elapsed() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn spawn_run(sup: &Arc<Supervisor>) -> std::thread::JoinHandle<Result<(), RuntimeError>> {
        let sup = Arc::clone(sup);
        std::thread::spawn(move || sup.run())
    }

    #[test]
    fn queued_payloads_run_exactly_once() {
        let sup = Arc::new(Supervisor::new(quiet(), vec![]));
        let hits = Arc::new(AtomicUsize::new(0));

        for flavour in [Flavour::Native, Flavour::Isolated] {
            let hits = hits.clone();
            sup.register_payload(
                Payload::task("count", move |_ctx| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                flavour,
            )
            .unwrap();
        }
        let h = hits.clone();
        sup.register_payload(
            Payload::blocking("count", move |_ctx| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Flavour::Thread,
        )
        .unwrap();

        let runner = spawn_run(&sup);
        assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 3));
        sup.stop();
        assert!(runner.join().unwrap().is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!sup.is_running());
    }

    #[derive(Debug, thiserror::Error)]
    #[error("no such resource: {0}")]
    struct LookupError(&'static str);

    #[test]
    fn failing_payload_terminates_with_its_cause() {
        let sup = Supervisor::new(quiet(), vec![]);
        sup.register_payload(
            Payload::task("pool", |_ctx| async {
                Err(anyhow::Error::from(LookupError("cpu")))
            }),
            Flavour::Isolated,
        )
        .unwrap();

        let err = sup.run().unwrap_err();
        let RuntimeError::Terminated { flavour, failure } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(*flavour, Flavour::Isolated);
        assert_eq!(failure.payload(), Some("pool"));
        let cause = failure.raised().unwrap().downcast_ref::<LookupError>();
        assert_eq!(cause.map(|e| e.0), Some("cpu"));
    }

    #[test]
    fn orphaned_return_terminates() {
        let sup = Supervisor::new(quiet(), vec![]);
        sup.register_payload(
            Payload::returning("ctl", |_ctx| async { Ok(Some(Value::new("demand"))) }),
            Flavour::Native,
        )
        .unwrap();

        let err = sup.run().unwrap_err();
        let orphan = err.failure().and_then(Failure::orphaned).unwrap();
        assert_eq!(orphan.payload, "ctl");
        assert_eq!(orphan.value.repr(), "\"demand\"");
    }

    #[test]
    fn slow_threads_do_not_delay_a_failure() {
        let sup = Supervisor::new(quiet(), vec![]);
        sup.register_payload(
            Payload::blocking("sleeper", |_ctx| {
                std::thread::sleep(Duration::from_secs(5));
                Ok(())
            }),
            Flavour::Thread,
        )
        .unwrap();
        sup.register_payload(
            Payload::blocking("lookup", |_ctx| Err(LookupError("gpu").into())),
            Flavour::Thread,
        )
        .unwrap();

        let t0 = Instant::now();
        let err = sup.run().unwrap_err();
        assert!(t0.elapsed() < Duration::from_secs(4));
        let cause = err.failure().and_then(Failure::raised).unwrap();
        assert!(cause.downcast_ref::<LookupError>().is_some());
    }

    #[test]
    fn stop_while_idle_does_not_end_the_next_launch() {
        let sup = Arc::new(Supervisor::new(quiet(), vec![]));
        sup.stop();
        sup.request_stop();

        let runner = spawn_run(&sup);
        assert!(wait_until(Duration::from_secs(5), || sup.backend(Flavour::Thread).is_some()));
        std::thread::sleep(Duration::from_millis(200));
        assert!(!runner.is_finished());

        sup.stop();
        sup.stop();
        assert!(runner.join().unwrap().is_ok());
        assert!(!sup.is_running());
    }

    #[test]
    fn blocking_calls_need_a_launch() {
        let sup = Arc::new(Supervisor::new(quiet(), vec![]));
        let err = sup
            .run_payload(Payload::blocking("early", |_ctx| Ok(())), Flavour::Thread)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::NotRunning { .. })
        ));

        let runner = spawn_run(&sup);
        assert!(wait_until(Duration::from_secs(5), || sup.backend(Flavour::Native).is_some()));

        let out = sup
            .run_payload(
                Payload::returning("sum", |_ctx| async { Ok(Some(Value::new(2 + 3))) }),
                Flavour::Native,
            )
            .unwrap()
            .unwrap();
        assert_eq!(out.downcast::<i32>().unwrap(), 5);

        let err = sup
            .run_payload(
                Payload::blocking("reject", |_ctx| Err(anyhow!("invalid demand"))),
                Flavour::Thread,
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid demand");

        // a failed call leaves the runtime running
        assert!(sup.is_running());
        sup.stop();
        assert!(runner.join().unwrap().is_ok());
    }

    #[test]
    fn wrong_kind_is_rejected_before_buffering() {
        let sup = Supervisor::new(quiet(), vec![]);
        let err = sup
            .register_payload(Payload::blocking("b", |_ctx| Ok(())), Flavour::Native)
            .unwrap_err();
        assert_eq!(err.as_label(), "runtime_incompatible_payload");
        assert!(sup.slots.lock().pending.is_empty());
    }

    #[test]
    fn supervisor_can_be_launched_again() {
        let sup = Arc::new(Supervisor::new(quiet(), vec![]));
        let first = spawn_run(&sup);
        assert!(wait_until(Duration::from_secs(5), || sup.is_running()));
        sup.stop();
        assert!(first.join().unwrap().is_ok());
        sup.stop();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        sup.register_payload(
            Payload::task("second", move |_ctx| async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Flavour::Native,
        )
        .unwrap();
        let runner = spawn_run(&sup);
        assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 1));
        sup.stop();
        assert!(runner.join().unwrap().is_ok());
    }

    #[derive(Default)]
    struct Kinds(Mutex<Vec<Event>>);

    impl Kinds {
        fn kinds(&self) -> Vec<EventKind> {
            self.0.lock().iter().map(|ev| ev.kind).collect()
        }
    }

    #[async_trait]
    impl Subscribe for Kinds {
        async fn on_event(&self, event: &Event) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    fn subscribers_see_the_whole_lifecycle() {
        let kinds = Arc::new(Kinds::default());
        let sup = Supervisor::new(quiet(), vec![kinds.clone() as Arc<dyn Subscribe>]);
        let early = Payload::task("early", |_ctx| async { Ok(()) });
        sup.register_payload(early, Flavour::Native).unwrap();
        sup.run_until(async { "done" }).unwrap();

        let seen = kinds.kinds();
        assert_eq!(seen.first(), Some(&EventKind::PayloadQueued));
        assert!(seen.contains(&EventKind::RuntimeReady));
        assert!(seen.contains(&EventKind::ShutdownRequested));
        assert_eq!(
            seen.iter().filter(|k| **k == EventKind::BackendStopped).count(),
            3
        );
        assert_eq!(seen.last(), Some(&EventKind::RuntimeStopped));
    }

    #[test]
    fn termination_signal_drains_every_backend() {
        let kinds = Arc::new(Kinds::default());
        let sup = Arc::new(Supervisor::new(
            quiet(),
            vec![kinds.clone() as Arc<dyn Subscribe>],
        ));
        let drained = Arc::new(AtomicUsize::new(0));
        for flavour in [Flavour::Native, Flavour::Isolated] {
            let drained = drained.clone();
            sup.register_payload(
                Payload::task("listener", move |ctx| async move {
                    ctx.cancelled().await;
                    drained.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                flavour,
            )
            .unwrap();
        }
        let d = drained.clone();
        sup.register_payload(
            Payload::blocking("poller", move |ctx| {
                while !ctx.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            Flavour::Thread,
        )
        .unwrap();

        let (signal, received) = tokio::sync::oneshot::channel::<()>();
        let runner = {
            let sup = Arc::clone(&sup);
            std::thread::spawn(move || {
                sup.run_until(async move {
                    let _ = received.await;
                    "SIGTERM"
                })
            })
        };
        assert!(wait_until(Duration::from_secs(5), || sup.backend(Flavour::Thread).is_some()));
        signal.send(()).unwrap();

        assert!(runner.join().unwrap().is_ok());
        assert!(!sup.is_running());
        // cooperative payloads finished inside aclose(); the thread one on its own
        assert!(drained.load(Ordering::SeqCst) >= 2);
        assert!(wait_until(Duration::from_secs(2), || drained.load(Ordering::SeqCst) == 3));

        let events = kinds.0.lock().clone();
        let requested = events
            .iter()
            .find(|ev| ev.kind == EventKind::ShutdownRequested)
            .unwrap();
        assert_eq!(requested.reason.as_deref(), Some("SIGTERM"));
        let mut stopped: Vec<_> = events
            .iter()
            .filter(|ev| ev.kind == EventKind::BackendStopped)
            .filter_map(|ev| ev.flavour)
            .collect();
        stopped.sort();
        assert_eq!(stopped, Flavour::ALL.to_vec());
        assert!(!events.iter().any(|ev| ev.kind == EventKind::RuntimeTerminated));
        assert!(!events.iter().any(|ev| ev.kind == EventKind::GraceExceeded));
    }
}
