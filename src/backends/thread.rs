//! # Thread backend: blocking payloads on detached OS threads.
//!
//! Every fire-and-forget payload gets a fresh thread whose handle is dropped
//! right away, so it never delays process exit. The thread reports a failure
//! through an unbounded channel that [`ThreadBackend::run`](Backend::run)
//! listens on; the first failure ends the run.
//!
//! Closing stops admission and cancels the payload token. Threads are never
//! joined; whatever still runs is abandoned.
//!
//! [`Backend::run_payload`] calls the body directly on the caller's thread.

use std::panic::{self, AssertUnwindSafe};

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::lifecycle::Lifecycle;
use super::{Backend, BackendState};
use crate::error::{Failure, OrphanedReturn, RuntimeError};
use crate::events::Bus;
use crate::naming::panic_message;
use crate::payloads::{Body, Flavour, Payload, PayloadResult};

/// Blocking backend spawning one detached thread per payload.
pub struct ThreadBackend {
    life: Lifecycle,
    token: CancellationToken,
    failures: mpsc::UnboundedSender<Failure>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<Failure>>>,
}

impl ThreadBackend {
    /// Creates an idle backend.
    pub fn new(bus: Bus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            life: Lifecycle::new(Flavour::Thread, bus),
            token: CancellationToken::new(),
            failures: tx,
            failures_rx: Mutex::new(Some(rx)),
        }
    }

    /// Admits `payload` and returns its name and blocking body.
    fn unpack(
        &self,
        payload: Payload,
    ) -> Result<(String, Box<dyn FnOnce(CancellationToken) -> PayloadResult + Send>), RuntimeError>
    {
        self.life.admit(&payload)?;
        let incompatible = self.life.incompatible(&payload);
        let (name, body) = payload.into_parts();
        match body {
            Body::Blocking(f) => Ok((name.into_owned(), f)),
            Body::Cooperative(_) => Err(incompatible),
        }
    }
}

#[async_trait]
impl Backend for ThreadBackend {
    fn flavour(&self) -> Flavour {
        Flavour::Thread
    }

    fn state(&self) -> BackendState {
        self.life.state()
    }

    fn register_payload(&self, payload: Payload) -> Result<(), RuntimeError> {
        let (name, body) = self.unpack(payload)?;
        let failures = self.failures.clone();
        let token = self.token.clone();

        std::thread::Builder::new()
            .name(format!("runvisor:{name}"))
            .spawn(move || {
                let failure = match panic::catch_unwind(AssertUnwindSafe(|| body(token))) {
                    Ok(Ok(None)) => return,
                    Ok(Ok(Some(value))) => OrphanedReturn {
                        payload: name,
                        value,
                    }
                    .into(),
                    Ok(Err(error)) => Failure::Raised {
                        payload: name,
                        error,
                    },
                    Err(panic) => Failure::Panicked {
                        payload: name,
                        message: panic_message(panic.as_ref()),
                    },
                };
                let _ = failures.send(failure);
            })?;
        Ok(())
    }

    fn run_payload(&self, payload: Payload) -> PayloadResult {
        let (_, body) = self.unpack(payload)?;
        body(self.token.clone())
    }

    async fn run_payload_async(&self, payload: Payload) -> PayloadResult {
        let (name, body) = self.unpack(payload)?;
        let token = self.token.clone();
        tokio::task::spawn_blocking(move || body(token))
            .await
            .unwrap_or_else(|e| {
                Err(anyhow!(
                    "payload {name} panicked: {}",
                    panic_message(e.into_panic().as_ref())
                ))
            })
    }

    async fn ready(&self) {
        self.life.ready().await;
    }

    async fn run(&self) -> Result<(), Failure> {
        let claimed = self.failures_rx.lock().take();
        let Some(mut failures) = claimed else {
            return Ok(());
        };
        let life = &self.life;
        life.supervise(async {
            life.set(BackendState::Ready);
            life.set(BackendState::Running);
            let outcome = tokio::select! {
                biased;
                Some(failure) = failures.recv() => Err(failure),
                _ = life.closing().cancelled() => Ok(()),
            };
            life.closing().cancel();
            self.token.cancel();
            outcome
        })
        .await
    }

    async fn aclose(&self) {
        self.life.close().await;
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::Value;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn started() -> (Arc<ThreadBackend>, tokio::task::JoinHandle<Result<(), Failure>>) {
        let backend = Arc::new(ThreadBackend::new(Bus::new(16)));
        let runner = tokio::spawn({
            let backend = backend.clone();
            async move { backend.run().await }
        });
        (backend, runner)
    }

    #[tokio::test]
    async fn first_failure_wins_without_waiting_for_sleepers() {
        let (backend, runner) = started();
        backend.ready().await;

        let t0 = Instant::now();
        backend
            .register_payload(Payload::blocking("sleeper", |_ctx| {
                std::thread::sleep(Duration::from_secs(5));
                Ok(())
            }))
            .unwrap();
        backend
            .register_payload(Payload::blocking("lookup", |_ctx| {
                Err(anyhow!("no such key"))
            }))
            .unwrap();

        let failure = runner.await.unwrap().unwrap_err();
        assert_eq!(failure.payload(), Some("lookup"));
        assert!(t0.elapsed() < Duration::from_secs(4));
        assert!(backend.token.is_cancelled());
    }

    #[tokio::test]
    async fn orphaned_and_panicking_threads_are_failures() {
        let (backend, runner) = started();
        backend.ready().await;
        backend
            .register_payload(Payload::blocking_returning("count", |_ctx| {
                Ok(Some(Value::new(3)))
            }))
            .unwrap();
        let failure = runner.await.unwrap().unwrap_err();
        assert_eq!(failure.to_string(), "no caller to receive 3 from count");

        let (backend, runner) = started();
        backend.ready().await;
        backend
            .register_payload(Payload::blocking("boom", |_ctx| panic!("thread blew up")))
            .unwrap();
        let failure = runner.await.unwrap().unwrap_err();
        assert_eq!(failure.as_label(), "payload_panicked");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn calls_run_on_the_caller_and_relay_errors() {
        let (backend, runner) = started();
        backend.ready().await;

        let out = tokio::task::block_in_place(|| {
            let caller = std::thread::current().id();
            backend.run_payload(Payload::blocking_returning("here", move |_ctx| {
                Ok(Some(Value::new(std::thread::current().id() == caller)))
            }))
        })
        .unwrap()
        .unwrap();
        assert!(out.downcast::<bool>().unwrap());

        let err = backend
            .run_payload_async(Payload::blocking("bad", |_ctx| Err(anyhow!("bad request"))))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "bad request");

        let wrong = backend.register_payload(Payload::task("coop", |_ctx| async { Ok(()) }));
        assert!(matches!(
            wrong,
            Err(RuntimeError::IncompatiblePayload { .. })
        ));

        backend.aclose().await;
        assert!(runner.await.unwrap().is_ok());
        let late = backend.register_payload(Payload::blocking("late", |_ctx| Ok(())));
        assert!(matches!(late, Err(RuntimeError::BackendClosed { .. })));
    }
}
