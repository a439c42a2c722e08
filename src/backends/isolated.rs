//! # Isolated backend: payloads on a scheduler of their own.
//!
//! The backend owns an OS thread running a single-threaded tokio runtime.
//! Submissions cross into it through the group's unbounded channel, so
//! registering from a payload already running on that thread never waits.
//! A payload on the isolated thread must use
//! [`Backend::run_payload_async`] for calls, never the blocking variant.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::group::{PayloadGroup, drive};
use super::{Backend, BackendState};
use crate::error::{Failure, RuntimeError};
use crate::events::Bus;
use crate::payloads::{Flavour, Payload, PayloadResult};

/// Cooperative backend running its payloads on a dedicated thread.
pub struct IsolatedBackend {
    group: PayloadGroup,
}

impl IsolatedBackend {
    /// Creates an idle backend; cancelled payloads get `grace` to return.
    pub fn new(grace: Duration, bus: Bus) -> Self {
        Self {
            group: PayloadGroup::new(Flavour::Isolated, grace, bus),
        }
    }
}

#[async_trait]
impl Backend for IsolatedBackend {
    fn flavour(&self) -> Flavour {
        Flavour::Isolated
    }

    fn state(&self) -> BackendState {
        self.group.life().state()
    }

    fn register_payload(&self, payload: Payload) -> Result<(), RuntimeError> {
        self.group.register(payload)
    }

    fn run_payload(&self, payload: Payload) -> PayloadResult {
        self.group.run_payload(payload)
    }

    async fn run_payload_async(&self, payload: Payload) -> PayloadResult {
        self.group.run_payload_async(payload).await
    }

    async fn ready(&self) {
        self.group.life().ready().await;
    }

    async fn run(&self) -> Result<(), Failure> {
        let Some(rx) = self.group.take_receiver() else {
            return Ok(());
        };
        let life = self.group.life();
        life.supervise(async {
            let unavailable = |error| Failure::Unavailable {
                flavour: Flavour::Isolated,
                error,
            };
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(unavailable)?;

            let (done_tx, done_rx) = oneshot::channel();
            let main = drive(
                rx,
                life.closing().clone(),
                self.group.grace(),
                life.flavour(),
                life.bus().clone(),
            );
            std::thread::Builder::new()
                .name("runvisor-isolated".into())
                .spawn(move || {
                    let outcome = rt.block_on(main);
                    rt.shutdown_background();
                    let _ = done_tx.send(outcome);
                })
                .map_err(unavailable)?;

            life.set(BackendState::Ready);
            life.set(BackendState::Running);
            done_rx.await.unwrap_or_else(|_| {
                Err(Failure::Panicked {
                    payload: "isolated scheduler".into(),
                    message: "scheduler thread exited without a result".into(),
                })
            })
        })
        .await
    }

    async fn aclose(&self) {
        self.group.life().close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::Value;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread")]
    async fn payloads_run_off_the_calling_runtime() {
        let backend = Arc::new(IsolatedBackend::new(Duration::from_secs(1), Bus::new(16)));
        let runner = tokio::spawn({
            let backend = backend.clone();
            async move { backend.run().await }
        });
        backend.ready().await;

        let caller = std::thread::current().id();
        let name = backend
            .run_payload_async(Payload::returning("where", move |_ctx| async move {
                let here = std::thread::current();
                assert_ne!(here.id(), caller);
                Ok(Some(Value::new(here.name().map(str::to_owned))))
            }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            name.downcast::<Option<String>>().unwrap().as_deref(),
            Some("runvisor-isolated")
        );

        backend.aclose().await;
        assert!(runner.await.unwrap().is_ok());
    }

    #[test]
    fn blocking_calls_cross_the_thread_boundary() {
        let backend = Arc::new(IsolatedBackend::new(Duration::from_secs(1), Bus::new(16)));
        let rt = tokio::runtime::Runtime::new().unwrap();
        let runner = rt.spawn({
            let backend = backend.clone();
            async move { backend.run().await }
        });
        futures::executor::block_on(backend.ready());

        let out = backend
            .run_payload(Payload::returning("double", |_ctx| async {
                Ok(Some(Value::new(21 * 2)))
            }))
            .unwrap()
            .unwrap();
        assert_eq!(out.downcast::<i32>().unwrap(), 42);

        backend.stop();
        assert!(rt.block_on(runner).unwrap().is_ok());
    }
}
