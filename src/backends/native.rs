//! # Native backend: payloads as tasks of the coordinating runtime.

use std::time::Duration;

use async_trait::async_trait;

use super::group::{PayloadGroup, drive};
use super::{Backend, BackendState};
use crate::error::{Failure, RuntimeError};
use crate::events::Bus;
use crate::payloads::{Flavour, Payload, PayloadResult};

/// Cooperative backend that runs its payloads on the runtime driving [`Backend::run`].
pub struct NativeBackend {
    group: PayloadGroup,
}

impl NativeBackend {
    /// Creates an idle backend; cancelled payloads get `grace` to return.
    pub fn new(grace: Duration, bus: Bus) -> Self {
        Self {
            group: PayloadGroup::new(Flavour::Native, grace, bus),
        }
    }
}

#[async_trait]
impl Backend for NativeBackend {
    fn flavour(&self) -> Flavour {
        Flavour::Native
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
            life.set(BackendState::Ready);
            life.set(BackendState::Running);
            drive(
                rx,
                life.closing().clone(),
                self.group.grace(),
                life.flavour(),
                life.bus().clone(),
            )
            .await
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
    use std::sync::Arc;

    #[tokio::test]
    async fn raised_error_ends_the_run() {
        let backend = Arc::new(NativeBackend::new(Duration::from_secs(1), Bus::new(16)));
        let runner = tokio::spawn({
            let backend = backend.clone();
            async move { backend.run().await }
        });
        backend.ready().await;

        backend
            .register_payload(Payload::task("fail", |_ctx| async {
                Err(anyhow::anyhow!("lost contact"))
            }))
            .unwrap();

        let failure = runner.await.unwrap().unwrap_err();
        assert_eq!(failure.raised().unwrap().to_string(), "lost contact");
        assert_eq!(backend.state(), BackendState::Failed);

        let late = backend.register_payload(Payload::task("late", |_ctx| async { Ok(()) }));
        assert!(matches!(late, Err(RuntimeError::BackendClosed { .. })));
    }

    #[tokio::test]
    async fn aclose_is_idempotent() {
        let backend = Arc::new(NativeBackend::new(Duration::from_secs(1), Bus::new(16)));
        let runner = tokio::spawn({
            let backend = backend.clone();
            async move { backend.run().await }
        });
        backend.ready().await;

        backend.aclose().await;
        backend.aclose().await;
        assert!(runner.await.unwrap().is_ok());
        assert_eq!(backend.state(), BackendState::Stopped);
    }

    #[test]
    fn blocking_call_before_run_is_refused() {
        let backend = NativeBackend::new(Duration::from_secs(1), Bus::new(16));
        let err = backend
            .run_payload(Payload::task("early", |_ctx| async { Ok(()) }))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RuntimeError>(),
            Some(RuntimeError::NotRunning { flavour: Flavour::Native })
        ));
    }
}
