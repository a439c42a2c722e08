//! Shared lifecycle bookkeeping of the three backends.

use std::future::Future;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::BackendState;
use crate::error::{Failure, RuntimeError, error_chain};
use crate::events::{Bus, Event, EventKind};
use crate::payloads::{Flavour, Payload};

/// State cell, closing token and event reporting of one backend.
pub(crate) struct Lifecycle {
    flavour: Flavour,
    state: watch::Sender<BackendState>,
    closing: CancellationToken,
    bus: Bus,
}

impl Lifecycle {
    pub(crate) fn new(flavour: Flavour, bus: Bus) -> Self {
        let (state, _) = watch::channel(BackendState::Idle);
        Self {
            flavour,
            state,
            closing: CancellationToken::new(),
            bus,
        }
    }

    pub(crate) fn flavour(&self) -> Flavour {
        self.flavour
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Cancelled once the backend is asked to close.
    pub(crate) fn closing(&self) -> &CancellationToken {
        &self.closing
    }

    pub(crate) fn state(&self) -> BackendState {
        *self.state.borrow()
    }

    pub(crate) fn set(&self, state: BackendState) {
        self.state.send_replace(state);
    }

    /// Checks that `payload` may be submitted right now.
    pub(crate) fn admit(&self, payload: &Payload) -> Result<(), RuntimeError> {
        if !self.flavour.accepts(payload.kind()) {
            return Err(self.incompatible(payload));
        }
        if self.closing.is_cancelled() {
            return Err(self.closed(payload.name()));
        }
        match self.state() {
            BackendState::Ready | BackendState::Running => Ok(()),
            BackendState::Idle => Err(RuntimeError::NotRunning {
                flavour: self.flavour,
            }),
            BackendState::Stopped | BackendState::Failed => Err(self.closed(payload.name())),
        }
    }

    pub(crate) fn incompatible(&self, payload: &Payload) -> RuntimeError {
        RuntimeError::IncompatiblePayload {
            flavour: self.flavour,
            kind: payload.kind(),
            payload: payload.name().to_string(),
        }
    }

    pub(crate) fn closed(&self, payload: &str) -> RuntimeError {
        RuntimeError::BackendClosed {
            flavour: self.flavour,
            payload: payload.to_string(),
        }
    }

    pub(crate) async fn ready(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s != BackendState::Idle).await;
    }

    /// Cancels the closing token and, if a run is in progress, waits for it to end.
    pub(crate) async fn close(&self) {
        self.closing.cancel();
        if matches!(self.state(), BackendState::Ready | BackendState::Running) {
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(BackendState::is_terminal).await;
        }
    }

    /// Drives a backend main loop and records how it ended.
    ///
    /// If the returned future is dropped early, the backend is closed and
    /// marked `Stopped`.
    pub(crate) async fn supervise<F>(&self, main: F) -> Result<(), Failure>
    where
        F: Future<Output = Result<(), Failure>>,
    {
        let mut guard = RunGuard {
            life: self,
            armed: true,
        };
        self.bus
            .publish(Event::now(EventKind::BackendStarted).with_flavour(self.flavour));

        let res = main.await;
        guard.armed = false;

        match &res {
            Ok(()) => {
                self.set(BackendState::Stopped);
                self.bus
                    .publish(Event::now(EventKind::BackendStopped).with_flavour(self.flavour));
            }
            Err(failure) => {
                self.set(BackendState::Failed);
                self.bus.publish(
                    Event::now(EventKind::BackendAborted)
                        .with_flavour(self.flavour)
                        .with_reason(error_chain(failure)),
                );
            }
        }
        res
    }
}

struct RunGuard<'a> {
    life: &'a Lifecycle,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.life.closing.cancel();
            self.life.set(BackendState::Stopped);
            self.life.bus.publish(
                Event::now(EventKind::BackendCancelled).with_flavour(self.life.flavour),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn life() -> Lifecycle {
        Lifecycle::new(Flavour::Native, Bus::new(16))
    }

    #[test]
    fn admission_follows_the_state() {
        let life = life();
        let p = Payload::task("p", |_ctx| async { Ok(()) });
        assert!(matches!(life.admit(&p), Err(RuntimeError::NotRunning { .. })));
        life.set(BackendState::Ready);
        assert!(life.admit(&p).is_ok());
        life.closing().cancel();
        assert!(matches!(life.admit(&p), Err(RuntimeError::BackendClosed { .. })));

        let b = Payload::blocking("b", |_ctx| Ok(()));
        assert!(matches!(
            life.admit(&b),
            Err(RuntimeError::IncompatiblePayload { .. })
        ));
    }

    #[tokio::test]
    async fn close_on_idle_is_a_noop() {
        let life = life();
        tokio::time::timeout(Duration::from_secs(1), life.close())
            .await
            .unwrap();
        assert_eq!(life.state(), BackendState::Idle);
    }

    #[tokio::test]
    async fn dropped_run_is_recorded_as_stopped() {
        let life = life();
        let mut rx = life.bus().subscribe();
        {
            let run = life.supervise(std::future::pending());
            let _ = tokio::time::timeout(Duration::from_millis(10), run).await;
        }
        assert_eq!(life.state(), BackendState::Stopped);
        assert!(life.closing().is_cancelled());
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::BackendStarted);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::BackendCancelled);
    }

    #[tokio::test]
    async fn failures_are_published_with_their_chain() {
        let life = life();
        let mut rx = life.bus().subscribe();
        let res = life
            .supervise(async {
                Err(Failure::Panicked {
                    payload: "p".into(),
                    message: "boom".into(),
                })
            })
            .await;
        assert!(res.is_err());
        assert_eq!(life.state(), BackendState::Failed);
        let _started = rx.recv().await.unwrap();
        let aborted = rx.recv().await.unwrap();
        assert_eq!(aborted.kind, EventKind::BackendAborted);
        assert_eq!(aborted.reason.as_deref(), Some("p panicked: boom"));
    }
}
