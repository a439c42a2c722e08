//! # Payload group of the cooperative backends.
//!
//! Every payload submitted to a cooperative backend becomes one task in a
//! [`JoinSet`], wrapped by a monitor that turns its outcome into either a reply
//! (blocking calls) or a possible [`Failure`] (fire-and-forget payloads).
//!
//! ```text
//! submit ──► mpsc ──► drive() ──spawn──► monitor(payload)
//!                        │                   ├─ call:   reply.send(result)
//!                        │                   └─ detach: Err/Some/panic ─► Failure
//!                        └─ closing or first Failure ─► settle():
//!                              cancel token ─► wait grace ─► abort + wait
//! ```

use std::borrow::Cow;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use anyhow::anyhow;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::lifecycle::Lifecycle;
use crate::error::{Failure, OrphanedReturn, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::naming::panic_message;
use crate::payloads::{Body, CooperativeBody, Flavour, Payload, PayloadResult};

/// One payload on its way to the group.
pub(crate) struct Submission {
    name: Cow<'static, str>,
    body: CooperativeBody,
    reply: Option<oneshot::Sender<PayloadResult>>,
}

/// Submission side of a cooperative backend plus its lifecycle.
pub(crate) struct PayloadGroup {
    life: Lifecycle,
    grace: Duration,
    tx: mpsc::UnboundedSender<Submission>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Submission>>>,
}

impl PayloadGroup {
    pub(crate) fn new(flavour: Flavour, grace: Duration, bus: Bus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            life: Lifecycle::new(flavour, bus),
            grace,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn life(&self) -> &Lifecycle {
        &self.life
    }

    pub(crate) fn grace(&self) -> Duration {
        self.grace
    }

    /// Hands out the receiving end; `None` once a run has claimed it.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Submission>> {
        self.rx.lock().take()
    }

    fn submit(
        &self,
        payload: Payload,
        reply: Option<oneshot::Sender<PayloadResult>>,
    ) -> Result<(), RuntimeError> {
        self.life.admit(&payload)?;
        let incompatible = self.life.incompatible(&payload);
        let (name, body) = payload.into_parts();
        let Body::Cooperative(body) = body else {
            return Err(incompatible);
        };
        self.tx
            .send(Submission { name, body, reply })
            .map_err(|rejected| self.life.closed(&rejected.0.name))
    }

    pub(crate) fn register(&self, payload: Payload) -> Result<(), RuntimeError> {
        self.submit(payload, None)
    }

    fn call(
        &self,
        payload: Payload,
    ) -> Result<(String, oneshot::Receiver<PayloadResult>), RuntimeError> {
        let name = payload.name().to_string();
        let (tx, rx) = oneshot::channel();
        self.submit(payload, Some(tx))?;
        Ok((name, rx))
    }

    pub(crate) fn run_payload(&self, payload: Payload) -> PayloadResult {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(RuntimeError::BlockingInAsync {
                flavour: self.life.flavour(),
                payload: payload.name().to_string(),
            }
            .into());
        }
        let (name, rx) = self.call(payload)?;
        rx.blocking_recv()
            .unwrap_or_else(|_| Err(self.life.closed(&name).into()))
    }

    pub(crate) async fn run_payload_async(&self, payload: Payload) -> PayloadResult {
        let (name, rx) = self.call(payload)?;
        rx.await.unwrap_or_else(|_| Err(self.life.closed(&name).into()))
    }
}

/// Runs submissions until `closing` fires or a payload fails, then settles.
pub(crate) async fn drive(
    mut rx: mpsc::UnboundedReceiver<Submission>,
    closing: CancellationToken,
    grace: Duration,
    flavour: Flavour,
    bus: Bus,
) -> Result<(), Failure> {
    let payload_token = CancellationToken::new();
    let mut tasks: JoinSet<Option<Failure>> = JoinSet::new();

    let outcome = loop {
        tokio::select! {
            biased;
            _ = closing.cancelled() => break Ok(()),
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                Ok(None) => {}
                Ok(Some(failure)) => break Err(failure),
                Err(e) if e.is_cancelled() => {}
                Err(e) => break Err(Failure::Panicked {
                    payload: format!("{flavour} monitor"),
                    message: panic_message(e.into_panic().as_ref()),
                }),
            },
            sub = rx.recv() => match sub {
                Some(sub) => monitor(&mut tasks, sub, payload_token.clone()),
                None => break Ok(()),
            },
        }
    };

    // Pending calls see their reply sender dropped.
    drop(rx);
    settle(&mut tasks, &payload_token, grace, flavour, &bus).await;
    outcome
}

fn monitor(tasks: &mut JoinSet<Option<Failure>>, sub: Submission, token: CancellationToken) {
    let Submission { name, body, reply } = sub;
    tasks.spawn(async move {
        let outcome = AssertUnwindSafe(async move { body(token).await })
            .catch_unwind()
            .await;

        if let Some(reply) = reply {
            let res = outcome.unwrap_or_else(|panic| {
                Err(anyhow!(
                    "payload {name} panicked: {}",
                    panic_message(panic.as_ref())
                ))
            });
            let _ = reply.send(res);
            return None;
        }

        let payload = name.into_owned();
        match outcome {
            Ok(Ok(None)) => None,
            Ok(Ok(Some(value))) => Some(OrphanedReturn { payload, value }.into()),
            Ok(Err(error)) => Some(Failure::Raised { payload, error }),
            Err(panic) => Some(Failure::Panicked {
                payload,
                message: panic_message(panic.as_ref()),
            }),
        }
    });
}

/// Cancels every payload, waits up to `grace`, then aborts the rest.
///
/// Returns only once every task has stopped.
async fn settle(
    tasks: &mut JoinSet<Option<Failure>>,
    token: &CancellationToken,
    grace: Duration,
    flavour: Flavour,
    bus: &Bus,
) {
    token.cancel();
    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        bus.publish(
            Event::now(EventKind::GraceExceeded)
                .with_flavour(flavour)
                .with_delay(grace),
        );
        tasks.shutdown().await;
    }
}
