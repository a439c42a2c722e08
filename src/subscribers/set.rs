//! # SubscriberSet: event fan-out with one lane per subscriber.
//!
//! Every subscriber owns a bounded lane and a worker task draining it, so a
//! slow or panicking subscriber never holds up the supervisor or the other
//! subscribers.
//!
//! ```text
//!   emit(&Event) ──► Arc<Event> ──┬─► lane LogWriter ─► worker ─► on_event()
//!                                 ├─► lane Metrics   ─► worker ─► on_event()
//!                                 └─► lane ...       (full: dropped + counted)
//! ```
//!
//! - `emit` never waits. An event that finds a lane full is dropped for that
//!   lane only.
//! - Each lane is FIFO; there is no order across lanes.
//! - A panic in `on_event` is reported with the event that caused it and the
//!   worker carries on with the next event.
//! - `shutdown` closes the lanes, delivers what is queued and reports how many
//!   events each subscriber missed.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;

use crate::events::Event;
use crate::naming::panic_message;
use crate::payloads::Flavour;

use super::Subscribe;

struct Lane {
    subscriber: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

/// Fan-out over a fixed list of subscribers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: JoinSet<()>,
}

impl SubscriberSet {
    /// Opens one lane per subscriber and spawns its worker.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(subs: &[Arc<dyn Subscribe>]) -> Self {
        let mut workers = JoinSet::new();
        let lanes = subs
            .iter()
            .map(|sub| {
                let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
                workers.spawn(deliver(Arc::clone(sub), rx));
                Lane {
                    subscriber: sub.name(),
                    tx,
                    dropped: AtomicU64::new(0),
                }
            })
            .collect();
        Self { lanes, workers }
    }

    /// Queues `event` on every lane without waiting.
    pub fn emit(&self, event: &Event) {
        let shared = Arc::new(event.clone());
        for lane in &self.lanes {
            let Err(err) = lane.tx.try_send(Arc::clone(&shared)) else {
                continue;
            };
            let missed = lane.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let cause = match err {
                TrySendError::Full(_) => "lane full",
                TrySendError::Closed(_) => "worker gone",
            };
            // the first miss is loud, the rest only show up in the total
            if missed == 1 {
                tracing::warn!(
                    subscriber = lane.subscriber,
                    seq = event.seq,
                    kind = ?event.kind,
                    flavour = event.flavour.as_ref().map(Flavour::as_label),
                    cause,
                    "subscriber missed an event"
                );
            } else {
                tracing::debug!(subscriber = lane.subscriber, seq = event.seq, missed, cause);
            }
        }
    }

    /// Events dropped so far, summed over all lanes.
    pub fn dropped(&self) -> u64 {
        self.lanes
            .iter()
            .map(|lane| lane.dropped.load(Ordering::Relaxed))
            .sum()
    }

    /// Closes every lane and waits until the queued events are delivered.
    pub async fn shutdown(self) {
        let Self { lanes, mut workers } = self;
        let missed: Vec<_> = lanes
            .into_iter()
            .map(|lane| (lane.subscriber, lane.dropped.into_inner()))
            .filter(|(_, dropped)| *dropped > 0)
            .collect();

        while workers.join_next().await.is_some() {}
        for (subscriber, dropped) in missed {
            tracing::warn!(subscriber, dropped, "subscriber missed events during this run");
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

async fn deliver(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>) {
    let subscriber = sub.name();
    while let Some(event) = rx.recv().await {
        let handled = AssertUnwindSafe(sub.on_event(&event)).catch_unwind().await;
        if let Err(panic) = handled {
            tracing::error!(
                subscriber,
                seq = event.seq,
                kind = ?event.kind,
                flavour = event.flavour.as_ref().map(Flavour::as_label),
                subject = event.subject.as_deref(),
                panic = %panic_message(panic.as_ref()),
                "subscriber panicked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
        capacity: Option<usize>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.seen.lock().push(event.kind);
        }

        fn queue_capacity(&self) -> usize {
            self.capacity.unwrap_or(1024)
        }
    }

    struct Exploding;

    #[async_trait]
    impl Subscribe for Exploding {
        async fn on_event(&self, event: &Event) {
            if event.kind == EventKind::RuntimeStarting {
                panic!("boom");
            }
        }
    }

    #[tokio::test]
    async fn delivers_in_order_despite_a_panicking_neighbour() {
        let rec = Arc::new(Recorder::default());
        let subs: [Arc<dyn Subscribe>; 2] = [Arc::new(Exploding), rec.clone()];
        let set = SubscriberSet::new(&subs);
        assert_eq!(set.len(), 2);

        set.emit(&Event::now(EventKind::RuntimeStarting));
        set.emit(&Event::now(EventKind::RuntimeStopped));
        set.shutdown().await;

        assert_eq!(
            *rec.seen.lock(),
            vec![EventKind::RuntimeStarting, EventKind::RuntimeStopped]
        );
    }

    #[tokio::test]
    async fn full_lane_drops_and_counts() {
        let rec = Arc::new(Recorder {
            capacity: Some(1),
            ..Recorder::default()
        });
        let set = SubscriberSet::new(&[rec.clone() as Arc<dyn Subscribe>]);

        // single-threaded test runtime: the worker cannot drain between emits
        for _ in 0..5 {
            set.emit(&Event::now(EventKind::PayloadQueued).with_flavour(Flavour::Native));
        }
        assert_eq!(set.dropped(), 4);
        set.shutdown().await;
        assert_eq!(*rec.seen.lock(), vec![EventKind::PayloadQueued]);
    }

    #[tokio::test]
    async fn empty_set_is_a_noop() {
        let set = SubscriberSet::new(&[]);
        assert!(set.is_empty());
        set.emit(&Event::now(EventKind::ReaperStarted));
        assert_eq!(set.dropped(), 0);
        set.shutdown().await;
    }
}
