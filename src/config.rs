//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the supervisor and the service
//! runner.
//!
//! ## Sentinel values
//! - `worker_threads = 0` → tokio's default worker count
//! - `grace = 0s` → cooperative payloads are aborted as soon as their backend closes

use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// Global configuration for the runvisor runtime.
///
/// ## Field semantics
/// - `grace`: how long a closing cooperative backend waits for cancelled payloads
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `accept_delay`: ceiling of the reaper's scan interval
/// - `reaper_jitter`: randomization applied to the reaper's scan interval
/// - `worker_threads`: worker threads of the coordinating runtime
/// - `handle_signals`: treat SIGINT/SIGTERM/SIGQUIT as a graceful shutdown
#[derive(Clone, Debug)]
pub struct Config {
    /// Time granted to cancelled cooperative payloads before they are aborted.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages
    /// skip older items.
    pub bus_capacity: usize,

    /// Maximum delay between two reaper scans.
    ///
    /// The reaper starts with `accept_delay / 10` and doubles up to this value.
    pub accept_delay: Duration,

    /// Jitter applied to reaper delays.
    pub reaper_jitter: JitterPolicy,

    /// Worker threads of the coordinating runtime (`0` = tokio default).
    pub worker_threads: usize,

    /// Whether OS termination signals stop the runtime gracefully.
    pub handle_signals: bool,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the worker thread count as an `Option`.
    ///
    /// - `None` → let tokio decide
    /// - `Some(n)` → exactly `n` workers
    #[inline]
    pub fn worker_threads(&self) -> Option<usize> {
        if self.worker_threads == 0 {
            None
        } else {
            Some(self.worker_threads)
        }
    }

    /// Backoff used by the reaper between scans.
    pub fn reaper_backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            first: self.accept_delay / 10,
            max: self.accept_delay,
            factor: 2.0,
            jitter: self.reaper_jitter,
        }
    }

    /// Returns a config with the given reaper ceiling.
    pub fn with_accept_delay(mut self, accept_delay: Duration) -> Self {
        self.accept_delay = accept_delay;
        self
    }

    /// Returns a config with the given shutdown grace.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Returns a config with signal handling switched on or off.
    pub fn with_signals(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 5s`
    /// - `bus_capacity = 1024`
    /// - `accept_delay = 1s`
    /// - `reaper_jitter = JitterPolicy::None`
    /// - `worker_threads = 0` (tokio default)
    /// - `handle_signals = true`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            bus_capacity: 1024,
            accept_delay: Duration::from_secs(1),
            reaper_jitter: JitterPolicy::None,
            worker_threads: 0,
            handle_signals: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaper_backoff_tracks_accept_delay() {
        let cfg = Config::default().with_accept_delay(Duration::from_millis(500));
        let backoff = cfg.reaper_backoff();
        assert_eq!(backoff.first, Duration::from_millis(50));
        assert_eq!(backoff.max, Duration::from_millis(500));
        assert_eq!(backoff.next(0), Duration::from_millis(50));
        assert_eq!(backoff.next(1), Duration::from_millis(100));
        assert_eq!(backoff.next(9), Duration::from_millis(500));
    }

    #[test]
    fn sentinels_map_to_none() {
        let mut cfg = Config::default();
        assert_eq!(cfg.worker_threads(), None);
        cfg.worker_threads = 2;
        assert_eq!(cfg.worker_threads(), Some(2));
        cfg.bus_capacity = 0;
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
