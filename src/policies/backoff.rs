//! # Backoff policy for periodic scans.
//!
//! [`BackoffPolicy`] stretches the interval between repeated scans. The delay
//! before scan `n` is `first × factor^n`, clamped to `max`, then jittered.
//! The base never depends on a previous jittered delay, so randomization
//! cannot make the interval drift.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use runvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(2), Duration::from_millis(400));
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Growing delay between repeated operations.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after the first operation.
    pub first: Duration,
    /// Ceiling of the delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` expected).
    pub factor: f64,
    /// Randomization applied to each delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Matches the reaper defaults: 100ms doubling up to 1s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given step (0-indexed).
    ///
    /// Non-finite or negative intermediate values clamp to `max`, so huge
    /// step counts are safe.
    pub fn next(&self, step: u32) -> Duration {
        let exp = step.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubling(first_ms: u64, max_ms: u64, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn grows_geometrically_until_the_ceiling() {
        let policy = doubling(100, 1_000, JitterPolicy::None);
        let delays: Vec<_> = (0..6).map(|n| policy.next(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn first_above_ceiling_is_clamped() {
        let policy = doubling(5_000, 1_000, JitterPolicy::None);
        assert_eq!(policy.next(0), Duration::from_secs(1));
    }

    #[test]
    fn zero_first_stays_zero() {
        let policy = doubling(0, 1_000, JitterPolicy::None);
        assert_eq!(policy.next(7), Duration::ZERO);
    }

    #[test]
    fn overflowing_steps_clamp_to_ceiling() {
        let policy = doubling(100, 10_000, JitterPolicy::None);
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_below_the_base() {
        let full = doubling(100, 1_000, JitterPolicy::Full);
        let equal = doubling(100, 1_000, JitterPolicy::Equal);
        for step in 0..20 {
            let base = doubling(100, 1_000, JitterPolicy::None).next(step);
            assert!(full.next(step) <= base);
            let d = equal.next(step);
            assert!(d >= base / 2 && d <= base, "step {step}: {d:?} vs {base:?}");
        }
    }
}
