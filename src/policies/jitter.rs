//! # Jitter policy for scan delays.
//!
//! [`JitterPolicy`] randomizes a delay so that several runners started at the
//! same moment do not scan in lockstep.
//!
//! - [`JitterPolicy::None`]  exact delay
//! - [`JitterPolicy::Full`]  random delay in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + random[0, delay/2]`

use std::time::Duration;

use rand::Rng;

/// Randomization applied to a delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the delay as is.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl JitterPolicy {
    /// Applies this policy to `delay`.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return match self {
                JitterPolicy::None => delay,
                _ => Duration::ZERO,
            };
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rng.random_range(0..=ms - half))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_micros(1_234_567);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn equal_keeps_at_least_half() {
        for _ in 0..100 {
            let d = JitterPolicy::Equal.apply(Duration::from_millis(801));
            assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(801));
        }
    }

    #[test]
    fn sub_millisecond_delays_collapse_under_jitter() {
        assert_eq!(JitterPolicy::Full.apply(Duration::from_micros(10)), Duration::ZERO);
    }
}
