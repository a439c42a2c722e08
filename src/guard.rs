//! # Exclusive sections.
//!
//! [`Exclusive`] guards a section against being entered again before the
//! current holder leaves it. Contention is an error, never a wait: the second
//! caller gets [`RuntimeError::AlreadyAccepting`] immediately and the holder is
//! not disturbed.
//!
//! ```rust
//! use runvisor::guard::Exclusive;
//!
//! static ACCEPT: Exclusive = Exclusive::new("accept");
//!
//! let held = ACCEPT.enter().unwrap();
//! assert!(ACCEPT.enter().is_err());
//! drop(held);
//! assert!(ACCEPT.enter().is_ok());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::RuntimeError;

/// Flag that admits one holder at a time.
#[derive(Debug)]
pub struct Exclusive {
    section: &'static str,
    busy: AtomicBool,
}

impl Exclusive {
    /// Creates an unheld guard for the named section.
    pub const fn new(section: &'static str) -> Self {
        Self {
            section,
            busy: AtomicBool::new(false),
        }
    }

    /// Enters the section, or fails if it is already held.
    pub fn enter(&self) -> Result<ExclusiveGuard<'_>, RuntimeError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ExclusiveGuard { owner: self })
            .map_err(|_| RuntimeError::AlreadyAccepting {
                section: self.section,
            })
    }

    /// Returns true while someone holds the section.
    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases its [`Exclusive`] on drop.
#[must_use = "the section is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ExclusiveGuard<'a> {
    owner: &'a Exclusive,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.owner.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn contention_fails_fast() {
        let guard = Exclusive::new("reap");
        let held = guard.enter().unwrap();
        let err = guard.enter().unwrap_err();
        assert_eq!(err.to_string(), "exclusive call to reap violated");
        assert!(guard.is_held());
        drop(held);
        assert!(!guard.is_held());
    }

    #[test]
    fn only_one_thread_wins() {
        let guard = Arc::new(Exclusive::new("race"));
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let wins = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let (guard, barrier, wins) = (guard.clone(), barrier.clone(), wins.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    if let Ok(held) = guard.enter() {
                        wins.fetch_add(1, Ordering::SeqCst);
                        // hold until every contender had its try
                        std::thread::sleep(std::time::Duration::from_millis(200));
                        drop(held);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
