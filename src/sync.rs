//! Binary semaphore used for connect-result and cycle-start signaling.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A binary semaphore: at most one pending give, regardless of how many
/// times it is given before being taken.
pub(crate) struct Semaphore {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Semaphore {
    pub(crate) fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Signals the semaphore. Collapses with any give not yet taken.
    pub(crate) fn give(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        *signaled = true;
        self.condvar.notify_one();
    }

    /// Blocks until the semaphore is given.
    pub(crate) fn take(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            signaled = self.condvar.wait(signaled).unwrap();
        }
        *signaled = false;
    }

    /// Blocks up to `timeout_ms`; returns whether the semaphore was taken.
    pub(crate) fn take_timeout(&self, timeout_ms: u32) -> bool {
        let deadline = Duration::from_millis(u64::from(timeout_ms));
        let signaled = self.signaled.lock().unwrap();
        let (mut guard, result) = self
            .condvar
            .wait_timeout_while(signaled, deadline, |signaled| !*signaled)
            .unwrap();
        if result.timed_out() && !*guard {
            return false;
        }
        *guard = false;
        true
    }

    /// Consumes a pending give without blocking. Used to drain a stale start
    /// signal before re-arming.
    pub(crate) fn try_take(&self) -> bool {
        let mut signaled = self.signaled.lock().unwrap();
        let was_signaled = *signaled;
        *signaled = false;
        was_signaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gives_collapse() {
        let sem = Semaphore::new();
        sem.give();
        sem.give();
        assert!(sem.try_take());
        assert!(!sem.try_take());
    }

    #[test]
    fn timed_take_expires() {
        let sem = Semaphore::new();
        assert!(!sem.take_timeout(10));
        sem.give();
        assert!(sem.take_timeout(10));
    }
}
