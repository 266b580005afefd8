//! Bounded mutual exclusion against the LVC reader (§4.13): a stuck admin
//! peer must not be able to stall readers forever, so the lock acquisition
//! itself carries a wall-clock timeout rather than blocking indefinitely.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Wraps a unit [`Mutex`] purely for its mutual-exclusion semantics; the
/// guarded value is irrelevant, only "is someone in the critical section"
/// matters.
pub struct BoundedLock {
    inner: Mutex<()>,
}

impl Default for BoundedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundedLock {
    pub fn new() -> Self {
        Self { inner: Mutex::new(()) }
    }

    /// Polls `try_lock` until it succeeds or `timeout` elapses. Returns
    /// `None` on timeout so a caller can treat a stuck peer as "busy" and
    /// move on instead of hanging.
    pub fn lock_bounded(&self, timeout: Duration) -> Option<MutexGuard<'_, ()>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Some(guard),
                Err(std::sync::TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(std::sync::TryLockError::WouldBlock) => {}
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquires_immediately_when_uncontended() {
        let lock = BoundedLock::new();
        assert!(lock.lock_bounded(Duration::from_millis(50)).is_some());
    }

    #[test]
    fn times_out_when_held_by_another_thread() {
        let lock = Arc::new(BoundedLock::new());
        let held = lock.clone();
        let guard = held.inner.lock().unwrap();
        let start = Instant::now();
        assert!(lock.lock_bounded(Duration::from_millis(40)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
        drop(guard);
    }

    #[test]
    fn succeeds_once_released_before_deadline() {
        let lock = Arc::new(BoundedLock::new());
        let held = lock.clone();
        let guard = held.inner.lock().unwrap();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(guard);
        });
        assert!(lock.lock_bounded(Duration::from_millis(200)).is_some());
        releaser.join().unwrap();
    }
}
