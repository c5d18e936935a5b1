//! Shutdown signal shared by the maintenance loops.
//!
//! Loops sleep on a condition variable so `shutdown()` wakes them
//! immediately instead of waiting out a full period. The condition
//! variable follows the same `parking_lot` switch as the lock wrappers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[cfg(feature = "parking_lot")]
use parking_lot::{Condvar, Mutex};

#[cfg(not(feature = "parking_lot"))]
use std::sync::{Condvar, Mutex, PoisonError};

/// Cooperative stop flag with a timed, interruptible wait.
#[derive(Debug)]
pub struct ShutdownSignal {
    active: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl ShutdownSignal {
    /// Create a signal in the active state.
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    /// Whether loops should keep running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Clear the active flag and wake every sleeper.
    pub fn trigger(&self) {
        #[cfg(feature = "parking_lot")]
        let _guard = self.lock.lock();
        #[cfg(not(feature = "parking_lot"))]
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.active.store(false, Ordering::Release);
        self.wake.notify_all();
    }

    /// Sleep for `period` or until triggered.
    ///
    /// Returns `true` if the caller should run another cycle.
    #[cfg(feature = "parking_lot")]
    pub fn wait(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut guard = self.lock.lock();
        loop {
            if !self.is_active() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            self.wake.wait_for(&mut guard, deadline - now);
        }
    }

    /// Sleep for `period` or until triggered.
    ///
    /// Returns `true` if the caller should run another cycle.
    #[cfg(not(feature = "parking_lot"))]
    pub fn wait(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if !self.is_active() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            guard = match self.wake.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_elapses_while_active() {
        let signal = ShutdownSignal::new();
        assert!(signal.wait(Duration::from_millis(5)));
    }

    #[test]
    fn test_trigger_wakes_sleeper() {
        let signal = Arc::new(ShutdownSignal::new());
        let sleeper = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait(Duration::from_secs(60)))
        };
        thread::sleep(Duration::from_millis(10));
        let started = Instant::now();
        signal.trigger();
        assert!(!sleeper.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!signal.is_active());
    }

    #[test]
    fn test_wait_after_trigger_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let started = Instant::now();
        assert!(!signal.wait(Duration::from_secs(60)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
