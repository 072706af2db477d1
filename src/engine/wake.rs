// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wake notification with an atomic fast-path.
//!
//! Two-tier notification: an atomic flag for the lock-free common case, and
//! a condvar fallback for a consumer that has gone to sleep.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wake notification with an atomic fast-path.
///
/// ```ignore
/// let notifier = Arc::new(WakeNotifier::new());
///
/// // Producer - lock-free.
/// queue.push(item);
/// notifier.notify();
///
/// // Consumer spin phase - lock-free.
/// if notifier.check_and_clear() {
///     // work available
/// }
///
/// // Consumer sleep phase.
/// notifier.wait_timeout(Duration::from_millis(10));
/// ```
#[derive(Debug)]
pub struct WakeNotifier {
    data_ready: AtomicBool,
    sleeping: Mutex<bool>,
    condvar: Condvar,
}

impl WakeNotifier {
    #[inline]
    pub fn new() -> Self {
        Self {
            data_ready: AtomicBool::new(false),
            sleeping: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Notify that data is available. Lock-free unless a waiter is sleeping.
    #[inline]
    pub fn notify(&self) {
        self.data_ready.store(true, Ordering::Release);

        // Racy but safe: worst case is one extra condvar signal.
        if *self.sleeping.lock() {
            self.condvar.notify_one();
        }
    }

    /// Check and clear the ready flag without ever taking the mutex.
    #[inline]
    pub fn check_and_clear(&self) -> bool {
        self.data_ready.swap(false, Ordering::Acquire)
    }

    /// Peek the ready flag without clearing it.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.data_ready.load(Ordering::Acquire)
    }

    /// Block until notified or `timeout` elapses.
    #[inline]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.data_ready.swap(false, Ordering::Acquire) {
            return true;
        }

        let mut sleeping = self.sleeping.lock();

        if self.data_ready.swap(false, Ordering::Acquire) {
            return true;
        }

        *sleeping = true;
        let result = self.condvar.wait_for(&mut sleeping, timeout);
        *sleeping = false;

        if self.data_ready.swap(false, Ordering::Acquire) {
            !result.timed_out()
        } else {
            false
        }
    }

    #[inline]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for WakeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn atomic_fast_path() {
        let notifier = WakeNotifier::new();

        assert!(!notifier.is_ready());
        notifier.notify();
        assert!(notifier.is_ready());
        assert!(notifier.check_and_clear());
        assert!(!notifier.is_ready());
    }

    #[test]
    fn notify_wakes_waiter() {
        let notifier = Arc::new(WakeNotifier::new());
        let n = Arc::clone(&notifier);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            n.notify();
        });

        let start = std::time::Instant::now();
        let woken = notifier.wait_timeout(Duration::from_millis(200));
        let elapsed = start.elapsed();

        assert!(woken, "should be woken by notify");
        assert!(elapsed < Duration::from_millis(150), "should wake promptly");

        handle.join().unwrap();
    }

    #[test]
    fn timeout_without_notify() {
        let notifier = WakeNotifier::new();

        let start = std::time::Instant::now();
        let woken = notifier.wait_timeout(Duration::from_millis(10));
        let elapsed = start.elapsed();

        assert!(!woken, "should time out without a notify");
        assert!(elapsed >= Duration::from_millis(9));
    }

    #[test]
    fn immediate_return_if_pending() {
        let notifier = WakeNotifier::new();
        notifier.notify();

        let start = std::time::Instant::now();
        let woken = notifier.wait_timeout(Duration::from_millis(200));
        let elapsed = start.elapsed();

        assert!(woken);
        assert!(elapsed < Duration::from_millis(20));
    }
}
