use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Process-wide stop signal.
///
/// Every blocking sleep in the long-running components goes through
/// `sleep`, so a stop request wakes all of them immediately. Blocking
/// socket calls are unblocked separately via `shutdown` on the descriptor.
pub struct Shutdown {
    flag: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Shutdown {
    pub fn new() -> Shutdown {
        Shutdown {
            flag: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// True once a stop was requested.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Requests a stop and wakes all sleepers.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock().unwrap();
        self.cond.notify_all();
    }

    /// Sleeps for `timeout` unless a stop is requested.
    ///
    /// Returns false if the sleep was cut short by a stop request.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap();

        loop {
            if self.is_set() {
                return false;
            }

            let now = Instant::now();
            if now >= deadline {
                return true;
            }

            let (next, _) = self.cond.wait_timeout(guard, deadline - now).unwrap();
            guard = next;
        }
    }
}
