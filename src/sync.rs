//! Cross-thread signalling primitives for the engine worker.
//!
//! Three primitives connect the controller thread to the engine thread:
//! an [`AtomicFlag`] for session abort (lock-free on the setter side, polled
//! once per frame on the worker side), and two [`Gate`]s, one for
//! pause/resume and a one-shot one for per-turn confirmation.
//!
//! Both primitives are state-based rather than notification-based: signalling
//! before the waiter starts waiting can never be lost, and signalling twice
//! is idempotent. Abort may race pause/resume, so that property is load-bearing.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// A boolean flag that can be set from any thread without blocking.
#[derive(Debug, Default)]
pub struct AtomicFlag(AtomicBool);

impl AtomicFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A binary gate: waiters block while the gate is closed.
///
/// `open()` releases all current and future waiters until the gate is closed
/// again. The open/closed state lives under the mutex, so there is no window
/// in which an `open()` issued before `wait()` can be missed.
#[derive(Debug)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new(open: bool) -> Self {
        Self {
            open: Mutex::new(open),
            cond: Condvar::new(),
        }
    }

    pub fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.cond.notify_all();
    }

    pub fn close(&self) {
        *self.open.lock() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Block the calling thread until the gate is open.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn flag_set_clear_roundtrip() {
        let flag = AtomicFlag::new();
        assert!(!flag.is_set());
        flag.set();
        flag.set(); // idempotent
        assert!(flag.is_set());
        flag.clear();
        assert!(!flag.is_set());
    }

    #[test]
    fn open_before_wait_is_not_lost() {
        let gate = Gate::new(false);
        gate.open();
        // Must return immediately.
        gate.wait();
    }

    #[test]
    fn wait_blocks_until_opened() {
        let gate = Arc::new(Gate::new(false));
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.wait();
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        gate.open();
        waiter.join().unwrap();
    }

    #[test]
    fn reclosing_blocks_new_waiters() {
        let gate = Arc::new(Gate::new(true));
        gate.wait();
        gate.close();
        assert!(!gate.is_open());
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        gate.open();
        waiter.join().unwrap();
    }
}
