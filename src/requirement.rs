//! A counted gate used to coordinate teardown across threads.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// The outcome of a timed wait on a [`Requirement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The unfulfillment counter reached zero before the deadline.
    Satisfied,
    /// The deadline passed while the counter was still above zero.
    Expired,
}

/// A counted gate: "red" while one or more holds are outstanding, "green"
/// once they have all been released. Waiters block while the gate is red.
///
/// Unlike a semaphore, `Requirement` does not flip automatically on its own;
/// correctness depends entirely on every `hold` being matched by a later
/// `release`, including on error paths. A single reusable primitive backs
/// two independent uses in this crate: `scheduler_returned` and
/// `worker_disposable`.
#[derive(Debug)]
pub struct Requirement {
    state: Mutex<u32>,
    condvar: Condvar,
}

impl Requirement {
    /// Creates a new gate, initially green (`unfulfillment == 0`).
    pub fn new_green() -> Self {
        Self {
            state: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Creates a new gate, initially red with one outstanding hold.
    pub fn new_red() -> Self {
        Self {
            state: Mutex::new(1),
            condvar: Condvar::new(),
        }
    }

    /// Increments the unfulfillment counter. Every call must be matched by a
    /// later [`Requirement::release`].
    pub fn hold(&self) {
        let mut count = self.state.lock().expect("requirement mutex poisoned");
        *count += 1;
    }

    /// Decrements the unfulfillment counter if it is above zero, and wakes
    /// one waiter. Releasing a gate that is already green is a no-op, which
    /// keeps call sites that release on every exit path (including error
    /// paths) simple.
    pub fn release(&self) {
        let mut count = self.state.lock().expect("requirement mutex poisoned");
        if *count > 0 {
            *count -= 1;
        }
        self.condvar.notify_all();
    }

    /// Blocks the calling thread while the gate is red.
    pub fn wait(&self) {
        let mut count = self.state.lock().expect("requirement mutex poisoned");
        while *count > 0 {
            count = self
                .condvar
                .wait(count)
                .expect("requirement mutex poisoned");
        }
    }

    /// Blocks the calling thread while the gate is red, up to `deadline`.
    pub fn wait_until(&self, deadline: Instant) -> WaitOutcome {
        let mut count = self.state.lock().expect("requirement mutex poisoned");
        loop {
            if *count == 0 {
                return WaitOutcome::Satisfied;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Expired;
            }
            let timeout = deadline - now;
            // Guard against spurious wakeups re-checking a shrunk timeout of zero.
            let timeout = timeout.max(Duration::from_nanos(1));
            let (guard, result) = self
                .condvar
                .wait_timeout(count, timeout)
                .expect("requirement mutex poisoned");
            count = guard;
            if result.timed_out() && *count > 0 {
                return WaitOutcome::Expired;
            }
        }
    }

    /// Returns whether the gate is currently green, without blocking.
    pub fn is_green(&self) -> bool {
        *self.state.lock().expect("requirement mutex poisoned") == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn green_wait_returns_immediately() {
        let r = Requirement::new_green();
        r.wait();
        assert!(r.is_green());
    }

    #[test]
    fn hold_then_release_unblocks_waiter() {
        let r = Arc::new(Requirement::new_green());
        r.hold();
        assert!(!r.is_green());

        let waiter = {
            let r = r.clone();
            thread::spawn(move || r.wait())
        };

        thread::sleep(Duration::from_millis(20));
        r.release();
        waiter.join().expect("waiter thread panicked");
        assert!(r.is_green());
    }

    #[test]
    fn release_past_zero_is_a_no_op() {
        let r = Requirement::new_green();
        r.release();
        assert!(r.is_green());
    }

    #[test]
    fn wait_until_expires_when_never_released() {
        let r = Requirement::new_red();
        let outcome = r.wait_until(Instant::now() + Duration::from_millis(30));
        assert_eq!(outcome, WaitOutcome::Expired);
    }

    #[test]
    fn wait_until_satisfied_before_deadline() {
        let r = Arc::new(Requirement::new_red());
        {
            let r = r.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                r.release();
            });
        }
        let outcome = r.wait_until(Instant::now() + Duration::from_secs(2));
        assert_eq!(outcome, WaitOutcome::Satisfied);
    }

    #[test]
    fn nested_holds_require_matching_releases() {
        let r = Requirement::new_green();
        r.hold();
        r.hold();
        assert!(!r.is_green());
        r.release();
        assert!(!r.is_green());
        r.release();
        assert!(r.is_green());
    }
}
