//! The thread-local "current worker" slot.
//!
//! Mirrors the background-worker singleton pattern used for cross-instance
//! thread sharing (type-erased storage keyed by thread, downcast on read),
//! adapted here to hold at most one entry per thread rather than a map:
//! exactly one worker may be driving the calling thread's scheduler at a
//! time.

use crate::scheduler::Scheduler;
use crate::worker::Worker;
use std::any::Any;
use std::cell::RefCell;
use std::sync::{Arc, Weak};

thread_local! {
    static CURRENT: RefCell<Option<Box<dyn Any>>> = const { RefCell::new(None) };
}

/// Installs `worker` as the current worker for this thread. Called by the
/// scheduler-launcher (`create`, `start_serving`, `adopt_running`) just
/// before entering the scheduler's run loop. Returns an error if this
/// thread is already serving another worker.
pub(crate) fn install<D: 'static, S: Scheduler + 'static>(
    worker: &Arc<Worker<D, S>>,
) -> Result<(), ()> {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return Err(());
        }
        *slot = Some(Box::new(Arc::downgrade(worker)) as Box<dyn Any>);
        Ok(())
    })
}

/// Clears this thread's current-worker slot. Called after the scheduler's
/// run loop returns.
pub(crate) fn uninstall() {
    CURRENT.with(|slot| {
        slot.borrow_mut().take();
    });
}

/// Whether this thread is already serving some worker, of any `(D, S)`.
/// Used by [`crate::worker::Worker::start_serving`] to refuse a second,
/// concurrent scheduler on the same thread.
pub(crate) fn is_installed() -> bool {
    CURRENT.with(|slot| slot.borrow().is_some())
}

/// Returns the worker currently driving the calling thread's scheduler, or
/// `None` if this thread is not a worker thread (or is driving a worker of
/// a different `(D, S)` instantiation).
pub fn get_current<D: 'static, S: Scheduler + 'static>() -> Option<Arc<Worker<D, S>>> {
    CURRENT.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(|any| any.downcast_ref::<Weak<Worker<D, S>>>())
            .and_then(Weak::upgrade)
    })
}
