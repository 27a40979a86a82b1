//! A pending or scheduled callback.

use crate::priority::Priority;
use crate::scheduler::Scheduler;
use crate::worker::Worker;
use std::sync::Arc;

/// A user routine queued for execution on the worker thread.
///
/// The C original's `routine` + `void *data` pair collapses into a single
/// boxed closure here: callers capture whatever payload they need, which is
/// the idiomatic Rust replacement for an untyped data pointer and carries
/// no less information. The closure receives both the scheduler (so it may
/// call any scheduler primitive, including requesting shutdown, since it
/// runs inside the scheduler thread like any other task) and the worker
/// handle itself, so it may also call back into [`Worker::destroy_asynch`]
/// or [`Worker::dismiss`] without needing [`crate::get_current`].
pub(crate) type Routine<D, S> = Box<dyn FnOnce(&mut S, &Arc<Worker<D, S>>) + Send>;

/// One entry in `wishlist` (not yet handed to the scheduler) or `schedules`
/// (currently held by the scheduler as a pending task).
///
/// An intrusive doubly linked list would let a node unlink itself in O(1)
/// without an allocator. In safe Rust the idiomatic equivalent is to let the
/// containers themselves (`VecDeque`) own placement and removal; `Wish` and
/// `ScheduledJob` below are plain owned values moved between containers,
/// which already satisfies invariant 4 (no node is ever reachable from two
/// containers at once) because ownership is unique by construction.
pub(crate) struct Wish<D, S: Scheduler> {
    pub(crate) routine: Routine<D, S>,
    pub(crate) priority: Priority,
}

impl<D, S: Scheduler> Wish<D, S> {
    pub(crate) fn new(priority: Priority, routine: Routine<D, S>) -> Self {
        Self { routine, priority }
    }
}

/// A wish that has been handed to the scheduler and is now tracked in
/// `schedules`, keyed by the scheduler's own task handle so the listener
/// and the per-job trampoline can find and unlink it.
pub(crate) struct ScheduledJob<S: Scheduler> {
    pub(crate) task: S::TaskHandle,
}
