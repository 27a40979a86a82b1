//! The scheduler collaborator contract.
//!
//! This crate does not ship a general-purpose cooperative runtime; it
//! depends on one through this trait. [`crate::reactor`] provides a minimal
//! reference implementation sufficient to run the worker lifecycle and this
//! crate's own test suite, but any single-threaded cooperative loop that can
//! implement `Scheduler` gets the full submission/teardown protocol for
//! free.
//!
//! Every method here is legal only from the thread currently running
//! [`Scheduler::run`]; this trait treats the scheduler purely as an
//! external collaborator and never assumes anything about its internals.

use crate::priority::Priority;
use std::os::unix::io::RawFd;

/// A callback scheduled to run once, with exclusive access to the
/// scheduler driving it.
pub type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

/// A callback scheduled to run repeatedly whenever its registered fd is
/// readable.
pub type FdTask<S> = Box<dyn FnMut(&mut S) + Send>;

/// The cooperative scheduler contract consumed by [`crate::worker::Worker`].
///
/// A `Scheduler` is single-threaded and cooperative: every method below is
/// only legal to call from the thread currently inside [`Scheduler::run`].
/// The worker never calls these methods from any other thread; cross-thread
/// submission goes through the wake pipe instead, precisely so that this
/// contract can stay this narrow.
pub trait Scheduler: Sized {
    /// An opaque handle to a previously scheduled task, returned by the
    /// `add_*` methods and accepted by [`Scheduler::cancel`]. `Sync` is
    /// required even though a handle is only ever produced and consumed on
    /// the scheduler thread: `Worker` hands a handle to a freshly scheduled
    /// task back to that same task through a shared slot so the task can
    /// identify itself in `schedules`, and that slot is captured by a
    /// `Send` closure that the scheduler itself will later invoke.
    type TaskHandle: Copy + Eq + std::fmt::Debug + Send + Sync + 'static;

    /// Runs the scheduler until [`Scheduler::request_shutdown`] is called
    /// from within it, blocking the calling thread for the duration.
    /// `main_task` runs first, before the loop proper starts, and is where
    /// a worker installs its listener and shutdown hook.
    fn run(&mut self, main_task: impl FnOnce(&mut Self) + Send + 'static);

    /// Schedules `routine` to run once, at `priority`, and returns a handle
    /// usable with [`Scheduler::cancel`].
    fn add_with_priority(
        &mut self,
        priority: Priority,
        routine: impl FnOnce(&mut Self) + Send + 'static,
    ) -> Self::TaskHandle;

    /// Registers `routine` to run, at `priority`, whenever `fd` becomes
    /// readable. Returns a handle usable with [`Scheduler::cancel`].
    fn add_fd_readiness(
        &mut self,
        priority: Priority,
        fd: RawFd,
        routine: impl FnMut(&mut Self) + Send + 'static,
    ) -> Self::TaskHandle;

    /// Registers `routine` to run exactly once when the scheduler is
    /// shutting down, regardless of what triggered the shutdown. Returns a
    /// handle usable with [`Scheduler::cancel`] (e.g. to swap an unattended
    /// hook for an attended one).
    fn add_shutdown_hook(
        &mut self,
        routine: impl FnOnce(&mut Self) + Send + 'static,
    ) -> Self::TaskHandle;

    /// Cancels a previously scheduled task. A no-op if it already fired or
    /// was already cancelled.
    fn cancel(&mut self, handle: Self::TaskHandle);

    /// Requests that [`Scheduler::run`] stop after running shutdown hooks.
    /// Legal only from the scheduler thread.
    fn request_shutdown(&mut self);
}
