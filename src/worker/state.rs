//! The worker's lifecycle state, teardown destiny, and thread-ownership flags.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, Ordering};

/// The worker's lifecycle state.
///
/// Monotonic along the happy path: `Alive` → `SayingBye`? → `Dying` →
/// `Dead`, with `Zombie` as an off-path terminal reachable only when the
/// wake pipe breaks, and itself recoverable back into `Dying` if a later
/// `ping`/destroy call manages to beep successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Alive = 0,
    SayingBye = 1,
    Dying = 2,
    Dead = 3,
    Zombie = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Alive,
            1 => WorkerState::SayingBye,
            2 => WorkerState::Dying,
            3 => WorkerState::Dead,
            4 => WorkerState::Zombie,
            _ => unreachable!("invalid WorkerState encoding"),
        }
    }
}

/// An atomic cell holding a [`WorkerState`].
#[derive(Debug)]
pub struct AtomicWorkerState(AtomicU8);

impl AtomicWorkerState {
    pub fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Atomically transitions from `from` to `to`, returning whether this
    /// call performed the transition.
    pub fn compare_exchange(&self, from: WorkerState, to: WorkerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// What the worker should do the next time the listener observes
/// `future_plans != Continue`, guarded by the same `wishes_mutex` as
/// `wishlist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destiny {
    #[default]
    Continue,
    MustShutDown,
    MustBeDismissed,
}

/// Bits describing how the worker relates to the OS thread hosting its
/// scheduler. Small enough that a dedicated `bitflags` dependency would be
/// pure ceremony; a two-field struct is the idiomatic Rust shape here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerFlags {
    /// The library created the scheduler thread and must join or detach it.
    pub owns_thread: bool,
    /// The worker was installed into a pre-existing, already-running
    /// scheduler. Never owns the thread; disposes itself instead of relying
    /// on a scheduler-launcher wrapper.
    pub is_guest: bool,
}

/// A cell for state that only the worker thread ever touches: `on_start`,
/// `on_terminate`, `schedules`, and the two hook handles.
///
/// These fields are read and mutated exclusively from inside the
/// scheduler's `run` loop, by code this crate itself installs as tasks and
/// hooks; no other thread ever reaches them, which is exactly the
/// precondition a `RefCell` needs. `Worker<D, S>` otherwise satisfies `Sync`
/// structurally, so this wrapper is the one place that assertion is made by
/// hand.
pub(crate) struct WorkerThreadCell<T>(RefCell<T>);

impl<T> WorkerThreadCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(RefCell::new(value))
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

// Safety: every access goes through `with`, and every call site is reached
// only from the worker thread (the scheduler-launcher's own thread, or a
// task/hook the worker itself scheduled on it). See the type doc comment.
unsafe impl<T> Sync for WorkerThreadCell<T> {}
