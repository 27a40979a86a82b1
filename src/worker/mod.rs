//! `Worker<D, S>`: the cross-thread submission and teardown handle.
//!
//! A handle type shared across threads via `Arc`, a single OS thread that
//! owns the actual scheduler loop, and a park/unpark-style cross-thread
//! wake reused here as the self-pipe that drives cross-thread submission
//! and teardown.

mod current;
mod job;
mod state;

pub use current::get_current;

use crate::error::{Result, WorkerError};
use crate::pipe::WakePipe;
use crate::priority::Priority;
use crate::requirement::{Requirement, WaitOutcome};
use crate::scheduler::Scheduler;
use job::{Routine, ScheduledJob, Wish};
use state::{AtomicWorkerState, Destiny, WorkerFlags, WorkerState, WorkerThreadCell};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Instant;

/// Runs once, on the worker thread, before the scheduler starts accepting
/// work. Returning `false` aborts startup: the worker tears itself down
/// (running `on_terminate` if one was supplied) without ever reaching
/// `Alive` from a caller's perspective.
pub type StartHook<D, S> = Box<dyn FnOnce(&Arc<Worker<D, S>>) -> bool + Send>;

/// Runs once, on the worker thread, as the last thing that happens before
/// the worker reaches `Dead`.
pub type TerminateHook<D, S> = Box<dyn FnOnce(&Arc<Worker<D, S>>) + Send>;

/// A callback run on a dedicated "master" thread alongside a worker started
/// by [`Worker::start_serving`] or [`Worker::adopt_running`], receiving the
/// worker handle so it can submit work or request teardown.
pub type MasterHook<D, S> = Box<dyn FnOnce(&Arc<Worker<D, S>>) + Send>;

struct WishesGuarded<D, S: Scheduler> {
    wishlist: VecDeque<Wish<D, S>>,
    future_plans: Destiny,
}

struct ThreadOnlyState<D, S: Scheduler> {
    on_start: Option<StartHook<D, S>>,
    on_terminate: Option<TerminateHook<D, S>>,
    schedules: VecDeque<ScheduledJob<S>>,
    listener_schedule: Option<S::TaskHandle>,
    shutdown_schedule: Option<S::TaskHandle>,
    already_torn_down: bool,
}

/// A handle shared across the worker thread and any number of external
/// threads. Cloning is `Arc::clone`; the worker itself disposes when the
/// last clone drops and its scheduler has returned.
///
/// `D` is the caller's own payload, analogous to the original library's
/// `void *data`; `S` is the cooperative scheduler this worker rides on top
/// of (see [`crate::scheduler::Scheduler`]).
pub struct Worker<D, S: Scheduler> {
    data: D,
    flags: WorkerFlags,
    on_terminate_present: bool,
    wake_pipe: WakePipe,
    worker_thread_id: OnceLock<std::thread::ThreadId>,
    state: AtomicWorkerState,
    wishes: Mutex<WishesGuarded<D, S>>,
    kill_mutex: Mutex<()>,
    /// Green once the scheduler has returned from `run`. Waited on by
    /// `destroy_synch`/`destroy_timed` for workers that don't own their
    /// thread (so there is no `JoinHandle` to block on instead).
    scheduler_returned: Requirement,
    /// Green once no `push_load*` call is in flight, so teardown never
    /// races a submission that is mid-way through its own state check.
    worker_disposable: Requirement,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    thread_only: WorkerThreadCell<ThreadOnlyState<D, S>>,
}

enum TeardownOutcome {
    Started,
    AlreadyInProgress,
}

impl<D, S> Worker<D, S>
where
    D: Send + Sync + 'static,
    S: Scheduler + Send + 'static,
{
    fn new_record(
        on_start: Option<StartHook<D, S>>,
        on_terminate: Option<TerminateHook<D, S>>,
        data: D,
        wake_pipe: WakePipe,
        flags: WorkerFlags,
    ) -> Self {
        let on_terminate_present = on_terminate.is_some();
        Self {
            data,
            flags,
            on_terminate_present,
            wake_pipe,
            worker_thread_id: OnceLock::new(),
            state: AtomicWorkerState::new(WorkerState::Alive),
            wishes: Mutex::new(WishesGuarded {
                wishlist: VecDeque::new(),
                future_plans: Destiny::Continue,
            }),
            kill_mutex: Mutex::new(()),
            scheduler_returned: Requirement::new_red(),
            worker_disposable: Requirement::new_green(),
            join_handle: Mutex::new(None),
            thread_only: WorkerThreadCell::new(ThreadOnlyState {
                on_start,
                on_terminate,
                schedules: VecDeque::new(),
                listener_schedule: None,
                shutdown_schedule: None,
                already_torn_down: false,
            }),
        }
    }

    /// Spawns a new OS thread, builds a fresh `S`, and runs it to serve this
    /// worker. Returns once the thread has been spawned; the scheduler runs
    /// to completion in the background.
    pub fn create(
        on_start: Option<StartHook<D, S>>,
        on_terminate: Option<TerminateHook<D, S>>,
        data: D,
    ) -> Result<Arc<Self>>
    where
        S: Default,
    {
        let wake_pipe = WakePipe::new()?;
        let worker = Arc::new(Self::new_record(
            on_start,
            on_terminate,
            data,
            wake_pipe,
            WorkerFlags {
                owns_thread: true,
                is_guest: false,
            },
        ));

        let worker_for_thread = Arc::clone(&worker);
        let spawned = std::thread::Builder::new()
            .name("sched-worker".into())
            .spawn(move || {
                worker_for_thread
                    .worker_thread_id
                    .set(std::thread::current().id())
                    .ok();
                let mut scheduler = S::default();
                let worker_for_main = Arc::clone(&worker_for_thread);
                scheduler.run(move |s| {
                    Worker::bootstrap(&worker_for_main, s);
                });
                current::uninstall();
            });

        match spawned {
            Ok(handle) => {
                *worker.join_handle.lock().expect("join handle mutex poisoned") = Some(handle);
                Ok(worker)
            }
            Err(err) => {
                tracing::error!(%err, "failed to spawn worker thread");
                Err(WorkerError::ThreadCreate)
            }
        }
    }

    /// Builds a fresh `S` and runs it on the calling thread, which becomes
    /// the worker thread for as long as the scheduler runs. Returns once the
    /// scheduler itself returns (i.e. once the worker has been destroyed).
    pub fn start_serving(
        master: Option<MasterHook<D, S>>,
        on_start: Option<StartHook<D, S>>,
        on_terminate: Option<TerminateHook<D, S>>,
        data: D,
    ) -> Result<()>
    where
        S: Default,
    {
        if current::is_installed() {
            return Err(WorkerError::AlreadyServing);
        }

        let wake_pipe = WakePipe::new()?;
        let worker = Arc::new(Self::new_record(
            on_start,
            on_terminate,
            data,
            wake_pipe,
            WorkerFlags::default(),
        ));
        worker
            .worker_thread_id
            .set(std::thread::current().id())
            .ok();

        if let Some(master_cb) = master {
            let worker_for_master = Arc::clone(&worker);
            std::thread::Builder::new()
                .name("sched-worker-master".into())
                .spawn(move || master_cb(&worker_for_master))
                .map_err(|err| {
                    tracing::error!(%err, "failed to spawn master thread");
                    WorkerError::ThreadCreate
                })?;
        }

        let mut scheduler = S::default();
        let worker_for_main = Arc::clone(&worker);
        scheduler.run(move |s| {
            Worker::bootstrap(&worker_for_main, s);
        });
        current::uninstall();
        Ok(())
    }

    /// Installs this worker into a scheduler that is already running,
    /// called from code executing inside that scheduler's `run` loop (so it
    /// already holds `&mut S`). Unlike `create`/`start_serving`, the worker
    /// never owns the thread; it disposes itself at teardown rather than
    /// relying on a scheduler-launcher.
    pub fn adopt_running(
        scheduler: &mut S,
        master: Option<MasterHook<D, S>>,
        on_terminate: Option<TerminateHook<D, S>>,
        data: D,
    ) -> Result<Arc<Self>> {
        let wake_pipe = WakePipe::new()?;
        let worker = Arc::new(Self::new_record(
            None,
            on_terminate,
            data,
            wake_pipe,
            WorkerFlags {
                owns_thread: false,
                is_guest: true,
            },
        ));
        worker
            .worker_thread_id
            .set(std::thread::current().id())
            .ok();

        // Best effort: a thread hosting more than one adopted worker is an
        // unusual but not unsound configuration, so a failed install here
        // (another worker already current) is not treated as fatal.
        let _ = current::install(&worker);

        Self::install_shutdown_hook(&worker, scheduler);
        Self::install_listener(&worker, scheduler);

        if let Some(master_cb) = master {
            let worker_for_master = Arc::clone(&worker);
            std::thread::Builder::new()
                .name("sched-worker-master".into())
                .spawn(move || master_cb(&worker_for_master))
                .map_err(|err| {
                    tracing::error!(%err, "failed to spawn master thread");
                    WorkerError::ThreadCreate
                })?;
        }

        Ok(worker)
    }

    /// The bootstrap task run as `main_task` by `create`/`start_serving`.
    fn bootstrap(worker: &Arc<Self>, scheduler: &mut S) {
        let _ = current::install(worker);
        Self::install_shutdown_hook(worker, scheduler);

        let on_start = worker.thread_only.with(|t| t.on_start.take());
        let proceed = match on_start {
            None => true,
            Some(cb) => match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(worker))) {
                Ok(proceed) => proceed,
                Err(panic) => {
                    tracing::error!(panic = %panic_message(&panic), "on_start panicked");
                    false
                }
            },
        };

        if proceed {
            Self::install_listener(worker, scheduler);
        } else {
            tracing::debug!("on_start declined startup; tearing down");
            Self::teardown_now(worker, scheduler);
            scheduler.request_shutdown();
        }
    }

    fn install_listener(worker: &Arc<Self>, scheduler: &mut S) {
        let fd = worker.wake_pipe.read_end();
        let worker_for_closure = Arc::clone(worker);
        let handle = scheduler.add_fd_readiness(Priority::Shutdown, fd, move |s| {
            Self::on_wake(&worker_for_closure, s);
        });
        worker.thread_only.with(|t| t.listener_schedule = Some(handle));
    }

    fn install_shutdown_hook(worker: &Arc<Self>, scheduler: &mut S) {
        let worker_for_closure = Arc::clone(worker);
        let handle = scheduler.add_shutdown_hook(move |s| {
            Self::teardown_now(&worker_for_closure, s);
        });
        worker.thread_only.with(|t| t.shutdown_schedule = Some(handle));
    }

    /// The listener task: fires whenever the wake pipe is readable, drains
    /// one byte, and acts on whatever submitters left behind.
    fn on_wake(worker: &Arc<Self>, scheduler: &mut S) {
        if let Err(err) = worker.wake_pipe.drain_one() {
            tracing::warn!(?err, "listener failed to drain wake pipe");
        }

        let (wishlist, destiny) = {
            let mut guard = worker.wishes.lock().expect("wishes mutex poisoned");
            (std::mem::take(&mut guard.wishlist), guard.future_plans)
        };

        match destiny {
            Destiny::Continue => {
                // `wishlist` was built by repeated `push_front`, so the
                // oldest entry is at the back; reverse to restore submission
                // order before handing each wish to the scheduler.
                for wish in wishlist.into_iter().rev() {
                    Self::enqueue_wish(worker, scheduler, wish);
                }
                if worker.state.load() != WorkerState::Alive {
                    worker.thread_only.with(|t| {
                        if let Some(h) = t.listener_schedule.take() {
                            scheduler.cancel(h);
                        }
                    });
                }
            }
            Destiny::MustShutDown => {
                drop(wishlist);
                Self::teardown_now(worker, scheduler);
                scheduler.request_shutdown();
            }
            Destiny::MustBeDismissed => {
                drop(wishlist);
                Self::teardown_now(worker, scheduler);
            }
        }
    }

    fn enqueue_wish(worker: &Arc<Self>, scheduler: &mut S, wish: Wish<D, S>) {
        let worker_for_task = Arc::clone(worker);
        let handle_slot: Arc<OnceLock<S::TaskHandle>> = Arc::new(OnceLock::new());
        let handle_slot_for_task = Arc::clone(&handle_slot);
        let routine = wish.routine;

        let task_handle = scheduler.add_with_priority(wish.priority, move |s| {
            let handle = *handle_slot_for_task
                .get()
                .expect("task handle is set before the scheduler can run it");
            Self::run_job(s, &worker_for_task, handle, routine);
        });

        handle_slot
            .set(task_handle)
            .unwrap_or_else(|_| unreachable!("handle_slot is set exactly once"));
        worker
            .thread_only
            .with(|t| t.schedules.push_front(ScheduledJob { task: task_handle }));
    }

    fn run_job(scheduler: &mut S, worker: &Arc<Self>, handle: S::TaskHandle, routine: Routine<D, S>) {
        worker.thread_only.with(|t| {
            if let Some(pos) = t.schedules.iter().position(|job| job.task == handle) {
                t.schedules.remove(pos);
            }
        });
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            routine(scheduler, worker)
        }));
        if let Err(panic) = result {
            tracing::error!(panic = %panic_message(&panic), "submitted routine panicked");
        }
    }

    /// Cancels everything the worker has registered with the scheduler,
    /// runs `on_terminate` at most once, and marks the worker `Dead`.
    ///
    /// Called from three independent places: the listener's teardown
    /// branch, the shutdown hook firing for a reason unrelated to this
    /// worker, and (via the same hook) a destroy that already ran this
    /// once. The `already_torn_down` flag is what makes calling it from
    /// all three safe: the second and third calls become no-ops beyond
    /// re-cancelling already-empty registrations.
    fn teardown_now(worker: &Arc<Self>, scheduler: &mut S) {
        let already = worker.thread_only.with(|t| {
            let was = t.already_torn_down;
            if let Some(h) = t.listener_schedule.take() {
                scheduler.cancel(h);
            }
            if let Some(h) = t.shutdown_schedule.take() {
                scheduler.cancel(h);
            }
            for job in t.schedules.drain(..) {
                scheduler.cancel(job.task);
            }
            t.already_torn_down = true;
            was
        });

        if already {
            return;
        }

        // Wait for any submission already past its state check to finish
        // recording its wish, so the clear below can't race a `push_load`
        // that is mid-way through appending to `wishlist`. `push_load*`
        // never waits on anything the worker thread owns, so this cannot
        // deadlock against the very teardown this call is running.
        worker.worker_disposable.wait();

        {
            let mut guard = worker.wishes.lock().expect("wishes mutex poisoned");
            guard.wishlist.clear();
        }

        let on_terminate = worker.thread_only.with(|t| t.on_terminate.take());
        if on_terminate.is_some() {
            worker.state.store(WorkerState::SayingBye);
        }
        if let Some(cb) = on_terminate {
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(worker))) {
                tracing::error!(panic = %panic_message(&panic), "on_terminate panicked");
            }
        }

        worker.state.store(WorkerState::Dying);
        worker.state.store(WorkerState::Dead);
        worker.scheduler_returned.release();
    }

    /// Uninstalls the worker from a still-running scheduler without
    /// requesting that the scheduler itself shut down. Requires `&mut S`,
    /// so it is only callable from code already running inside the
    /// scheduler (the usual pairing is with [`Worker::adopt_running`]).
    pub fn dismiss(self: &Arc<Self>, scheduler: &mut S) -> Result<()> {
        match self.state.load() {
            WorkerState::Dying | WorkerState::Dead => return Err(WorkerError::DoubleFree),
            WorkerState::SayingBye => return Err(WorkerError::NotAlone),
            WorkerState::Zombie | WorkerState::Alive => {}
        }

        {
            let mut guard = self.wishes.lock().expect("wishes mutex poisoned");
            guard.future_plans = Destiny::MustBeDismissed;
        }
        Self::teardown_now(self, scheduler);
        Ok(())
    }

    /// The shared destroy fast-path guard: transitions `Alive` toward
    /// teardown under `kill_mutex`, records `target` as the destiny the
    /// listener should act on, and beeps the wake pipe. A `Zombie` worker
    /// retries the beep directly, recovering into `Dying` on success.
    fn request_teardown(&self, target: Destiny) -> Result<TeardownOutcome> {
        match self.state.load() {
            WorkerState::Zombie => {
                self.set_future_plans(target);
                return match self.wake_pipe.beep() {
                    Ok(()) => {
                        self.state.store(WorkerState::Dying);
                        Ok(TeardownOutcome::Started)
                    }
                    Err(err) => Err(err),
                };
            }
            WorkerState::SayingBye => return Ok(TeardownOutcome::AlreadyInProgress),
            WorkerState::Dying | WorkerState::Dead => return Err(WorkerError::DoubleFree),
            WorkerState::Alive => {}
        }

        let guard = match self.kill_mutex.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                return if self.on_terminate_present {
                    Ok(TeardownOutcome::AlreadyInProgress)
                } else {
                    Err(WorkerError::DoubleFree)
                };
            }
        };

        let next = if self.on_terminate_present {
            WorkerState::SayingBye
        } else {
            WorkerState::Dying
        };

        // Another thread may have moved the state on between the initial
        // load above and acquiring `kill_mutex`; the compare-exchange fails
        // in that case rather than stomping on stale information, and we
        // re-dispatch against whatever the state actually is now.
        let moved = self.state.compare_exchange(WorkerState::Alive, next);
        drop(guard);
        if !moved {
            return self.request_teardown(target);
        }

        self.set_future_plans(target);
        match self.wake_pipe.beep() {
            Ok(()) => Ok(TeardownOutcome::Started),
            Err(err) => {
                self.state.store(WorkerState::Zombie);
                Err(err)
            }
        }
    }

    fn set_future_plans(&self, target: Destiny) {
        let mut guard = self.wishes.lock().expect("wishes mutex poisoned");
        guard.future_plans = target;
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_thread_id.get() == Some(&std::thread::current().id())
    }

    /// Requests teardown without waiting for it to finish. Safe to call
    /// from any thread, including the worker thread itself.
    ///
    /// Called from the worker thread, this still goes through the wake
    /// pipe and listener rather than driving the scheduler's shutdown
    /// directly: `destroy_asynch` only holds `&self`, not `&mut S`, so
    /// there is no scheduler handle in scope to call `request_shutdown`
    /// on. A same-thread direct-shutdown branch would need one anyway
    /// (e.g. via a thread-local raw scheduler pointer), which this crate
    /// deliberately does not carry; see `DESIGN.md`. The cost is the same
    /// one extra loop turn as any other beep-and-wait, not a missed wakeup.
    pub fn destroy_asynch(&self) -> Result<()> {
        match self.request_teardown(Destiny::MustShutDown)? {
            TeardownOutcome::Started | TeardownOutcome::AlreadyInProgress => Ok(()),
        }
    }

    /// Requests teardown and blocks until the scheduler has returned.
    /// Called from the worker thread itself, this behaves like
    /// [`Worker::destroy_asynch`] instead of blocking, since waiting here
    /// would deadlock against the very teardown this call just requested.
    pub fn destroy_synch(&self) -> Result<()> {
        match self.request_teardown(Destiny::MustShutDown)? {
            TeardownOutcome::AlreadyInProgress => return Err(WorkerError::NotAlone),
            TeardownOutcome::Started => {}
        }

        if self.on_worker_thread() {
            return Ok(());
        }

        if self.flags.owns_thread {
            let handle = self
                .join_handle
                .lock()
                .expect("join handle mutex poisoned")
                .take();
            if let Some(handle) = handle {
                handle.join().map_err(|_| WorkerError::Unknown)?;
            }
        } else {
            self.scheduler_returned.wait();
        }
        Ok(())
    }

    /// Requests teardown and blocks until either the scheduler returns or
    /// `deadline` passes. Always waits on the same completion signal
    /// regardless of thread ownership, since `std::thread::JoinHandle` has
    /// no timed join; see `DESIGN.md`.
    pub fn destroy_timed(&self, deadline: Instant) -> Result<()> {
        match self.request_teardown(Destiny::MustShutDown)? {
            TeardownOutcome::AlreadyInProgress => return Err(WorkerError::NotAlone),
            TeardownOutcome::Started => {}
        }

        if self.on_worker_thread() {
            return Ok(());
        }

        match self.scheduler_returned.wait_until(deadline) {
            WaitOutcome::Satisfied => {
                if self.flags.owns_thread {
                    if let Some(handle) = self
                        .join_handle
                        .lock()
                        .expect("join handle mutex poisoned")
                        .take()
                    {
                        let _ = handle.join();
                    }
                }
                Ok(())
            }
            WaitOutcome::Expired => Err(WorkerError::Expired),
        }
    }

    /// Re-signals the wake pipe. The primary use is recovering a `Zombie`
    /// worker: a later `ping`, or any destroy call, retries the beep that
    /// previously failed.
    pub fn ping(&self) -> bool {
        self.wake_pipe.beep().is_ok()
    }

    /// Submits `routine` to run once on the worker thread, at
    /// [`Priority::default`].
    pub fn push_load(
        self: &Arc<Self>,
        routine: impl FnOnce(&mut S, &Arc<Self>) + Send + 'static,
    ) -> Result<()> {
        self.push_load_with_priority(Priority::default(), routine)
    }

    /// Submits `routine` to run once on the worker thread, at `priority`.
    /// The routine receives the scheduler itself, so it may call any
    /// scheduler primitive (including requesting shutdown) the same way
    /// any other task running on that thread could.
    ///
    /// Safe to call from any thread, including the worker thread: the
    /// original library schedules directly (bypassing the wishlist) when
    /// the caller is already on the worker thread, as a latency
    /// optimization. This port always goes through the wishlist and wake
    /// pipe instead; since the listener drains it within the same `run`
    /// call when already on that thread, this costs one extra loop
    /// iteration, not a missed wakeup or a reordering, and it removes an
    /// entire thread-identity/raw-scheduler-pointer code path. See
    /// `DESIGN.md`.
    pub fn push_load_with_priority(
        self: &Arc<Self>,
        priority: Priority,
        routine: impl FnOnce(&mut S, &Arc<Self>) + Send + 'static,
    ) -> Result<()> {
        self.worker_disposable.hold();
        let result = self.push_load_inner(priority, Box::new(routine));
        self.worker_disposable.release();
        result
    }

    fn push_load_inner(self: &Arc<Self>, priority: Priority, routine: Routine<D, S>) -> Result<()> {
        match self.state.load() {
            WorkerState::SayingBye => return Ok(()),
            WorkerState::Alive => {}
            WorkerState::Zombie | WorkerState::Dying | WorkerState::Dead => {
                return Err(WorkerError::InvalidHandle);
            }
        }

        let was_empty = {
            let mut guard = self.wishes.lock().expect("wishes mutex poisoned");
            let was_empty = guard.wishlist.is_empty();
            guard.wishlist.push_front(Wish::new(priority, routine));
            was_empty
        };

        if was_empty {
            if let Err(err) = self.wake_pipe.beep() {
                let mut guard = self.wishes.lock().expect("wishes mutex poisoned");
                guard.wishlist.pop_front();
                return Err(err);
            }
        }
        Ok(())
    }

    /// The payload supplied at construction.
    pub fn data(&self) -> &D {
        &self.data
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
