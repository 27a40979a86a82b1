//! A cross-thread submission and teardown protocol for a single-threaded
//! cooperative scheduler.
//!
//! A [`Worker`] lets any number of external OS threads hand work to a
//! single-threaded, cooperatively scheduled [`Scheduler`] without that
//! scheduler ever blocking on a lock: submissions cross threads through a
//! wake pipe and a mutex-guarded wish queue, drained by a listener task the
//! worker installs on the scheduler itself. Teardown is coordinated the
//! same way, with synchronous, timed, and fire-and-forget variants, and
//! recovers from a broken wake channel instead of leaking silently.
//!
//! This crate ships one reference [`Scheduler`] implementation, [`Reactor`],
//! a small `libc::poll`-based reactor, so the protocol can be exercised
//! end to end without an external async runtime. Production embedders are
//! expected to implement [`Scheduler`] for whatever cooperative loop they
//! already run.
//!
//! ```no_run
//! use sched_worker::{Priority, Reactor, Worker};
//!
//! let worker = Worker::<(), Reactor>::create(None, None, ()).unwrap();
//! worker
//!     .push_load_with_priority(Priority::High, |_scheduler, _worker| {
//!         println!("running on the worker thread");
//!     })
//!     .unwrap();
//! worker.destroy_synch().unwrap();
//! ```

mod error;
mod pipe;
mod priority;
mod reactor;
mod requirement;
mod scheduler;
mod worker;

pub use error::{Result, WorkerError};
pub use priority::Priority;
pub use reactor::{Reactor, ReactorTaskHandle};
pub use requirement::{Requirement, WaitOutcome};
pub use scheduler::{FdTask, Scheduler, Task};
pub use worker::{get_current, MasterHook, StartHook, TerminateHook, Worker};
