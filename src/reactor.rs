//! A minimal, fully-owned reference [`Scheduler`] implementation.
//!
//! `Reactor` is deliberately small: a priority-ordered ready queue plus a
//! `libc::poll` pass over registered fd watches. It exists so the worker
//! lifecycle can be exercised end to end (by this crate's own tests and by
//! the binaries in `demos/`) without depending on an external async
//! runtime. Production embedders are expected to implement [`Scheduler`]
//! for whatever cooperative loop they already run.

use crate::priority::Priority;
use crate::scheduler::{FdTask, Scheduler, Task};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::os::unix::io::RawFd;
use std::time::Duration;

/// An opaque handle to a task registered with a [`Reactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactorTaskHandle(u64);

struct ReadyTask {
    id: u64,
    priority: Priority,
    routine: Task<Reactor>,
}

impl PartialEq for ReadyTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.id == other.id
    }
}
impl Eq for ReadyTask {}

impl PartialOrd for ReadyTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; among equal priorities, lower id (earlier
        // submission) first. `BinaryHeap` is a max-heap, so submission
        // order is inverted to make an earlier id compare as "greater".
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct FdWatch {
    id: u64,
    fd: RawFd,
    routine: FdTask<Reactor>,
}

/// The minimal reference scheduler. See the module documentation.
#[derive(Default)]
pub struct Reactor {
    next_id: u64,
    ready: BinaryHeap<ReadyTask>,
    fd_watches: Vec<FdWatch>,
    shutdown_hooks: Vec<(u64, Task<Reactor>)>,
    cancelled: HashSet<u64>,
    shutdown_requested: bool,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn poll_fds(&mut self, timeout: Duration) {
        if self.fd_watches.is_empty() {
            std::thread::sleep(timeout);
            return;
        }

        let mut pollfds: Vec<libc::pollfd> = self
            .fd_watches
            .iter()
            .map(|w| libc::pollfd {
                fd: w.fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        // Safety: `pollfds` is a live, correctly sized buffer that `poll`
        // fills in; the timeout is bounded so a misbehaving fd can never
        // wedge the reactor forever.
        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout.as_millis() as libc::c_int,
            )
        };
        if rc <= 0 {
            return;
        }

        let ready_ids: Vec<u64> = pollfds
            .iter()
            .zip(self.fd_watches.iter())
            .filter(|(pfd, _)| pfd.revents & libc::POLLIN != 0)
            .map(|(_, watch)| watch.id)
            .collect();

        for id in ready_ids {
            if let Some(pos) = self.fd_watches.iter().position(|w| w.id == id) {
                // Routines are `FnMut`, so a watch stays registered across
                // invocations; take it out for the duration of the call so
                // the routine can freely register other tasks without
                // aliasing `self.fd_watches`.
                let mut watch = self.fd_watches.remove(pos);
                (watch.routine)(self);
                if !self.cancelled.remove(&id) {
                    self.fd_watches.push(watch);
                } else {
                    drop(watch);
                }
            }
        }
    }
}

impl Scheduler for Reactor {
    type TaskHandle = ReactorTaskHandle;

    fn run(&mut self, main_task: impl FnOnce(&mut Self) + Send + 'static) {
        main_task(self);

        while !self.shutdown_requested {
            let next = loop {
                match self.ready.pop() {
                    Some(task) if self.cancelled.remove(&task.id) => continue,
                    Some(task) => break Some(task),
                    None => break None,
                }
            };

            match next {
                Some(task) => (task.routine)(self),
                None => self.poll_fds(Duration::from_millis(50)),
            }
        }

        let hooks = std::mem::take(&mut self.shutdown_hooks);
        for (id, hook) in hooks {
            if !self.cancelled.remove(&id) {
                hook(self);
            }
        }
    }

    fn add_with_priority(
        &mut self,
        priority: Priority,
        routine: impl FnOnce(&mut Self) + Send + 'static,
    ) -> Self::TaskHandle {
        let id = self.next_id();
        self.ready.push(ReadyTask {
            id,
            priority,
            routine: Box::new(routine),
        });
        ReactorTaskHandle(id)
    }

    fn add_fd_readiness(
        &mut self,
        _priority: Priority,
        fd: RawFd,
        routine: impl FnMut(&mut Self) + Send + 'static,
    ) -> Self::TaskHandle {
        let id = self.next_id();
        self.fd_watches.push(FdWatch {
            id,
            fd,
            routine: Box::new(routine),
        });
        ReactorTaskHandle(id)
    }

    fn add_shutdown_hook(
        &mut self,
        routine: impl FnOnce(&mut Self) + Send + 'static,
    ) -> Self::TaskHandle {
        let id = self.next_id();
        self.shutdown_hooks.push((id, Box::new(routine)));
        ReactorTaskHandle(id)
    }

    fn cancel(&mut self, handle: Self::TaskHandle) {
        self.cancelled.insert(handle.0);
        self.fd_watches.retain(|w| w.id != handle.0);
    }

    fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_ready_tasks_in_priority_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut reactor = Reactor::new();
        {
            let seen = seen.clone();
            reactor.run(move |r| {
                let idle_seen = seen.clone();
                r.add_with_priority(Priority::Idle, move |r: &mut Reactor| {
                    idle_seen.lock().unwrap().push("idle");
                    r.request_shutdown();
                });
                r.add_with_priority(Priority::Urgent, move |_| {
                    seen.lock().unwrap().push("urgent");
                });
            });
        }
        assert_eq!(*seen.lock().unwrap(), vec!["urgent", "idle"]);
    }

    #[test]
    fn cancel_prevents_execution() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut reactor = Reactor::new();
        {
            let ran = ran.clone();
            reactor.run(move |r| {
                let handle = r.add_with_priority(Priority::Default, move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                });
                r.cancel(handle);
                r.request_shutdown();
            });
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_hook_runs_once_on_request_shutdown() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut reactor = Reactor::new();
        {
            let ran = ran.clone();
            reactor.run(move |r| {
                r.add_shutdown_hook(move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                });
                r.request_shutdown();
            });
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
