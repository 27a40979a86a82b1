//! Mirrors the original project's "embed into an existing loop" example:
//! a host owns the `Reactor` and adopts a worker into it mid-flight rather
//! than handing the worker its own thread, then lets submitted work
//! dismiss the worker once it is done.

use sched_worker::{Priority, Reactor, Scheduler, Worker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn main() {
    tracing_subscriber::fmt::init();

    let done = Arc::new(AtomicUsize::new(0));
    let mut reactor = Reactor::new();

    let done_for_main = Arc::clone(&done);
    reactor.run(move |scheduler| {
        let worker = Worker::<(), Reactor>::adopt_running(scheduler, None, None, ())
            .expect("adopt_running failed");

        for n in 0..3 {
            let done_for_job = Arc::clone(&done_for_main);
            worker
                .push_load_with_priority(Priority::High, move |_s, _w| {
                    tracing::info!(n, "adopted load running");
                    done_for_job.fetch_add(1, Ordering::SeqCst);
                })
                .expect("push_load_with_priority failed");
        }

        let done_for_dismiss = Arc::clone(&done_for_main);
        worker
            .push_load_with_priority(Priority::Default, move |s, w| {
                tracing::info!(ran = done_for_dismiss.load(Ordering::SeqCst), "dismissing worker");
                w.dismiss(s).expect("dismiss failed");
                s.request_shutdown();
            })
            .expect("push_load_with_priority failed");
    });

    tracing::info!(ran = done.load(Ordering::SeqCst), "host reactor returned");
}
