//! Mirrors the original project's "hello worker" example: spawn a worker,
//! push a handful of prioritized loads onto it, ping it once just to show
//! the call exists, then destroy it synchronously.

use sched_worker::{Priority, Reactor, Worker};
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt::init();

    let worker = Worker::<(), Reactor>::create(
        Some(Box::new(|_w| {
            tracing::info!("on_start: worker is coming up");
            true
        })),
        Some(Box::new(|_w| {
            tracing::info!("on_terminate: worker is going down");
        })),
        (),
    )
    .expect("failed to create worker");

    worker
        .push_load_with_priority(Priority::Urgent, |_s, _w| {
            tracing::info!("urgent load running");
        })
        .expect("push_load_with_priority failed");

    worker
        .push_load(|_s, _w| {
            tracing::info!("default-priority load running");
        })
        .expect("push_load failed");

    std::thread::sleep(Duration::from_millis(20));
    if !worker.ping() {
        tracing::warn!("ping failed; worker may be a zombie");
    }

    worker.destroy_synch().expect("destroy_synch failed");
    tracing::info!("worker torn down");
}
