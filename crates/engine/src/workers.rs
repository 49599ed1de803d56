//! Background worker scaffolding.
//!
//! Periodic work (snapshots, batch fsync, expiry sweeps) runs on named
//! threads that sleep on a condvar so shutdown can interrupt a wait
//! immediately instead of riding out the interval.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

/// Shared shutdown signal for every background worker.
#[derive(Default)]
pub struct Shutdown {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Shutdown {
    /// Fresh, un-triggered signal.
    pub fn new() -> Arc<Self> {
        Arc::new(Shutdown::default())
    }

    /// Trip the signal and wake every sleeping worker.
    pub fn trigger(&self) {
        let mut stopped = self.stopped.lock();
        *stopped = true;
        self.wake.notify_all();
    }

    /// Whether the signal has been tripped.
    pub fn is_triggered(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `interval` or until the signal trips, whichever comes
    /// first. Returns `true` when the worker should keep running.
    pub fn sleep(&self, interval: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return false;
        }
        self.wake.wait_for(&mut stopped, interval);
        !*stopped
    }
}

/// Spawn a named worker that runs `tick` every `interval` until shutdown.
pub fn spawn_ticker(
    name: &str,
    interval: Duration,
    shutdown: Arc<Shutdown>,
    tick: impl Fn() + Send + 'static,
) -> JoinHandle<()> {
    let thread_name = name.to_string();
    std::thread::Builder::new()
        .name(format!("tokmesh-{name}"))
        .spawn(move || {
            debug!(target: "tokmesh::engine", worker = %thread_name, "worker started");
            while shutdown.sleep(interval) {
                tick();
            }
            debug!(target: "tokmesh::engine", worker = %thread_name, "worker stopped");
        })
        .expect("failed to spawn background worker thread")
}
