//! Tracker for detached worker threads, so shutdown can wait a bounded
//! time for in-flight work instead of joining each thread.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct WorkerTracker {
    running: Mutex<usize>,
    idle: Condvar,
}

impl WorkerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a worker before its thread starts, so a shutdown arriving in
    /// the spawn window still waits for it.
    pub fn started(&self) {
        *self.running.lock() += 1;
    }

    pub fn finished(&self) {
        let mut running = self.running.lock();
        *running = running.saturating_sub(1);
        if *running == 0 {
            self.idle.notify_all();
        }
    }

    pub fn running(&self) -> usize {
        *self.running.lock()
    }

    /// Wait until every tracked worker finished, or the timeout elapses.
    /// Returns whether the pool drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut running = self.running.lock();
        while *running > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.idle
                .wait_for(&mut running, (deadline - now).min(Duration::from_millis(100)));
        }
        true
    }
}
