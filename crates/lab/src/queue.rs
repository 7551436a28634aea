//! Bounded FIFO job queue between the lab dispatcher and the worker pool.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use common::clock::Tick;
use common::shutdown::{ShutdownFlag, CANCEL_POLL};
use common::types::{Priority, Sender, TestKind};

/// One accepted lab request.
#[derive(Debug, Clone)]
pub struct LabJob {
    pub patient_id: String,
    pub operation_id: u32,
    pub priority: Priority,
    pub submitted_tick: Tick,
    pub tests: Vec<TestKind>,
    pub sender: Sender,
}

#[derive(Debug)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<LabJob>>,
    capacity: usize,
    job_ready: Condvar,
    slot_free: Condvar,
    shutdown: Arc<ShutdownFlag>,
}

impl JobQueue {
    pub fn new(capacity: usize, shutdown: Arc<ShutdownFlag>) -> Self {
        JobQueue {
            jobs: Mutex::new(VecDeque::new()),
            capacity,
            job_ready: Condvar::new(),
            slot_free: Condvar::new(),
            shutdown,
        }
    }

    /// Blocking push; returns false when shutdown interrupted the wait.
    pub fn push(&self, job: LabJob) -> bool {
        let mut jobs = self.jobs.lock();
        while jobs.len() >= self.capacity {
            if self.shutdown.is_set() {
                return false;
            }
            self.slot_free.wait_for(&mut jobs, CANCEL_POLL);
        }
        jobs.push_back(job);
        drop(jobs);
        self.job_ready.notify_one();
        true
    }

    /// Blocking pop. Drains the backlog after shutdown, then returns
    /// `None` so the worker exits.
    pub fn pop(&self) -> Option<LabJob> {
        let mut jobs = self.jobs.lock();
        loop {
            if let Some(job) = jobs.pop_front() {
                drop(jobs);
                self.slot_free.notify_one();
                return Some(job);
            }
            if self.shutdown.is_set() {
                return None;
            }
            self.job_ready.wait_for(&mut jobs, CANCEL_POLL);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake every blocked worker (shutdown path).
    pub fn broadcast(&self) {
        let _guard = self.jobs.lock();
        self.job_ready.notify_all();
        self.slot_free.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(operation_id: u32) -> LabJob {
        LabJob {
            patient_id: "LAB001".to_string(),
            operation_id,
            priority: Priority::Normal,
            submitted_tick: 0,
            tests: vec![TestKind::Hemo],
            sender: Sender::Coordinator,
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = JobQueue::new(4, Arc::new(ShutdownFlag::new()));
        assert!(queue.push(job(1)));
        assert!(queue.push(job(2)));
        assert_eq!(queue.pop().unwrap().operation_id, 1);
        assert_eq!(queue.pop().unwrap().operation_id, 2);
    }

    #[test]
    fn test_push_blocks_at_capacity() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let queue = Arc::new(JobQueue::new(1, Arc::clone(&shutdown)));
        assert!(queue.push(job(1)));

        let pusher = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.push(job(2)))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop().unwrap().operation_id, 1);
        assert!(pusher.join().unwrap());
        assert_eq!(queue.pop().unwrap().operation_id, 2);
    }

    #[test]
    fn test_shutdown_drains_then_stops() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let queue = JobQueue::new(4, Arc::clone(&shutdown));
        assert!(queue.push(job(1)));

        shutdown.set();
        assert_eq!(queue.pop().unwrap().operation_id, 1);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_push_aborts_on_shutdown_when_full() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let queue = JobQueue::new(1, Arc::clone(&shutdown));
        assert!(queue.push(job(1)));
        shutdown.set();
        assert!(!queue.push(job(2)));
    }
}
