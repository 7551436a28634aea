//! Resource gates — counting semaphores with cancellable acquire.
//!
//! Acquire loops on a 100 ms timed wait and re-checks shutdown between
//! waits; release never blocks. Release must pair a prior acquire.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use common::config::SystemConfig;
use common::shutdown::{ShutdownFlag, CANCEL_POLL};
use common::types::{LabBench, Specialty};

/// Concurrent workers the pharmacy counter admits.
pub const PHARMACY_COUNTER_SLOTS: usize = 4;

#[derive(Debug)]
pub struct Semaphore {
    name: &'static str,
    permits: Mutex<usize>,
    available: Condvar,
    shutdown: Arc<ShutdownFlag>,
}

impl Semaphore {
    pub fn new(name: &'static str, permits: usize, shutdown: Arc<ShutdownFlag>) -> Self {
        Semaphore {
            name,
            permits: Mutex::new(permits),
            available: Condvar::new(),
            shutdown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take one permit. Returns `false` if shutdown was flagged before a
    /// permit became available.
    pub fn acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        loop {
            if *permits > 0 {
                *permits -= 1;
                return true;
            }
            if self.shutdown.is_set() {
                return false;
            }
            self.available.wait_for(&mut permits, CANCEL_POLL);
        }
    }

    /// Return one permit.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

/// The semaphore set binding the subsystems together: one per operating
/// room, one per lab bench, one multi-slot counter for the pharmacy.
#[derive(Debug)]
pub struct ResourceGates {
    rooms: [Semaphore; 3],
    lab1: Semaphore,
    lab2: Semaphore,
    pharmacy: Semaphore,
}

impl ResourceGates {
    pub fn new(_config: &SystemConfig, shutdown: &Arc<ShutdownFlag>) -> Self {
        let sem = |name, permits| Semaphore::new(name, permits, Arc::clone(shutdown));
        ResourceGates {
            rooms: [sem("bo1", 1), sem("bo2", 1), sem("bo3", 1)],
            lab1: sem("lab1", 1),
            lab2: sem("lab2", 1),
            pharmacy: sem("pharmacy", PHARMACY_COUNTER_SLOTS),
        }
    }

    pub fn room(&self, surgery_type: Specialty) -> &Semaphore {
        &self.rooms[surgery_type.room_index()]
    }

    pub fn bench(&self, bench: LabBench) -> &Semaphore {
        match bench {
            LabBench::Lab1 => &self.lab1,
            LabBench::Lab2 => &self.lab2,
        }
    }

    pub fn pharmacy(&self) -> &Semaphore {
        &self.pharmacy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_acquire_release() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let sem = Semaphore::new("test", 2, shutdown);
        assert!(sem.acquire());
        assert!(sem.acquire());
        assert_eq!(sem.available(), 0);
        sem.release();
        assert_eq!(sem.available(), 1);
        assert!(sem.acquire());
    }

    #[test]
    fn test_acquire_cancelled_by_shutdown() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let sem = Semaphore::new("test", 0, Arc::clone(&shutdown));
        shutdown.set();

        let start = Instant::now();
        assert!(!sem.acquire());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_blocked_acquire_unblocks_on_release() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let sem = Arc::new(Semaphore::new("test", 1, shutdown));
        assert!(sem.acquire());

        let waiter = {
            let sem = Arc::clone(&sem);
            std::thread::spawn(move || sem.acquire())
        };
        std::thread::sleep(Duration::from_millis(50));
        sem.release();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_gate_layout() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let gates = ResourceGates::new(&SystemConfig::default(), &shutdown);
        assert_eq!(gates.room(Specialty::Cardio).available(), 1);
        assert_eq!(gates.room(Specialty::Neuro).name(), "bo3");
        assert_eq!(gates.bench(LabBench::Lab1).available(), 1);
        assert_eq!(gates.pharmacy().available(), PHARMACY_COUNTER_SLOTS);
    }
}
