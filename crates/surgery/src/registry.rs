//! Surgery bookkeeping: the active registry (one record per running
//! worker), the pending-hold list for surgeries whose dependencies missed
//! the initial timeout, and the worker tracker used for bounded shutdown.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use common::clock::Tick;
use common::types::{MedId, Specialty, TestKind, Urgency};
use shared::workers::WorkerTracker;

/// Clinical fields of an admitted surgery.
#[derive(Debug, Clone)]
pub struct SurgeryInfo {
    pub surgery_id: u32,
    pub patient_id: String,
    pub surgery_type: Specialty,
    pub urgency: Urgency,
    pub scheduled_tick: Tick,
    pub estimated_duration: u64,
    pub tests: Vec<TestKind>,
    pub meds: Vec<MedId>,
}

/// Dependency flags, guarded by the record's own mutex. The worker waits
/// on `cond`; the dispatcher flips flags and signals.
#[derive(Debug, Clone, Copy)]
pub struct DepFlags {
    pub needs_tests: bool,
    pub tests_done: bool,
    pub needs_meds: bool,
    pub meds_ok: bool,
    pub active: bool,
}

impl DepFlags {
    pub fn satisfied(&self) -> bool {
        (!self.needs_tests || self.tests_done) && (!self.needs_meds || self.meds_ok)
    }
}

#[derive(Debug)]
pub struct ActiveSurgery {
    pub info: SurgeryInfo,
    pub flags: Mutex<DepFlags>,
    pub cond: Condvar,
}

impl ActiveSurgery {
    fn new(info: SurgeryInfo, tests_done: bool, meds_ok: bool) -> Arc<Self> {
        let needs_tests = !info.tests.is_empty();
        let needs_meds = !info.meds.is_empty();
        Arc::new(ActiveSurgery {
            info,
            flags: Mutex::new(DepFlags {
                needs_tests,
                tests_done,
                needs_meds,
                meds_ok,
                active: true,
            }),
            cond: Condvar::new(),
        })
    }
}

/// A surgery parked after the initial dependency timeout, carrying the
/// flags it had when its worker gave up.
#[derive(Debug, Clone)]
pub struct PendingSurgery {
    pub info: SurgeryInfo,
    pub tests_done: bool,
    pub meds_ok: bool,
    pub hold_start_tick: Tick,
}

impl PendingSurgery {
    pub fn satisfied(&self) -> bool {
        (self.info.tests.is_empty() || self.tests_done)
            && (self.info.meds.is_empty() || self.meds_ok)
    }
}

/// Which dependency a routed response settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Tests,
    Meds,
}

#[derive(Debug)]
pub struct Registry {
    active: Mutex<Vec<Arc<ActiveSurgery>>>,
    pending: Mutex<Vec<PendingSurgery>>,
    next_id: Mutex<u32>,
    workers: WorkerTracker,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            active: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            workers: WorkerTracker::new(),
        }
    }

    /// Monotonically increasing surgery id, starting at 1.
    pub fn alloc_surgery_id(&self) -> u32 {
        let mut next = self.next_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// Register a fresh admission. `resumed` records carry their already
    /// satisfied flags so the resumed worker skips the dependency wait.
    pub fn register(&self, info: SurgeryInfo, tests_done: bool, meds_ok: bool) -> Arc<ActiveSurgery> {
        let surgery = ActiveSurgery::new(info, tests_done, meds_ok);
        self.active.lock().push(Arc::clone(&surgery));
        surgery
    }

    pub fn unregister(&self, surgery_id: u32) {
        self.active
            .lock()
            .retain(|s| s.info.surgery_id != surgery_id);
    }

    pub fn find_active(&self, surgery_id: u32) -> Option<Arc<ActiveSurgery>> {
        self.active
            .lock()
            .iter()
            .find(|s| s.info.surgery_id == surgery_id)
            .map(Arc::clone)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Park a surgery whose worker gave up waiting. The record leaves the
    /// active registry and owns its timing from `hold_start_tick`.
    /// Returns false when the pending list is already at `cap` — the
    /// surgery could not be parked and must be cancelled by the caller.
    pub fn move_to_pending(&self, surgery: &ActiveSurgery, hold_start_tick: Tick, cap: usize) -> bool {
        let flags = *surgery.flags.lock();
        self.unregister(surgery.info.surgery_id);
        let mut pending = self.pending.lock();
        if pending.len() >= cap {
            return false;
        }
        pending.push(PendingSurgery {
            info: surgery.info.clone(),
            tests_done: flags.tests_done,
            meds_ok: flags.meds_ok,
            hold_start_tick,
        });
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Record a late response against a pending entry. When the entry
    /// becomes fully satisfied it is removed and returned for resumption.
    pub fn settle_pending(&self, surgery_id: u32, dep: Dependency) -> PendingOutcome {
        let mut pending = self.pending.lock();
        let Some(pos) = pending
            .iter()
            .position(|p| p.info.surgery_id == surgery_id)
        else {
            return PendingOutcome::Unknown;
        };
        match dep {
            Dependency::Tests => pending[pos].tests_done = true,
            Dependency::Meds => pending[pos].meds_ok = true,
        }
        if pending[pos].satisfied() {
            PendingOutcome::Resumable(pending.remove(pos))
        } else {
            PendingOutcome::Updated
        }
    }

    /// Drop pending entries older than `max_hold` ticks; returns them for
    /// cancellation accounting.
    pub fn sweep_pending(&self, now: Tick, max_hold: u64) -> Vec<PendingSurgery> {
        let mut pending = self.pending.lock();
        let mut expired = Vec::new();
        pending.retain(|entry| {
            if now.saturating_sub(entry.hold_start_tick) >= max_hold {
                expired.push(entry.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Wake every dependency waiter (shutdown path).
    pub fn broadcast_all(&self) {
        for surgery in self.active.lock().iter() {
            let _flags = surgery.flags.lock();
            surgery.cond.notify_all();
        }
    }

    // --- Worker tracking (bounded shutdown wait) ---

    pub fn worker_started(&self) {
        self.workers.started();
    }

    pub fn worker_finished(&self) {
        self.workers.finished();
    }

    pub fn running_workers(&self) -> usize {
        self.workers.running()
    }

    /// Wait until every worker exited, or the timeout elapses. Returns
    /// whether the pool drained.
    pub fn wait_workers_idle(&self, timeout: Duration) -> bool {
        self.workers.wait_idle(timeout)
    }
}

/// Outcome of [`Registry::settle_pending`].
#[derive(Debug)]
pub enum PendingOutcome {
    /// No pending entry with that id.
    Unknown,
    /// Flag recorded; still waiting on the other dependency.
    Updated,
    /// Entry fully satisfied and removed; respawn a resumed worker.
    Resumable(PendingSurgery),
}
