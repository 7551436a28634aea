//! Triage in-memory state: the two ordered patient queues and the
//! pending-hold list for patients waiting on Pharmacy/Lab responses.

use parking_lot::{Condvar, Mutex};

use common::clock::Tick;
use common::types::{MedId, Specialty, TestKind};
use ipc::message::{TRIAGE_OP_MAX, TRIAGE_OP_MIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientKind {
    Emergency,
    Appointment,
}

#[derive(Debug, Clone)]
pub struct TriagePatient {
    pub id: String,
    pub kind: PatientKind,
    /// Triage level 1-5 (1 is most urgent); appointments default to 5.
    pub priority: u8,
    pub stability: i32,
    pub arrival_tick: Tick,
    /// Only meaningful for appointments.
    pub scheduled_tick: Tick,
    pub is_critical: bool,
    pub tests: Vec<TestKind>,
    pub meds: Vec<MedId>,
    pub doctor: Option<Specialty>,
}

impl TriagePatient {
    /// Emergency queue sort key: critical first, then triage level, then
    /// arrival order.
    fn emergency_key(&self) -> (bool, u8, Tick) {
        (!self.is_critical, self.priority, self.arrival_tick)
    }
}

#[derive(Debug, Default)]
pub struct Queues {
    pub emergency: Vec<TriagePatient>,
    pub appointment: Vec<TriagePatient>,
}

impl Queues {
    /// Insert keeping `(is_critical desc, priority asc, arrival asc)`;
    /// stable for equal keys.
    pub fn insert_emergency(&mut self, patient: TriagePatient) {
        let key = patient.emergency_key();
        let pos = self
            .emergency
            .partition_point(|p| p.emergency_key() <= key);
        self.emergency.insert(pos, patient);
    }

    /// Insert keeping `scheduled_tick asc`; stable for equal ticks.
    pub fn insert_appointment(&mut self, patient: TriagePatient) {
        let pos = self
            .appointment
            .partition_point(|p| p.scheduled_tick <= patient.scheduled_tick);
        self.appointment.insert(pos, patient);
    }

    pub fn pop_emergency(&mut self) -> Option<TriagePatient> {
        if self.emergency.is_empty() {
            None
        } else {
            Some(self.emergency.remove(0))
        }
    }

    pub fn pop_appointment(&mut self) -> Option<TriagePatient> {
        if self.appointment.is_empty() {
            None
        } else {
            Some(self.appointment.remove(0))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.emergency.is_empty() && self.appointment.is_empty()
    }
}

/// A patient whose treatment finished but whose Pharmacy/Lab requests are
/// still in flight. Owned by the response correlator once parked here.
#[derive(Debug, Clone)]
pub struct PendingHold {
    pub patient_id: String,
    pub kind: PatientKind,
    pub operation_id: u32,
    pub waiting_meds: bool,
    pub waiting_labs: bool,
    pub meds_ok: bool,
    pub labs_ok: bool,
    pub meds_success: bool,
    pub labs_success: bool,
    pub hold_start_tick: Tick,
}

impl PendingHold {
    pub fn satisfied(&self) -> bool {
        (!self.waiting_meds || self.meds_ok) && (!self.waiting_labs || self.labs_ok)
    }

    pub fn fully_successful(&self) -> bool {
        (!self.waiting_meds || self.meds_success) && (!self.waiting_labs || self.labs_success)
    }
}

/// Shared triage state. One lock covers both queues, so the vitals sweep
/// and worker pops always observe a consistent pair; the pending list has
/// its own lock and is never held together with the queue lock.
#[derive(Debug)]
pub struct TriageState {
    pub queues: Mutex<Queues>,
    pub patient_ready: Condvar,
    pub pending: Mutex<Vec<PendingHold>>,
    next_op: Mutex<u32>,
}

impl TriageState {
    pub fn new() -> Self {
        TriageState {
            queues: Mutex::new(Queues::default()),
            patient_ready: Condvar::new(),
            pending: Mutex::new(Vec::new()),
            next_op: Mutex::new(TRIAGE_OP_MIN),
        }
    }

    /// Next per-patient correlation id in [1000, 1999], wrapping around.
    pub fn alloc_operation_id(&self) -> u32 {
        let mut next = self.next_op.lock();
        let id = *next;
        *next = if *next == TRIAGE_OP_MAX {
            TRIAGE_OP_MIN
        } else {
            *next + 1
        };
        id
    }

    /// Remove pending entries older than `max_hold` ticks. Returns the
    /// expired entries so the caller can log and release them.
    pub fn sweep_pending(&self, now: Tick, max_hold: u64) -> Vec<PendingHold> {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(id: &str, priority: u8, arrival: Tick, critical: bool) -> TriagePatient {
        TriagePatient {
            id: id.to_string(),
            kind: PatientKind::Emergency,
            priority,
            stability: 150,
            arrival_tick: arrival,
            scheduled_tick: 0,
            is_critical: critical,
            tests: Vec::new(),
            meds: Vec::new(),
            doctor: None,
        }
    }

    #[test]
    fn test_emergency_ordering() {
        let mut queues = Queues::default();
        queues.insert_emergency(patient("PAC001", 3, 0, false));
        queues.insert_emergency(patient("PAC002", 1, 5, false));
        queues.insert_emergency(patient("PAC003", 3, 2, true));
        queues.insert_emergency(patient("PAC004", 1, 3, false));
        queues.insert_emergency(patient("PAC005", 1, 1, true));

        let order: Vec<&str> = queues.emergency.iter().map(|p| p.id.as_str()).collect();
        // Critical first (by priority then arrival), then priority asc,
        // then arrival asc.
        assert_eq!(order, vec!["PAC005", "PAC003", "PAC004", "PAC002", "PAC001"]);
    }

    #[test]
    fn test_emergency_ordering_stable_for_equal_keys() {
        let mut queues = Queues::default();
        queues.insert_emergency(patient("PAC001", 2, 7, false));
        queues.insert_emergency(patient("PAC002", 2, 7, false));
        let order: Vec<&str> = queues.emergency.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, vec!["PAC001", "PAC002"]);
    }

    #[test]
    fn test_appointment_ordering_by_schedule() {
        let mut queues = Queues::default();
        let mut a = patient("PAC001", 5, 0, false);
        a.kind = PatientKind::Appointment;
        a.scheduled_tick = 30;
        let mut b = patient("PAC002", 5, 0, false);
        b.kind = PatientKind::Appointment;
        b.scheduled_tick = 10;

        queues.insert_appointment(a);
        queues.insert_appointment(b);
        assert_eq!(queues.appointment[0].id, "PAC002");
        assert_eq!(queues.pop_appointment().unwrap().id, "PAC002");
        assert_eq!(queues.pop_appointment().unwrap().id, "PAC001");
    }

    #[test]
    fn test_operation_id_wraparound() {
        let state = TriageState::new();
        assert_eq!(state.alloc_operation_id(), TRIAGE_OP_MIN);
        assert_eq!(state.alloc_operation_id(), TRIAGE_OP_MIN + 1);
        {
            let mut next = state.next_op.lock();
            *next = TRIAGE_OP_MAX;
        }
        assert_eq!(state.alloc_operation_id(), TRIAGE_OP_MAX);
        assert_eq!(state.alloc_operation_id(), TRIAGE_OP_MIN);
    }

    #[test]
    fn test_sweep_pending_expires_old_entries() {
        let state = TriageState::new();
        let hold = |op, start| PendingHold {
            patient_id: format!("PAC{op}"),
            kind: PatientKind::Emergency,
            operation_id: op,
            waiting_meds: true,
            waiting_labs: false,
            meds_ok: false,
            labs_ok: false,
            meds_success: false,
            labs_success: false,
            hold_start_tick: start,
        };
        state.pending.lock().push(hold(1000, 0));
        state.pending.lock().push(hold(1001, 90));

        let expired = state.sweep_pending(100, 50);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].operation_id, 1000);
        assert_eq!(state.pending.lock().len(), 1);
    }
}
