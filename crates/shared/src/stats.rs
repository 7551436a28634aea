//! Global statistics — one coarse lock over all counters.
//!
//! Increments are O(1) and the lock is always innermost, so contention is
//! acceptable. Durations are summed in tick units.

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use common::clock::Tick;
use common::config::SystemConfig;
use common::types::{LabBench, MedId, Priority};

#[derive(Debug, Clone, Default)]
pub struct Stats {
    // --- Triage ---
    pub total_emergency_patients: u64,
    pub total_appointments: u64,
    pub total_emergency_wait_time: f64,
    pub total_appointment_wait_time: f64,
    pub total_triage_usage_time: f64,
    pub completed_emergencies: u64,
    pub completed_appointments: u64,
    pub critical_transfers: u64,
    pub rejected_patients: u64,

    // --- Surgery block (per room BO1..BO3) ---
    pub total_surgeries_bo: [u64; 3],
    pub bo_utilization_time: [f64; 3],
    pub total_surgery_wait_time: f64,
    pub completed_surgeries: u64,
    pub cancelled_surgeries: u64,

    // --- Pharmacy ---
    pub total_pharmacy_requests: u64,
    pub urgent_requests: u64,
    pub normal_requests: u64,
    pub total_pharmacy_response_time: f64,
    pub stock_depletions: u64,
    pub auto_restocks: u64,
    pub medication_usage: Vec<u64>,

    // --- Labs ---
    pub total_lab_tests_lab1: u64,
    pub total_lab_tests_lab2: u64,
    pub total_lab1_time: f64,
    pub total_lab2_time: f64,
    pub total_preop_tests: u64,
    pub total_lab_turnaround_time: f64,
    pub urgent_lab_tests: u64,

    // --- System ---
    pub total_operations: u64,
    pub system_errors: u64,
    pub simulation_time_units: u64,
}

#[derive(Debug)]
pub struct HospitalStats {
    inner: Mutex<Stats>,
    started: DateTime<Local>,
}

impl HospitalStats {
    pub fn new(config: &SystemConfig) -> Self {
        HospitalStats {
            inner: Mutex::new(Stats {
                medication_usage: vec![0; config.medications.len()],
                ..Stats::default()
            }),
            started: Local::now(),
        }
    }

    pub fn started(&self) -> DateTime<Local> {
        self.started
    }

    pub fn snapshot(&self) -> Stats {
        self.inner.lock().clone()
    }

    // --- Triage ---

    pub fn emergency_admitted(&self) {
        self.inner.lock().total_emergency_patients += 1;
    }

    pub fn appointment_admitted(&self) {
        self.inner.lock().total_appointments += 1;
    }

    pub fn patient_rejected(&self) {
        self.inner.lock().rejected_patients += 1;
    }

    pub fn critical_transfer(&self) {
        self.inner.lock().critical_transfers += 1;
    }

    pub fn emergency_wait(&self, units: u64) {
        self.inner.lock().total_emergency_wait_time += units as f64;
    }

    pub fn appointment_wait(&self, units: u64) {
        self.inner.lock().total_appointment_wait_time += units as f64;
    }

    pub fn triage_usage(&self, units: u64) {
        self.inner.lock().total_triage_usage_time += units as f64;
    }

    pub fn emergency_completed(&self) {
        self.inner.lock().completed_emergencies += 1;
    }

    pub fn appointment_completed(&self) {
        self.inner.lock().completed_appointments += 1;
    }

    // --- Surgery ---

    pub fn surgery_performed(&self, room_index: usize, duration: u64) {
        let mut stats = self.inner.lock();
        stats.total_surgeries_bo[room_index] += 1;
        stats.bo_utilization_time[room_index] += duration as f64;
    }

    pub fn surgery_wait(&self, units: u64) {
        self.inner.lock().total_surgery_wait_time += units as f64;
    }

    pub fn surgery_completed(&self) {
        let mut stats = self.inner.lock();
        stats.completed_surgeries += 1;
        stats.total_operations += 1;
    }

    pub fn surgery_cancelled(&self) {
        self.inner.lock().cancelled_surgeries += 1;
    }

    // --- Pharmacy ---

    pub fn pharmacy_request(&self, priority: Priority) {
        let mut stats = self.inner.lock();
        stats.total_pharmacy_requests += 1;
        if priority == Priority::Urgent {
            stats.urgent_requests += 1;
        } else {
            stats.normal_requests += 1;
        }
    }

    pub fn pharmacy_response_time(&self, units: u64) {
        self.inner.lock().total_pharmacy_response_time += units as f64;
    }

    pub fn stock_depletion(&self) {
        self.inner.lock().stock_depletions += 1;
    }

    pub fn auto_restock(&self) {
        self.inner.lock().auto_restocks += 1;
    }

    pub fn medication_dispensed(&self, med: MedId, qty: u32) {
        let mut stats = self.inner.lock();
        if let Some(slot) = stats.medication_usage.get_mut(med) {
            *slot += qty as u64;
        }
    }

    // --- Labs ---

    pub fn lab_test(&self, bench: LabBench, duration: u64) {
        let mut stats = self.inner.lock();
        match bench {
            LabBench::Lab1 => {
                stats.total_lab_tests_lab1 += 1;
                stats.total_lab1_time += duration as f64;
            }
            LabBench::Lab2 => {
                stats.total_lab_tests_lab2 += 1;
                stats.total_lab2_time += duration as f64;
            }
        }
    }

    /// PREOP: counted once, with each phase contributing bench busy time
    /// but not a per-bench test count.
    pub fn preop_test(&self, lab1_half: u64, lab2_half: u64) {
        let mut stats = self.inner.lock();
        stats.total_preop_tests += 1;
        stats.total_lab1_time += lab1_half as f64;
        stats.total_lab2_time += lab2_half as f64;
    }

    pub fn urgent_lab_test(&self) {
        self.inner.lock().urgent_lab_tests += 1;
    }

    pub fn lab_turnaround(&self, units: u64) {
        self.inner.lock().total_lab_turnaround_time += units as f64;
    }

    // --- System ---

    pub fn system_error(&self) {
        self.inner.lock().system_errors += 1;
    }

    pub fn publish_simulation_time(&self, tick: Tick) {
        self.inner.lock().simulation_time_units = tick;
    }
}
