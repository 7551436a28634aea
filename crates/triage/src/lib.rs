//! Triage dispatcher.
//!
//! Threads: two kind-specific intakes, a vitals monitor, a response
//! correlator and a small pool of treatment workers (the first prefers
//! appointments, the rest prefer emergencies). Patients whose treatment
//! sent Pharmacy/Lab requests are parked on a pending-hold list until the
//! correlator collects their responses or the hold expires.

mod state;

pub use state::{PatientKind, PendingHold, Queues, TriagePatient, TriageState};

use std::sync::Arc;
use std::thread::JoinHandle;

use common::log::Severity;
use common::shutdown::CANCEL_POLL;
use common::types::{LabSelector, Priority, Sender};
use ipc::message::{Body, Kind, Message, TRIAGE_OP_MAX};
use shared::Hospital;

/// Pending entries older than this many ticks are released unfinished.
pub const MAX_HOLD_TICKS: u64 = 4000;

const COMPONENT: &str = "TRIAGE";

pub struct TriageHandle {
    threads: Vec<JoinHandle<()>>,
    state: Arc<TriageState>,
}

impl TriageHandle {
    pub fn join(self) {
        for thread in self.threads {
            let _ = thread.join();
        }
    }

    pub fn state(&self) -> &Arc<TriageState> {
        &self.state
    }
}

pub fn spawn(hospital: Arc<Hospital>) -> TriageHandle {
    let state = Arc::new(TriageState::new());
    let mut threads = Vec::new();

    let spawn_named = |name: &str, f: Box<dyn FnOnce() + Send>| {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .expect("spawn triage thread")
    };

    {
        let (h, s) = (Arc::clone(&hospital), Arc::clone(&state));
        threads.push(spawn_named(
            "triage-emergency-intake",
            Box::new(move || run_emergency_intake(&h, &s)),
        ));
    }
    {
        let (h, s) = (Arc::clone(&hospital), Arc::clone(&state));
        threads.push(spawn_named(
            "triage-appointment-intake",
            Box::new(move || run_appointment_intake(&h, &s)),
        ));
    }
    {
        let (h, s) = (Arc::clone(&hospital), Arc::clone(&state));
        threads.push(spawn_named(
            "triage-vitals",
            Box::new(move || run_vitals_monitor(&h, &s)),
        ));
    }
    {
        let (h, s) = (Arc::clone(&hospital), Arc::clone(&state));
        threads.push(spawn_named(
            "triage-correlator",
            Box::new(move || run_correlator(&h, &s)),
        ));
    }

    let workers = hospital.config.triage_simultaneous_patients.max(1);
    for i in 0..workers {
        let (h, s) = (Arc::clone(&hospital), Arc::clone(&state));
        // Worker 0 serves the appointment queue first; the others try
        // emergencies first.
        let prefers_appointments = i == 0;
        threads.push(spawn_named(
            &format!("triage-worker-{i}"),
            Box::new(move || run_treatment_worker(&h, &s, prefers_appointments)),
        ));
    }

    hospital
        .log
        .log(Severity::Info, COMPONENT, "STARTUP", "triage dispatcher started");
    TriageHandle { threads, state }
}

// === Intake threads ===

fn run_emergency_intake(hospital: &Hospital, state: &TriageState) {
    loop {
        let Some(msg) = hospital.mail.triage.recv_exact_kind(Kind::NewEmergency) else {
            break;
        };
        let patient_id = msg.patient_id;
        let Body::NewEmergency {
            triage_level,
            stability,
            tests,
            meds,
        } = msg.body
        else {
            state.patient_ready.notify_all();
            break; // poison pill
        };

        let rejected = {
            let mut queues = state.queues.lock();
            if queues.emergency.len() >= hospital.config.max_emergency_patients {
                true
            } else {
                let now = hospital.clock.now();
                queues.insert_emergency(TriagePatient {
                    id: patient_id.clone(),
                    kind: PatientKind::Emergency,
                    priority: triage_level,
                    stability,
                    arrival_tick: now,
                    scheduled_tick: 0,
                    is_critical: stability <= hospital.config.triage_critical_stability,
                    tests,
                    meds,
                    doctor: None,
                });
                false
            }
        };

        if rejected {
            hospital.stats.patient_rejected();
            hospital
                .log
                .log(Severity::Warning, COMPONENT, "REJECTED", &patient_id);
        } else {
            hospital.stats.emergency_admitted();
            hospital
                .log
                .log(Severity::Info, COMPONENT, "PATIENT_ADDED", &patient_id);
            state.patient_ready.notify_one();
        }
    }
    state.patient_ready.notify_all();
}

fn run_appointment_intake(hospital: &Hospital, state: &TriageState) {
    loop {
        let Some(msg) = hospital.mail.triage.recv_exact_kind(Kind::NewAppointment) else {
            break;
        };
        let patient_id = msg.patient_id;
        let Body::NewAppointment {
            scheduled_tick,
            doctor,
            tests,
        } = msg.body
        else {
            state.patient_ready.notify_all();
            break; // poison pill
        };

        let rejected = {
            let mut queues = state.queues.lock();
            if queues.appointment.len() >= hospital.config.max_appointments {
                true
            } else {
                let now = hospital.clock.now();
                queues.insert_appointment(TriagePatient {
                    id: patient_id.clone(),
                    kind: PatientKind::Appointment,
                    priority: 5,
                    stability: 1000,
                    arrival_tick: now,
                    scheduled_tick,
                    is_critical: false,
                    tests,
                    meds: Vec::new(),
                    doctor: Some(doctor),
                });
                false
            }
        };

        if rejected {
            hospital.stats.patient_rejected();
            hospital
                .log
                .log(Severity::Warning, COMPONENT, "REJECTED_APPT", &patient_id);
        } else {
            hospital.stats.appointment_admitted();
            hospital
                .log
                .log(Severity::Info, COMPONENT, "APPT_ADDED", &patient_id);
            state.patient_ready.notify_one();
        }
    }
    state.patient_ready.notify_all();
}

// === Vitals monitor ===

fn run_vitals_monitor(hospital: &Hospital, state: &TriageState) {
    while !hospital.shutdown.is_set() {
        hospital.clock.wait_units(&hospital.shutdown, 1);
        if hospital.shutdown.is_set() {
            break;
        }
        tick_vitals(hospital, state);
    }
}

/// One vitals pass: emergencies lose a stability point (death at <= 0,
/// critical flag + reorder at the threshold); appointments do not decay
/// but transfer to the emergency queue once at or below the threshold.
fn tick_vitals(hospital: &Hospital, state: &TriageState) {
    let threshold = hospital.config.triage_critical_stability;
    let mut died = Vec::new();
    let mut flagged = Vec::new();
    let mut transferred = Vec::new();

    {
        let mut queues = state.queues.lock();

        let mut i = 0;
        while i < queues.emergency.len() {
            queues.emergency[i].stability -= 1;
            let stability = queues.emergency[i].stability;
            if stability <= 0 {
                died.push(queues.emergency.remove(i).id);
                continue;
            }
            if !queues.emergency[i].is_critical && stability <= threshold {
                let mut patient = queues.emergency.remove(i);
                patient.is_critical = true;
                flagged.push(patient.id.clone());
                // Re-insert ahead of every non-critical entry; the next
                // unprocessed patient is now one slot further.
                queues.insert_emergency(patient);
                i += 1;
                continue;
            }
            i += 1;
        }

        let mut i = 0;
        while i < queues.appointment.len() {
            if queues.appointment[i].stability <= threshold {
                let mut patient = queues.appointment.remove(i);
                patient.is_critical = true;
                patient.kind = PatientKind::Emergency;
                transferred.push(patient.id.clone());
                queues.insert_emergency(patient);
                continue;
            }
            i += 1;
        }
    }

    for id in &died {
        hospital
            .log
            .log(Severity::Critical, COMPONENT, "PATIENT_DIED", id);
    }
    for id in &flagged {
        hospital
            .log
            .log(Severity::Critical, COMPONENT, "CRITICAL_STATUS", id);
    }
    for id in &transferred {
        hospital.stats.critical_transfer();
        hospital
            .log
            .log(Severity::Critical, COMPONENT, "APPT_CRITICAL", id);
        state.patient_ready.notify_one();
    }
}

// === Treatment workers ===

fn run_treatment_worker(hospital: &Hospital, state: &TriageState, prefers_appointments: bool) {
    loop {
        let patient = {
            let mut queues = state.queues.lock();
            loop {
                if hospital.shutdown.is_set() {
                    return;
                }
                let claimed = if prefers_appointments {
                    queues.pop_appointment().or_else(|| queues.pop_emergency())
                } else {
                    queues.pop_emergency().or_else(|| queues.pop_appointment())
                };
                if let Some(patient) = claimed {
                    break patient;
                }
                state
                    .patient_ready
                    .wait_for(&mut queues, CANCEL_POLL);
            }
        };

        treat_patient(hospital, state, patient);
        if hospital.shutdown.is_set() {
            return;
        }
    }
}

/// Outbound request priority derived from the patient's condition.
fn outbound_priority(patient: &TriagePatient, critical_stability: i32) -> Priority {
    if patient.is_critical || patient.priority == 1 {
        Priority::Urgent
    } else if patient.stability < 2 * critical_stability || patient.priority == 2 {
        Priority::High
    } else {
        Priority::Normal
    }
}

fn treat_patient(hospital: &Hospital, state: &TriageState, patient: TriagePatient) {
    let now = hospital.clock.now();
    let duration = match patient.kind {
        PatientKind::Emergency => {
            hospital
                .stats
                .emergency_wait(now.saturating_sub(patient.arrival_tick));
            hospital.config.triage_emergency_duration
        }
        PatientKind::Appointment => {
            hospital
                .stats
                .appointment_wait(now.saturating_sub(patient.scheduled_tick));
            hospital.config.triage_appointment_duration
        }
    };

    hospital
        .log
        .log(Severity::Info, COMPONENT, "TREATMENT_START", &patient.id);

    hospital.clock.wait_units(&hospital.shutdown, duration);
    if hospital.shutdown.is_set() {
        hospital
            .log
            .log(Severity::Warning, COMPONENT, "SHUTDOWN_ABORT", &patient.id);
        return;
    }
    hospital.stats.triage_usage(duration);

    if patient.tests.is_empty() && patient.meds.is_empty() {
        complete_treatment(hospital, patient.kind, &patient.id, true);
        return;
    }

    // Dependencies: park the patient first so the correlator recognizes
    // even an immediate response, then fire both requests under one fresh
    // correlation id.
    let operation_id = state.alloc_operation_id();
    let priority = outbound_priority(&patient, hospital.config.triage_critical_stability);
    let now = hospital.clock.now();
    let needs_meds = !patient.meds.is_empty();
    let needs_labs = !patient.tests.is_empty();

    state.pending.lock().push(PendingHold {
        patient_id: patient.id.clone(),
        kind: patient.kind,
        operation_id,
        waiting_meds: needs_meds,
        waiting_labs: needs_labs,
        meds_ok: false,
        labs_ok: false,
        meds_success: false,
        labs_success: false,
        hold_start_tick: now,
    });

    let mut meds_send_failed = false;
    if needs_meds {
        let request = Message {
            priority,
            patient_id: patient.id.clone(),
            operation_id,
            timestamp: now,
            body: Body::PharmacyRequest {
                items: patient.meds.iter().map(|&med| (med, 1)).collect(),
                sender: Sender::Triage,
            },
        };
        if let Err(err) = hospital.mail.pharmacy.send(request) {
            meds_send_failed = true;
            hospital.log.log(
                Severity::Error,
                COMPONENT,
                "PHARM_REQUEST_FAIL",
                &format!("{}: {err}", patient.id),
            );
        }
    }

    let mut labs_send_failed = false;
    if needs_labs {
        let request = Message {
            priority,
            patient_id: patient.id.clone(),
            operation_id,
            timestamp: now,
            body: Body::LabRequest {
                tests: patient.tests.clone(),
                lab: LabSelector::Both,
                sender: Sender::Triage,
            },
        };
        if let Err(err) = hospital.mail.lab.send(request) {
            labs_send_failed = true;
            hospital.log.log(
                Severity::Error,
                COMPONENT,
                "LAB_REQUEST_FAIL",
                &format!("{}: {err}", patient.id),
            );
        }
    }

    if meds_send_failed || labs_send_failed {
        // A failed send can never be answered: settle it as a failed
        // response. If nothing else is in flight the workflow ends now,
        // counted as partial.
        let mut pending = state.pending.lock();
        if let Some(pos) = pending
            .iter()
            .position(|e| e.operation_id == operation_id)
        {
            if meds_send_failed {
                pending[pos].meds_ok = true;
                pending[pos].meds_success = false;
            }
            if labs_send_failed {
                pending[pos].labs_ok = true;
                pending[pos].labs_success = false;
            }
            if pending[pos].satisfied() {
                let entry = pending.remove(pos);
                drop(pending);
                complete_treatment(
                    hospital,
                    entry.kind,
                    &entry.patient_id,
                    entry.fully_successful(),
                );
                return;
            }
        }
    }

    hospital.log.log(
        Severity::Info,
        COMPONENT,
        "TREATMENT_HOLD",
        &format!("{} waiting on op {operation_id}", patient.id),
    );
}

fn complete_treatment(hospital: &Hospital, kind: PatientKind, patient_id: &str, success: bool) {
    if success {
        hospital
            .log
            .log(Severity::Info, COMPONENT, "TREATMENT_COMPLETE", patient_id);
    } else {
        hospital
            .log
            .log(Severity::Warning, COMPONENT, "TREATMENT_PARTIAL", patient_id);
    }
    match kind {
        PatientKind::Emergency => hospital.stats.emergency_completed(),
        PatientKind::Appointment => hospital.stats.appointment_completed(),
    }
}

// === Response correlator ===

fn run_correlator(hospital: &Hospital, state: &TriageState) {
    loop {
        let Some(msg) = hospital.mail.responses.recv_up_to_correlation(TRIAGE_OP_MAX) else {
            break;
        };
        if msg.kind() == Kind::Shutdown {
            break;
        }
        handle_response(hospital, state, msg);

        for entry in state.sweep_pending(hospital.clock.now(), MAX_HOLD_TICKS) {
            hospital.log.log(
                Severity::Warning,
                COMPONENT,
                "HOLD_EXPIRED",
                &format!(
                    "{} released after waiting on op {}",
                    entry.patient_id, entry.operation_id
                ),
            );
        }
    }
}

fn handle_response(hospital: &Hospital, state: &TriageState, msg: Message) {
    let mut pending = state.pending.lock();
    let Some(pos) = pending
        .iter()
        .position(|e| e.operation_id == msg.operation_id)
    else {
        drop(pending);
        hospital.log.log(
            Severity::Warning,
            COMPONENT,
            "STALE_RESPONSE",
            &format!("no pending patient for op {}", msg.operation_id),
        );
        return;
    };

    match msg.body {
        Body::PharmReady { success } => {
            pending[pos].meds_ok = true;
            pending[pos].meds_success = success;
        }
        Body::LabResultsReady { code } => {
            pending[pos].labs_ok = true;
            pending[pos].labs_success = code == 0;
        }
        _ => {
            drop(pending);
            hospital.log.log(
                Severity::Warning,
                COMPONENT,
                "UNEXPECTED_KIND",
                &format!("op {}", msg.operation_id),
            );
            return;
        }
    }

    if pending[pos].satisfied() {
        let entry = pending.remove(pos);
        drop(pending);
        complete_treatment(
            hospital,
            entry.kind,
            &entry.patient_id,
            entry.fully_successful(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::SystemConfig;
    use common::log::EventLog;
    use shared::HospitalPaths;
    use std::time::{Duration, Instant};

    fn fast_config() -> SystemConfig {
        let mut config = SystemConfig::default();
        config.time_unit_ms = 1;
        config.triage_emergency_duration = 1;
        config.triage_appointment_duration = 1;
        config.max_emergency_patients = 3;
        config.max_appointments = 3;
        config
    }

    fn hospital(config: SystemConfig) -> Arc<Hospital> {
        Hospital::new(config, EventLog::disabled(), HospitalPaths::default())
    }

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn emergency(id: &str, stability: i32, tests: Vec<common::types::TestKind>, meds: Vec<usize>) -> Message {
        Message {
            priority: Priority::Urgent,
            patient_id: id.to_string(),
            operation_id: 0,
            timestamp: 0,
            body: Body::NewEmergency {
                triage_level: 2,
                stability,
                tests,
                meds,
            },
        }
    }

    fn shutdown(hospital: &Hospital, handle: TriageHandle) {
        hospital.shutdown.set();
        hospital.mail.triage.send_poison();
        hospital.mail.triage.send_poison();
        hospital.mail.responses.send_poison();
        handle.join();
    }

    #[test]
    fn test_emergency_without_dependencies_completes() {
        let h = hospital(fast_config());
        let handle = spawn(Arc::clone(&h));

        h.mail
            .triage
            .send(emergency("PAC001", 150, vec![], vec![]))
            .unwrap();

        assert!(wait_until(2000, || {
            h.stats.snapshot().completed_emergencies == 1
        }));
        assert_eq!(h.stats.snapshot().total_emergency_patients, 1);
        shutdown(&h, handle);
    }

    #[test]
    fn test_queue_cap_rejects_overflow() {
        let mut config = fast_config();
        // Long treatment keeps all workers busy while we overflow the queue
        config.triage_emergency_duration = 60_000;
        let h = hospital(config);
        let handle = spawn(Arc::clone(&h));

        // Occupy all three workers first.
        for i in 0..3 {
            h.mail
                .triage
                .send(emergency(&format!("PAC10{i}"), 100_000, vec![], vec![]))
                .unwrap();
        }
        let state = Arc::clone(handle.state());
        assert!(wait_until(2000, || state.queues.lock().is_empty()
            && h.stats.snapshot().total_emergency_patients == 3));

        // Fill the queue to its cap of 3, then overflow by 2.
        for i in 0..5 {
            h.mail
                .triage
                .send(emergency(&format!("PAC20{i}"), 100_000, vec![], vec![]))
                .unwrap();
        }

        assert!(wait_until(2000, || {
            h.stats.snapshot().rejected_patients == 2
        }));
        assert_eq!(h.stats.snapshot().total_emergency_patients, 6);
        assert_eq!(state.queues.lock().emergency.len(), 3);
        shutdown(&h, handle);
    }

    #[test]
    fn test_pending_hold_resolved_by_responses() {
        let h = hospital(fast_config());
        let handle = spawn(Arc::clone(&h));

        h.mail
            .triage
            .send(emergency(
                "PAC002",
                150,
                vec![common::types::TestKind::Hemo],
                vec![0],
            ))
            .unwrap();

        // Treatment parks the patient and emits both requests.
        let pharm_req = {
            assert!(wait_until(2000, || h.mail.pharmacy.len() == 1));
            h.mail.pharmacy.recv_any().unwrap()
        };
        let lab_req = h.mail.lab.recv_any().unwrap();
        assert_eq!(pharm_req.operation_id, lab_req.operation_id);
        assert_eq!(handle.state().pending.lock().len(), 1);
        assert_eq!(h.stats.snapshot().completed_emergencies, 0);

        // Answer both; the correlator completes the patient.
        for body in [
            Body::PharmReady { success: true },
            Body::LabResultsReady { code: 0 },
        ] {
            ipc::routing::route_response(
                &h.mail,
                Sender::Triage,
                Message {
                    priority: Priority::Normal,
                    patient_id: pharm_req.patient_id.clone(),
                    operation_id: pharm_req.operation_id,
                    timestamp: 0,
                    body,
                },
            )
            .unwrap();
        }

        assert!(wait_until(2000, || {
            h.stats.snapshot().completed_emergencies == 1
        }));
        assert!(handle.state().pending.lock().is_empty());
        shutdown(&h, handle);
    }

    #[test]
    fn test_appointment_transfer_to_emergency() {
        let h = hospital(fast_config());
        let state = TriageState::new();

        // Appointment whose stability is already at the critical threshold
        state.queues.lock().insert_appointment(TriagePatient {
            id: "PAC003".to_string(),
            kind: PatientKind::Appointment,
            priority: 5,
            stability: h.config.triage_critical_stability,
            arrival_tick: 0,
            scheduled_tick: 50,
            is_critical: false,
            tests: Vec::new(),
            meds: Vec::new(),
            doctor: None,
        });
        state.queues.lock().insert_emergency(TriagePatient {
            id: "PAC004".to_string(),
            kind: PatientKind::Emergency,
            priority: 1,
            stability: 150,
            arrival_tick: 0,
            scheduled_tick: 0,
            is_critical: false,
            tests: Vec::new(),
            meds: Vec::new(),
            doctor: None,
        });

        tick_vitals(&h, &state);

        let snap = h.stats.snapshot();
        assert_eq!(snap.critical_transfers, 1);
        let queues = state.queues.lock();
        assert!(queues.appointment.is_empty());
        // Transferred patient is critical and heads the emergency queue
        assert_eq!(queues.emergency[0].id, "PAC003");
        assert!(queues.emergency[0].is_critical);
        assert_eq!(queues.emergency[0].kind, PatientKind::Emergency);
    }

    #[test]
    fn test_vitals_death_and_critical_flag() {
        let h = hospital(fast_config());
        let state = TriageState::new();

        state.queues.lock().insert_emergency(TriagePatient {
            id: "PAC005".to_string(),
            kind: PatientKind::Emergency,
            priority: 3,
            stability: 1,
            arrival_tick: 0,
            scheduled_tick: 0,
            is_critical: false,
            tests: Vec::new(),
            meds: Vec::new(),
            doctor: None,
        });
        state.queues.lock().insert_emergency(TriagePatient {
            id: "PAC006".to_string(),
            kind: PatientKind::Emergency,
            priority: 2,
            stability: h.config.triage_critical_stability + 1,
            arrival_tick: 0,
            scheduled_tick: 0,
            is_critical: false,
            tests: Vec::new(),
            meds: Vec::new(),
            doctor: None,
        });

        tick_vitals(&h, &state);

        let queues = state.queues.lock();
        // PAC005 died; PAC006 dropped to the threshold and was flagged
        assert_eq!(queues.emergency.len(), 1);
        assert_eq!(queues.emergency[0].id, "PAC006");
        assert!(queues.emergency[0].is_critical);
    }

    #[test]
    fn test_outbound_priority_derivation() {
        let mut patient = TriagePatient {
            id: "PAC007".to_string(),
            kind: PatientKind::Emergency,
            priority: 3,
            stability: 150,
            arrival_tick: 0,
            scheduled_tick: 0,
            is_critical: false,
            tests: Vec::new(),
            meds: Vec::new(),
            doctor: None,
        };
        assert_eq!(outbound_priority(&patient, 50), Priority::Normal);

        patient.stability = 99; // below 2 * critical
        assert_eq!(outbound_priority(&patient, 50), Priority::High);

        patient.priority = 1;
        assert_eq!(outbound_priority(&patient, 50), Priority::Urgent);

        patient.priority = 3;
        patient.is_critical = true;
        assert_eq!(outbound_priority(&patient, 50), Priority::Urgent);
    }

    #[test]
    fn test_stale_response_is_ignored() {
        let h = hospital(fast_config());
        let state = TriageState::new();
        handle_response(
            &h,
            &state,
            Message {
                priority: Priority::Normal,
                patient_id: "PAC008".to_string(),
                operation_id: 1500,
                timestamp: 0,
                body: Body::PharmReady { success: true },
            },
        );
        assert_eq!(h.stats.snapshot().completed_emergencies, 0);
    }
}
