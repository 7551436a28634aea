//! Pharmacy dispatcher.
//!
//! A single dispatcher reads the Pharmacy mailbox in priority order and
//! spawns one detached worker per request, bounded by the counter
//! semaphore. Workers run the two-phase stock protocol: reserve under the
//! counter, prepare without it, re-acquire to commit, then deliver.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;

use common::clock::Tick;
use common::log::Severity;
use common::types::{MedId, Priority, Sender};
use ipc::message::{Body, Message};
use ipc::routing::route_response;
use shared::workers::WorkerTracker;
use shared::Hospital;

const COMPONENT: &str = "PHARMACY";

/// Bounded wait for detached workers at shutdown.
pub const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PharmacyHandle {
    dispatcher: JoinHandle<()>,
    workers: Arc<WorkerTracker>,
}

impl PharmacyHandle {
    pub fn join(self) -> bool {
        let _ = self.dispatcher.join();
        self.workers.wait_idle(WORKER_DRAIN_TIMEOUT)
    }
}

pub fn spawn(hospital: Arc<Hospital>) -> PharmacyHandle {
    let workers = Arc::new(WorkerTracker::new());
    let dispatcher = {
        let (h, w) = (Arc::clone(&hospital), Arc::clone(&workers));
        std::thread::Builder::new()
            .name("pharmacy-dispatcher".to_string())
            .spawn(move || run_dispatcher(&h, &w))
            .expect("spawn pharmacy dispatcher")
    };
    hospital.log.log(
        Severity::Info,
        COMPONENT,
        "STARTUP",
        "pharmacy dispatcher started",
    );
    PharmacyHandle {
        dispatcher,
        workers,
    }
}

struct Order {
    patient_id: String,
    operation_id: u32,
    priority: Priority,
    submitted_tick: Tick,
    items: Vec<(MedId, u32)>,
    sender: Sender,
}

fn run_dispatcher(hospital: &Arc<Hospital>, workers: &Arc<WorkerTracker>) {
    loop {
        let Some(msg) = hospital.mail.pharmacy.recv_any() else {
            break;
        };
        let patient_id = msg.patient_id;
        let kind = msg.body.kind();
        let Body::PharmacyRequest { items, sender } = msg.body else {
            if kind == ipc::message::Kind::Shutdown {
                break;
            }
            hospital.log.log(
                Severity::Warning,
                COMPONENT,
                "UNKNOWN_MSG",
                &format!("unexpected {kind:?} record"),
            );
            continue;
        };

        hospital.stats.pharmacy_request(msg.priority);
        let order = Order {
            patient_id,
            operation_id: msg.operation_id,
            priority: msg.priority,
            submitted_tick: msg.timestamp,
            items,
            sender,
        };

        workers.started();
        let spawned = {
            let (h, w) = (Arc::clone(hospital), Arc::clone(workers));
            std::thread::Builder::new()
                .name(format!("pharmacy-{}", order.operation_id))
                .spawn(move || {
                    run_worker(&h, order);
                    w.finished();
                })
        };
        if spawned.is_err() {
            workers.finished();
            hospital.log.log(
                Severity::Error,
                COMPONENT,
                "THREAD_FAIL",
                "failed to start pharmacy worker",
            );
        }
    }
}

fn run_worker(hospital: &Hospital, order: Order) {
    if !hospital.gates.pharmacy().acquire() {
        return; // shutdown: the workflow is cancelled, response dropped
    }

    // Phase 1: reserve everything or fail the order.
    if let Err(med) = hospital.stock.reserve(&order.items) {
        hospital.gates.pharmacy().release();
        let name = hospital
            .stock
            .cell(med)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| format!("med #{med}"));
        hospital.log.log(
            Severity::Warning,
            COMPONENT,
            "STOCK_UNAVAILABLE",
            &format!("{}: insufficient {name}", order.patient_id),
        );
        send_response(hospital, &order, false);
        return;
    }
    hospital.gates.pharmacy().release();

    // Phase 2: preparation happens off the counter.
    let prep = fastrand::u64(
        hospital.config.pharmacy_prep_time_min..=hospital.config.pharmacy_prep_time_max,
    );
    hospital.clock.wait_units(&hospital.shutdown, prep);
    if hospital.shutdown.is_set() {
        hospital.stock.release_reservation(&order.items);
        return;
    }

    // Phase 3: commit under the counter.
    if !hospital.gates.pharmacy().acquire() {
        hospital.stock.release_reservation(&order.items);
        return;
    }
    let auto_restock = hospital
        .config
        .auto_restock_enabled
        .then_some(hospital.config.restock_qty_multiplier);
    let outcomes = hospital.stock.commit(&order.items, auto_restock);
    hospital.gates.pharmacy().release();

    for (&(med, qty), outcome) in order.items.iter().zip(&outcomes) {
        hospital.stats.medication_dispensed(med, qty);
        let name = hospital
            .stock
            .cell(med)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| format!("med #{med}"));
        if outcome.depleted {
            hospital.stats.stock_depletion();
            hospital.log.log(
                Severity::Error,
                COMPONENT,
                "STOCK_DEPLETED",
                &format!("{name} reached zero stock"),
            );
        }
        if let Some(credit) = outcome.restocked {
            hospital.stats.auto_restock();
            hospital.log.log(
                Severity::Info,
                COMPONENT,
                "AUTO_RESTOCK",
                &format!("{name} restocked with {credit} units"),
            );
        }
    }

    if let Err(err) = write_delivery_note(hospital, &order) {
        hospital.stats.system_error();
        hospital.log.log(
            Severity::Error,
            COMPONENT,
            "FILE_ERROR",
            &format!("delivery note for {}: {err:#}", order.patient_id),
        );
    }

    send_response(hospital, &order, true);
}

fn send_response(hospital: &Hospital, order: &Order, success: bool) {
    let response = Message {
        priority: order.priority,
        patient_id: order.patient_id.clone(),
        operation_id: order.operation_id,
        timestamp: hospital.clock.now(),
        body: Body::PharmReady { success },
    };
    match route_response(&hospital.mail, order.sender, response) {
        Ok(()) => {
            hospital
                .stats
                .pharmacy_response_time(hospital.clock.now().saturating_sub(order.submitted_tick));
            hospital.log.log(
                Severity::Info,
                COMPONENT,
                if success { "ORDER_READY" } else { "ORDER_FAILED" },
                &format!(
                    "{} (op {}, for {})",
                    order.patient_id,
                    order.operation_id,
                    order.sender.name()
                ),
            );
        }
        Err(err) => {
            hospital.stats.system_error();
            hospital.log.log(
                Severity::Error,
                COMPONENT,
                "RESPONSE_FAIL",
                &format!("{}: {err}", order.patient_id),
            );
        }
    }
}

/// `results/pharmacy_deliveries/<patient_id>_<epoch>.txt`
fn write_delivery_note(hospital: &Hospital, order: &Order) -> Result<()> {
    let dir = hospital.paths.pharmacy_deliveries_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let now = Local::now();
    let path = dir.join(format!("{}_{}.txt", order.patient_id, now.timestamp()));

    let mut content = String::new();
    content.push_str("=== PHARMACY DELIVERY ===\n");
    content.push_str(&format!("Patient: {}\n", order.patient_id));
    content.push_str(&format!("Operation: {}\n", order.operation_id));
    content.push_str(&format!(
        "Delivered at: {} (tick {})\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        hospital.clock.now()
    ));
    content.push_str("Items:\n");
    for &(med, qty) in &order.items {
        let name = hospital
            .stock
            .cell(med)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| format!("med #{med}"));
        content.push_str(&format!("  {name} x{qty}\n"));
    }

    std::fs::write(&path, content)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{MedConfig, SystemConfig};
    use common::log::EventLog;
    use ipc::message::COORDINATOR_OP_MIN;
    use shared::HospitalPaths;
    use std::path::Path;
    use std::time::Instant;

    fn fast_config(meds: &[(&str, u32, u32)], auto_restock: bool) -> SystemConfig {
        let mut config = SystemConfig::default();
        config.time_unit_ms = 1;
        config.pharmacy_prep_time_min = 1;
        config.pharmacy_prep_time_max = 2;
        config.auto_restock_enabled = auto_restock;
        config.restock_qty_multiplier = 3;
        config.medications = meds
            .iter()
            .map(|&(name, initial_stock, threshold)| MedConfig {
                name: name.to_string(),
                initial_stock,
                threshold,
            })
            .collect();
        config
    }

    fn hospital_in(dir: &Path, config: SystemConfig) -> Arc<Hospital> {
        Hospital::new(
            config,
            EventLog::disabled(),
            HospitalPaths {
                results_dir: dir.to_path_buf(),
            },
        )
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

    fn request(id: &str, priority: Priority, items: Vec<(MedId, u32)>) -> Message {
        Message {
            priority,
            patient_id: id.to_string(),
            operation_id: COORDINATOR_OP_MIN + 1,
            timestamp: 0,
            body: Body::PharmacyRequest {
                items,
                sender: Sender::Coordinator,
            },
        }
    }

    fn shutdown(h: &Hospital, handle: PharmacyHandle) {
        h.shutdown.set();
        h.mail.pharmacy.send_poison();
        assert!(handle.join());
    }

    #[test]
    fn test_successful_order_decrements_stock() {
        let dir = tempfile::tempdir().unwrap();
        let h = hospital_in(dir.path(), fast_config(&[("ANALGESICO_A", 10, 0)], false));
        let handle = spawn(Arc::clone(&h));

        h.mail
            .pharmacy
            .send(request("REQ001", Priority::Normal, vec![(0, 3)]))
            .unwrap();

        let response = h.mail.responses.recv_from_correlation(COORDINATOR_OP_MIN).unwrap();
        assert!(matches!(response.body, Body::PharmReady { success: true }));

        let snap = h.stock.cell(0).unwrap().snapshot();
        assert_eq!((snap.current, snap.reserved), (7, 0));
        let stats = h.stats.snapshot();
        assert_eq!(stats.total_pharmacy_requests, 1);
        assert_eq!(stats.normal_requests, 1);
        assert_eq!(stats.medication_usage[0], 3);

        // Delivery note landed in the artifacts directory.
        let notes: Vec<_> = std::fs::read_dir(dir.path().join("pharmacy_deliveries"))
            .unwrap()
            .collect();
        assert_eq!(notes.len(), 1);

        shutdown(&h, handle);
    }

    #[test]
    fn test_stock_depletion_second_request_fails() {
        let dir = tempfile::tempdir().unwrap();
        let h = hospital_in(dir.path(), fast_config(&[("ANALGESICO_A", 1, 0)], false));
        let handle = spawn(Arc::clone(&h));

        h.mail
            .pharmacy
            .send(request("REQ001", Priority::Normal, vec![(0, 1)]))
            .unwrap();
        h.mail
            .pharmacy
            .send(request("REQ002", Priority::Normal, vec![(0, 1)]))
            .unwrap();

        let mut successes = 0;
        let mut failures = 0;
        for _ in 0..2 {
            let response = h.mail.responses.recv_from_correlation(COORDINATOR_OP_MIN).unwrap();
            match response.body {
                Body::PharmReady { success: true } => successes += 1,
                Body::PharmReady { success: false } => failures += 1,
                other => panic!("unexpected body: {other:?}"),
            }
        }
        assert_eq!((successes, failures), (1, 1));

        let stats = h.stats.snapshot();
        assert_eq!(stats.stock_depletions, 1);
        let snap = h.stock.cell(0).unwrap().snapshot();
        assert_eq!((snap.current, snap.reserved), (0, 0));

        shutdown(&h, handle);
    }

    #[test]
    fn test_auto_restock_fires_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let h = hospital_in(dir.path(), fast_config(&[("SEDATIVO_D", 2, 2)], true));
        let handle = spawn(Arc::clone(&h));

        h.mail
            .pharmacy
            .send(request("REQ003", Priority::Urgent, vec![(0, 2)]))
            .unwrap();

        let response = h.mail.responses.recv_from_correlation(COORDINATOR_OP_MIN).unwrap();
        assert!(matches!(response.body, Body::PharmReady { success: true }));

        assert!(wait_until(1000, || {
            let stats = h.stats.snapshot();
            stats.auto_restocks == 1 && stats.stock_depletions == 1
        }));
        assert_eq!(h.stats.snapshot().urgent_requests, 1);
        assert_eq!(h.stock.cell(0).unwrap().snapshot().current, 6);

        shutdown(&h, handle);
    }

    #[test]
    fn test_unknown_medication_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let h = hospital_in(dir.path(), fast_config(&[("ANALGESICO_A", 5, 0)], false));
        let handle = spawn(Arc::clone(&h));

        h.mail
            .pharmacy
            .send(request("REQ004", Priority::Normal, vec![(7, 1)]))
            .unwrap();

        let response = h.mail.responses.recv_from_correlation(COORDINATOR_OP_MIN).unwrap();
        assert!(matches!(response.body, Body::PharmReady { success: false }));
        assert_eq!(h.stock.cell(0).unwrap().snapshot().current, 5);

        shutdown(&h, handle);
    }
}
