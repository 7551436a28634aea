//! Surgery block dispatcher.
//!
//! One dispatcher thread is the sole reader of the Surgery mailbox and
//! multiplexes admissions with routed Pharmacy/Lab responses. Each
//! accepted surgery runs on its own worker thread: request dependencies,
//! wait (bounded) for them, wait for the scheduled tick, then
//! room -> team -> surgery -> cleanup. Workers that miss the initial
//! dependency timeout park their surgery on the pending list; the
//! dispatcher resumes it when the late response arrives, or cancels it
//! after the long bound.

mod registry;

pub use registry::{
    ActiveSurgery, DepFlags, Dependency, PendingOutcome, PendingSurgery, Registry, SurgeryInfo,
};

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use common::log::Severity;
use common::shutdown::CANCEL_POLL;
use common::types::{LabSelector, Priority, Sender, Urgency};
use ipc::message::{Body, Message};
use shared::Hospital;

const COMPONENT: &str = "SURGERY";

/// How long a worker waits for its dependencies before parking the
/// surgery on the pending list.
pub const INITIAL_DEPENDENCY_TIMEOUT_TICKS: u64 = 150;

/// Pending surgeries older than this are cancelled by the sweep.
pub const MAX_WAIT_DEPENDENCIES_TICKS: u64 = 8000;

/// Bounded wait for detached workers at shutdown.
pub const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunable hold bounds, spec defaults. Tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub initial_dependency_ticks: u64,
    pub max_wait_dependencies_ticks: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            initial_dependency_ticks: INITIAL_DEPENDENCY_TIMEOUT_TICKS,
            max_wait_dependencies_ticks: MAX_WAIT_DEPENDENCIES_TICKS,
        }
    }
}

pub struct SurgeryHandle {
    dispatcher: JoinHandle<()>,
    registry: Arc<Registry>,
}

impl SurgeryHandle {
    /// Join the dispatcher, then give detached workers a bounded window
    /// to drain. Returns whether every worker exited in time.
    pub fn join(self) -> bool {
        let _ = self.dispatcher.join();
        self.registry.wait_workers_idle(WORKER_DRAIN_TIMEOUT)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

pub fn spawn(hospital: Arc<Hospital>) -> SurgeryHandle {
    spawn_with_timeouts(hospital, Timeouts::default())
}

pub fn spawn_with_timeouts(hospital: Arc<Hospital>, timeouts: Timeouts) -> SurgeryHandle {
    let registry = Arc::new(Registry::new());
    let dispatcher = {
        let (h, reg) = (Arc::clone(&hospital), Arc::clone(&registry));
        std::thread::Builder::new()
            .name("surgery-dispatcher".to_string())
            .spawn(move || run_dispatcher(&h, &reg, timeouts))
            .expect("spawn surgery dispatcher")
    };
    hospital.log.log(
        Severity::Info,
        COMPONENT,
        "STARTUP",
        "surgery dispatcher started",
    );
    SurgeryHandle {
        dispatcher,
        registry,
    }
}

// === Dispatcher ===

fn run_dispatcher(hospital: &Arc<Hospital>, registry: &Arc<Registry>, timeouts: Timeouts) {
    loop {
        let Some(msg) = hospital.mail.surgery.recv_any() else {
            break;
        };
        match msg.body {
            Body::Shutdown => {
                hospital.log.log(
                    Severity::Info,
                    COMPONENT,
                    "SHUTDOWN_RECV",
                    "shutdown message received",
                );
                break;
            }
            Body::NewSurgery {
                scheduled_tick,
                surgery_type,
                urgency,
                estimated_duration,
                tests,
                meds,
            } => {
                let info = SurgeryInfo {
                    surgery_id: registry.alloc_surgery_id(),
                    patient_id: msg.patient_id,
                    surgery_type,
                    urgency,
                    scheduled_tick,
                    estimated_duration,
                    tests,
                    meds,
                };
                admit_surgery(hospital, registry, timeouts, info, false);
            }
            Body::LabResultsReady { .. } => {
                handle_response(hospital, registry, timeouts, msg.operation_id, Dependency::Tests)
            }
            Body::PharmReady { .. } => {
                handle_response(hospital, registry, timeouts, msg.operation_id, Dependency::Meds)
            }
            _ => {
                hospital.log.log(
                    Severity::Warning,
                    COMPONENT,
                    "UNKNOWN_MSG",
                    &format!("unexpected {:?} record", msg.body.kind()),
                );
            }
        }

        for entry in registry.sweep_pending(
            hospital.clock.now(),
            timeouts.max_wait_dependencies_ticks,
        ) {
            hospital.stats.surgery_cancelled();
            hospital.log.log(
                Severity::Warning,
                COMPONENT,
                "SURGERY_CANCELLED",
                &format!(
                    "surgery {} for {} expired waiting on dependencies",
                    entry.info.surgery_id, entry.info.patient_id
                ),
            );
        }
    }

    registry.broadcast_all();
    hospital.block.teams.broadcast();
}

fn admit_surgery(
    hospital: &Arc<Hospital>,
    registry: &Arc<Registry>,
    timeouts: Timeouts,
    info: SurgeryInfo,
    resumed: bool,
) {
    let surgery_id = info.surgery_id;
    let patient_id = info.patient_id.clone();
    // A resumed record starts with its dependencies already satisfied.
    let surgery = registry.register(info, resumed, resumed);

    let urgency = surgery.info.urgency.name();
    hospital.log.log(
        Severity::Info,
        COMPONENT,
        if resumed { "SURGERY_RESUMED" } else { "TASK_RECEIVED" },
        &format!("surgery {surgery_id} for {patient_id} (urgency {urgency})"),
    );

    // Count the worker before the thread starts so a shutdown arriving
    // between spawn and first instruction still waits for it.
    registry.worker_started();
    let spawned = {
        let (h, reg) = (Arc::clone(hospital), Arc::clone(registry));
        std::thread::Builder::new()
            .name(format!("surgery-{surgery_id}"))
            .spawn(move || {
                run_worker(&h, &reg, &surgery, timeouts, resumed);
                reg.worker_finished();
            })
    };
    if spawned.is_err() {
        registry.worker_finished();
        registry.unregister(surgery_id);
        hospital.stats.surgery_cancelled();
        hospital.log.log(
            Severity::Error,
            COMPONENT,
            "THREAD_FAIL",
            &format!("failed to start worker for surgery {surgery_id}"),
        );
    }
}

fn handle_response(
    hospital: &Arc<Hospital>,
    registry: &Arc<Registry>,
    timeouts: Timeouts,
    surgery_id: u32,
    dep: Dependency,
) {
    if let Some(surgery) = registry.find_active(surgery_id) {
        let mut flags = surgery.flags.lock();
        match dep {
            Dependency::Tests => flags.tests_done = true,
            Dependency::Meds => flags.meds_ok = true,
        }
        surgery.cond.notify_all();
        drop(flags);
        hospital.log.log(
            Severity::Info,
            COMPONENT,
            match dep {
                Dependency::Tests => "LAB_RESPONSE",
                Dependency::Meds => "PHARM_RESPONSE",
            },
            &format!("surgery {surgery_id} ({})", surgery.info.patient_id),
        );
        return;
    }

    match registry.settle_pending(surgery_id, dep) {
        PendingOutcome::Resumable(entry) => {
            admit_surgery(hospital, registry, timeouts, entry.info, true);
        }
        PendingOutcome::Updated => {
            hospital.log.log(
                Severity::Info,
                COMPONENT,
                "PENDING_UPDATED",
                &format!("surgery {surgery_id} still missing a dependency"),
            );
        }
        PendingOutcome::Unknown => {
            hospital.log.log(
                Severity::Warning,
                COMPONENT,
                "ORPHAN_RESPONSE",
                &format!("response for unknown surgery {surgery_id}"),
            );
        }
    }
}

// === Worker state machine ===

enum WaitOutcome {
    Satisfied,
    TimedOut,
    Shutdown,
}

fn run_worker(
    hospital: &Arc<Hospital>,
    registry: &Arc<Registry>,
    surgery: &ActiveSurgery,
    timeouts: Timeouts,
    resumed: bool,
) {
    let info = &surgery.info;

    if !resumed {
        if !send_dependency_requests(hospital, surgery) {
            cancel_surgery(hospital, registry, surgery);
            return;
        }
        match wait_for_dependencies(hospital, surgery, timeouts.initial_dependency_ticks) {
            WaitOutcome::Satisfied => {}
            WaitOutcome::TimedOut => {
                let parked = registry.move_to_pending(
                    surgery,
                    hospital.clock.now(),
                    hospital.config.max_surgeries_pending,
                );
                if parked {
                    hospital.log.log(
                        Severity::Warning,
                        COMPONENT,
                        "SURGERY_HELD",
                        &format!(
                            "surgery {} for {} moved to pending",
                            info.surgery_id, info.patient_id
                        ),
                    );
                } else {
                    hospital.stats.surgery_cancelled();
                    hospital.log.log(
                        Severity::Warning,
                        COMPONENT,
                        "PENDING_FULL",
                        &format!(
                            "surgery {} for {} cancelled, pending list full",
                            info.surgery_id, info.patient_id
                        ),
                    );
                }
                return;
            }
            WaitOutcome::Shutdown => {
                cancel_surgery(hospital, registry, surgery);
                return;
            }
        }
    }

    // Wait for the scheduled tick.
    while hospital.clock.now() < info.scheduled_tick {
        if hospital.shutdown.is_set() {
            cancel_surgery(hospital, registry, surgery);
            return;
        }
        hospital.clock.wait_units(&hospital.shutdown, 1);
    }

    // Room first, team second — one global order, no circular waits.
    let room_gate = hospital.gates.room(info.surgery_type);
    if !room_gate.acquire() {
        cancel_surgery(hospital, registry, surgery);
        return;
    }
    let room = hospital.block.room(info.surgery_type.room_index());
    let entered = hospital.clock.now();
    room.occupy(
        &info.patient_id,
        entered,
        entered + info.estimated_duration,
    );
    hospital.log.log(
        Severity::Info,
        COMPONENT,
        "ROOM_ACQUIRED",
        &format!("{} acquired for {}", info.surgery_type.room_name(), info.patient_id),
    );

    if !hospital.block.teams.acquire() {
        room.set_free();
        room_gate.release();
        cancel_surgery(hospital, registry, surgery);
        return;
    }
    hospital.log.log(
        Severity::Info,
        COMPONENT,
        "TEAM_ACQUIRED",
        &format!(
            "team acquired for {} ({} left)",
            info.patient_id,
            hospital.block.teams.available()
        ),
    );
    hospital
        .stats
        .surgery_wait(entered.saturating_sub(info.scheduled_tick));

    // Run the surgery.
    let (lo, hi) = hospital
        .config
        .bo_duration_range(info.surgery_type.room_index());
    let duration = fastrand::u64(lo..=hi);
    hospital.log.log(
        Severity::Info,
        COMPONENT,
        "SURGERY_START",
        &format!(
            "{} in {} for {duration} units",
            info.patient_id,
            info.surgery_type.room_name()
        ),
    );
    hospital.clock.wait_units(&hospital.shutdown, duration);
    hospital
        .stats
        .surgery_performed(info.surgery_type.room_index(), duration);

    hospital.block.teams.release();
    hospital.log.log(
        Severity::Info,
        COMPONENT,
        "TEAM_RELEASED",
        &format!("team released after {}", info.patient_id),
    );

    // Cleanup phase, then hand the room back.
    room.begin_cleaning();
    let cleanup = fastrand::u64(hospital.config.cleanup_min_time..=hospital.config.cleanup_max_time);
    hospital.clock.wait_units(&hospital.shutdown, cleanup);
    room.set_free();
    room_gate.release();
    hospital.log.log(
        Severity::Info,
        COMPONENT,
        "ROOM_RELEASED",
        &format!("{} released after {}", info.surgery_type.room_name(), info.patient_id),
    );

    surgery.flags.lock().active = false;
    registry.unregister(info.surgery_id);
    hospital.stats.surgery_completed();
    hospital.log.log(
        Severity::Info,
        COMPONENT,
        "WORKFLOW_COMPLETE",
        &format!("surgery workflow complete for {}", info.patient_id),
    );
}

/// Fire the async Lab and Pharmacy requests tagged with the surgery id.
/// Returns false when nothing could be sent.
fn send_dependency_requests(hospital: &Hospital, surgery: &ActiveSurgery) -> bool {
    let info = &surgery.info;
    let priority = match info.urgency {
        Urgency::High => Priority::Urgent,
        Urgency::Medium => Priority::High,
        Urgency::Low => Priority::Normal,
    };
    let now = hospital.clock.now();
    let mut ok = true;

    if !info.tests.is_empty() {
        let request = Message {
            priority,
            patient_id: info.patient_id.clone(),
            operation_id: info.surgery_id,
            timestamp: now,
            body: Body::LabRequest {
                tests: info.tests.clone(),
                lab: LabSelector::Both,
                sender: Sender::Surgery,
            },
        };
        if let Err(err) = hospital.mail.lab.send(request) {
            hospital.log.log(
                Severity::Error,
                COMPONENT,
                "LAB_REQUEST_FAIL",
                &format!("{}: {err}", info.patient_id),
            );
            ok = false;
        }
    }

    if !info.meds.is_empty() {
        let request = Message {
            priority,
            patient_id: info.patient_id.clone(),
            operation_id: info.surgery_id,
            timestamp: now,
            body: Body::PharmacyRequest {
                items: info.meds.iter().map(|&med| (med, 1)).collect(),
                sender: Sender::Surgery,
            },
        };
        if let Err(err) = hospital.mail.pharmacy.send(request) {
            hospital.log.log(
                Severity::Error,
                COMPONENT,
                "PHARM_REQUEST_FAIL",
                &format!("{}: {err}", info.patient_id),
            );
            ok = false;
        }
    }

    ok
}

/// Wait on the record's condvar until both dependencies are satisfied,
/// the initial timeout elapses, or shutdown fires.
fn wait_for_dependencies(
    hospital: &Hospital,
    surgery: &ActiveSurgery,
    timeout_ticks: u64,
) -> WaitOutcome {
    let deadline = Instant::now() + hospital.clock.units_to_duration(timeout_ticks);
    let mut flags = surgery.flags.lock();
    loop {
        if flags.satisfied() {
            hospital.log.log(
                Severity::Info,
                COMPONENT,
                "DEPS_READY",
                &surgery.info.patient_id,
            );
            return WaitOutcome::Satisfied;
        }
        if hospital.shutdown.is_set() {
            return WaitOutcome::Shutdown;
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        surgery
            .cond
            .wait_for(&mut flags, (deadline - now).min(CANCEL_POLL));
    }
}

fn cancel_surgery(hospital: &Hospital, registry: &Registry, surgery: &ActiveSurgery) {
    surgery.flags.lock().active = false;
    registry.unregister(surgery.info.surgery_id);
    hospital.stats.surgery_cancelled();
    hospital.log.log(
        Severity::Warning,
        COMPONENT,
        "SURGERY_CANCELLED",
        &format!("surgery cancelled for {}", surgery.info.patient_id),
    );
}
