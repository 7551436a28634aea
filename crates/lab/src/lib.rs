//! Laboratory dispatcher.
//!
//! The dispatcher reads the Lab mailbox in priority order and feeds a
//! bounded FIFO job queue consumed by a fixed pool of workers. Single-lab
//! tests run under their bench semaphore; PREOP samples a total duration,
//! runs half on Lab1, releases it, then runs half on Lab2 — the two
//! benches are never held together.

mod queue;

pub use queue::{JobQueue, LabJob};

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use chrono::Local;

use common::log::Severity;
use common::types::{LabBench, Priority, TestKind};
use ipc::message::{Body, Message};
use ipc::routing::route_response;
use shared::Hospital;

const COMPONENT: &str = "LAB";

/// Fixed worker pool size.
pub const LAB_POOL_SIZE: usize = 5;

/// Jobs the dispatcher may buffer ahead of the pool.
pub const JOB_QUEUE_CAPACITY: usize = 64;

/// PREOP total duration range (ticks), split evenly across the benches.
pub const PREOP_MIN_DURATION: u64 = 20;
pub const PREOP_MAX_DURATION: u64 = 40;

pub struct LabHandle {
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    jobs: Arc<JobQueue>,
}

impl LabHandle {
    pub fn join(self) {
        let _ = self.dispatcher.join();
        self.jobs.broadcast();
        for worker in self.workers {
            let _ = worker.join();
        }
    }

    pub fn jobs(&self) -> &Arc<JobQueue> {
        &self.jobs
    }
}

pub fn spawn(hospital: Arc<Hospital>) -> LabHandle {
    spawn_pool(hospital, LAB_POOL_SIZE)
}

/// Pool-size override for harnesses that need a starved laboratory.
pub fn spawn_pool(hospital: Arc<Hospital>, pool_size: usize) -> LabHandle {
    let jobs = Arc::new(JobQueue::new(
        JOB_QUEUE_CAPACITY,
        Arc::clone(&hospital.shutdown),
    ));

    let dispatcher = {
        let (h, q) = (Arc::clone(&hospital), Arc::clone(&jobs));
        std::thread::Builder::new()
            .name("lab-dispatcher".to_string())
            .spawn(move || run_dispatcher(&h, &q))
            .expect("spawn lab dispatcher")
    };

    let workers = (0..pool_size)
        .map(|i| {
            let (h, q) = (Arc::clone(&hospital), Arc::clone(&jobs));
            std::thread::Builder::new()
                .name(format!("lab-worker-{i}"))
                .spawn(move || run_pool_worker(&h, &q))
                .expect("spawn lab worker")
        })
        .collect();

    hospital
        .log
        .log(Severity::Info, COMPONENT, "STARTUP", "lab dispatcher started");
    LabHandle {
        dispatcher,
        workers,
        jobs,
    }
}

fn run_dispatcher(hospital: &Hospital, jobs: &JobQueue) {
    loop {
        let Some(msg) = hospital.mail.lab.recv_any() else {
            break;
        };
        let patient_id = msg.patient_id;
        let kind = msg.body.kind();
        let Body::LabRequest { tests, sender, .. } = msg.body else {
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

        if msg.priority == Priority::Urgent {
            hospital.stats.urgent_lab_test();
        }

        let accepted = jobs.push(LabJob {
            patient_id: patient_id.clone(),
            operation_id: msg.operation_id,
            priority: msg.priority,
            submitted_tick: msg.timestamp,
            tests,
            sender,
        });
        if !accepted {
            hospital.log.log(
                Severity::Warning,
                COMPONENT,
                "JOB_DROPPED",
                &format!("{patient_id} dropped during shutdown"),
            );
        }
    }
    jobs.broadcast();
}

fn run_pool_worker(hospital: &Hospital, jobs: &JobQueue) {
    while let Some(job) = jobs.pop() {
        process_job(hospital, job);
    }
}

enum TestOutcome {
    Done(Vec<(TestKind, u64)>),
    Aborted,
}

fn process_job(hospital: &Hospital, job: LabJob) {
    match run_tests(hospital, &job) {
        TestOutcome::Done(results) => {
            if let Err(err) = write_results_file(hospital, &job, &results) {
                hospital.stats.system_error();
                hospital.log.log(
                    Severity::Error,
                    COMPONENT,
                    "FILE_ERROR",
                    &format!("results for {}: {err:#}", job.patient_id),
                );
            }
            send_results(hospital, &job, 0);
        }
        TestOutcome::Aborted => {
            if hospital.shutdown.is_set() {
                return; // workflow cancelled, response dropped
            }
            send_results(hospital, &job, -1);
        }
    }
}

/// Run every test of the job in order. Returns the per-test durations, or
/// `Aborted` when a bench could not be acquired.
fn run_tests(hospital: &Hospital, job: &LabJob) -> TestOutcome {
    let mut results = Vec::with_capacity(job.tests.len());

    for &test in &job.tests {
        match test.bench() {
            Some(bench) => {
                let (lo, hi) = bench_duration_range(hospital, bench);
                let gate = hospital.gates.bench(bench);
                if !gate.acquire() {
                    return TestOutcome::Aborted;
                }
                let duration = fastrand::u64(lo..=hi);
                hospital.clock.wait_units(&hospital.shutdown, duration);
                gate.release();
                hospital.stats.lab_test(bench, duration);
                results.push((test, duration));
            }
            None => {
                // PREOP: both benches in sequence, Lab1 strictly released
                // before Lab2 is requested.
                let total = fastrand::u64(PREOP_MIN_DURATION..=PREOP_MAX_DURATION);
                let first_half = total / 2;
                let second_half = total - first_half;

                let lab1 = hospital.gates.bench(LabBench::Lab1);
                if !lab1.acquire() {
                    return TestOutcome::Aborted;
                }
                hospital.clock.wait_units(&hospital.shutdown, first_half);
                lab1.release();

                let lab2 = hospital.gates.bench(LabBench::Lab2);
                if !lab2.acquire() {
                    return TestOutcome::Aborted;
                }
                hospital.clock.wait_units(&hospital.shutdown, second_half);
                lab2.release();

                hospital.stats.preop_test(first_half, second_half);
                results.push((test, total));
            }
        }
        if hospital.shutdown.is_set() {
            return TestOutcome::Aborted;
        }
    }

    TestOutcome::Done(results)
}

fn bench_duration_range(hospital: &Hospital, bench: LabBench) -> (u64, u64) {
    match bench {
        LabBench::Lab1 => (
            hospital.config.lab1_min_duration,
            hospital.config.lab1_max_duration,
        ),
        LabBench::Lab2 => (
            hospital.config.lab2_min_duration,
            hospital.config.lab2_max_duration,
        ),
    }
}

fn send_results(hospital: &Hospital, job: &LabJob, code: i32) {
    let response = Message {
        priority: job.priority,
        patient_id: job.patient_id.clone(),
        operation_id: job.operation_id,
        timestamp: hospital.clock.now(),
        body: Body::LabResultsReady { code },
    };
    match route_response(&hospital.mail, job.sender, response) {
        Ok(()) => {
            hospital
                .stats
                .lab_turnaround(hospital.clock.now().saturating_sub(job.submitted_tick));
            hospital.log.log(
                Severity::Info,
                COMPONENT,
                if code == 0 { "RESULTS_READY" } else { "RESULTS_FAILED" },
                &format!(
                    "{} (op {}, for {})",
                    job.patient_id,
                    job.operation_id,
                    job.sender.name()
                ),
            );
        }
        Err(err) => {
            hospital.stats.system_error();
            hospital.log.log(
                Severity::Error,
                COMPONENT,
                "RESPONSE_FAIL",
                &format!("{}: {err}", job.patient_id),
            );
        }
    }
}

/// `results/lab_results/<patient_id>_<epoch>.txt`
fn write_results_file(
    hospital: &Hospital,
    job: &LabJob,
    results: &[(TestKind, u64)],
) -> Result<()> {
    let dir = hospital.paths.lab_results_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let now = Local::now();
    let path = dir.join(format!("{}_{}.txt", job.patient_id, now.timestamp()));

    let mut content = String::new();
    content.push_str("=== LABORATORY RESULTS ===\n");
    content.push_str(&format!("Patient: {}\n", job.patient_id));
    content.push_str(&format!("Operation: {}\n", job.operation_id));
    content.push_str(&format!(
        "Completed at: {} (tick {})\n",
        now.format("%Y-%m-%d %H:%M:%S"),
        hospital.clock.now()
    ));
    content.push_str("Tests:\n");
    for (test, duration) in results {
        content.push_str(&format!("  {test}: OK ({duration} units)\n"));
    }

    std::fs::write(&path, content)
        .with_context(|| format!("failed to write {}", path.display()))
}
