//! The coordinator loop: owns the clock and the deferred-event scheduler,
//! multiplexes command input (stdin + FIFO) with the signal self-pipe,
//! and orchestrates graceful shutdown.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;

use command::Action;
use common::log::Severity;
use ipc::message::{Body, Kind, COORDINATOR_OP_MIN};
use ipc::DeferredScheduler;
use shared::report;
use shared::Hospital;

use crate::input::LineReader;
use crate::signals;

const COMPONENT: &str = "MANAGER";

/// Poll timeout ceiling; keeps the loop responsive to the shutdown flag.
const MAX_POLL_MS: i32 = 100;

pub struct Coordinator {
    hospital: Arc<Hospital>,
    scheduler: DeferredScheduler,
    signal_fd: RawFd,
    stdin: LineReader,
    fifo: LineReader,
    shutdown_requested: bool,
}

impl Coordinator {
    pub fn new(hospital: Arc<Hospital>, signal_fd: RawFd, fifo_fd: RawFd) -> Self {
        Coordinator {
            hospital,
            scheduler: DeferredScheduler::new(),
            signal_fd,
            stdin: LineReader::new(libc::STDIN_FILENO),
            fifo: LineReader::new(fifo_fd),
            shutdown_requested: false,
        }
    }

    /// Run until a shutdown is requested via command or signal.
    pub fn run(&mut self) {
        self.hospital.log.log(
            Severity::Info,
            COMPONENT,
            "READY",
            "coordinator loop started; type HELP for commands",
        );

        while !self.shutdown_requested {
            let now = self.hospital.publish_time();
            self.scheduler.drain(now);

            let timeout = self.poll_timeout_ms(now);
            let mut fds = [
                poll_entry(self.signal_fd),
                poll_entry(self.stdin.fd()),
                poll_entry(self.fifo.fd()),
            ];
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue; // interrupted: signal byte is on the pipe
                }
                self.hospital.stats.system_error();
                self.hospital.log.log(
                    Severity::Error,
                    COMPONENT,
                    "POLL_FAIL",
                    &err.to_string(),
                );
                break;
            }

            if fds[0].revents & libc::POLLIN != 0 {
                self.handle_signals();
            }
            if fds[1].revents & libc::POLLIN != 0 {
                for line in self.stdin.drain_lines() {
                    self.handle_command(&line);
                }
            }
            if fds[2].revents & libc::POLLIN != 0 {
                for line in self.fifo.drain_lines() {
                    self.handle_command(&line);
                }
            }
        }
    }

    /// Sleep until the next deferred event is due, bounded by the
    /// cancellation poll interval.
    fn poll_timeout_ms(&self, now: u64) -> i32 {
        match self.scheduler.next_due() {
            Some(due) => {
                let ticks = due.saturating_sub(now);
                let ms = ticks.saturating_mul(self.hospital.clock.time_unit_ms());
                (ms.min(MAX_POLL_MS as u64)) as i32
            }
            None => MAX_POLL_MS,
        }
    }

    fn handle_command(&mut self, line: &str) {
        if command::handle_line(&self.hospital, &mut self.scheduler, line) == Action::Shutdown {
            self.shutdown_requested = true;
        }
    }

    fn handle_signals(&mut self) {
        for sig in signals::drain(self.signal_fd) {
            match sig {
                libc::SIGINT | libc::SIGTERM => {
                    self.hospital.log.log(
                        Severity::Info,
                        COMPONENT,
                        "SIGNAL_SHUTDOWN",
                        &format!("signal {sig} received"),
                    );
                    self.shutdown_requested = true;
                }
                libc::SIGUSR1 => {
                    let text = report::render_console(
                        &self.hospital.stats.snapshot(),
                        &self.hospital.config,
                        self.hospital.stats.started(),
                        report::StatusFilter::All,
                    );
                    println!("{text}");
                }
                libc::SIGUSR2 => match report::write_snapshot(
                    &self.hospital.stats.snapshot(),
                    &self.hospital.config,
                    self.hospital.stats.started(),
                    &self.hospital.paths.results_dir,
                ) {
                    Ok(path) => self.hospital.log.log(
                        Severity::Info,
                        "STATS",
                        "SNAPSHOT",
                        &format!("snapshot written to {}", path.display()),
                    ),
                    Err(err) => self.hospital.log.log(
                        Severity::Error,
                        "STATS",
                        "SNAPSHOT_FAIL",
                        &format!("{err:#}"),
                    ),
                },
                other => self.hospital.log.log(
                    Severity::Debug,
                    COMPONENT,
                    "SIGNAL_IGNORED",
                    &format!("signal {other}"),
                ),
            }
        }
    }
}

fn poll_entry(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

/// Notification monitor: consumes responses to coordinator-issued
/// requests (correlation lane >= 2000) and logs their outcomes.
pub fn spawn_notification_monitor(hospital: Arc<Hospital>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("coordinator-notify".to_string())
        .spawn(move || loop {
            let Some(msg) = hospital
                .mail
                .responses
                .recv_from_correlation(COORDINATOR_OP_MIN)
            else {
                break;
            };
            if msg.kind() == Kind::Shutdown {
                break;
            }
            match msg.body {
                Body::PharmReady { success } => hospital.log.log(
                    Severity::Info,
                    COMPONENT,
                    "PHARMACY_NOTIFY",
                    &format!(
                        "{}: pharmacy request {}",
                        msg.patient_id,
                        if success { "fulfilled" } else { "failed" }
                    ),
                ),
                Body::LabResultsReady { code } => hospital.log.log(
                    Severity::Info,
                    COMPONENT,
                    "LAB_NOTIFY",
                    &format!(
                        "{}: lab request {}",
                        msg.patient_id,
                        if code == 0 { "completed" } else { "failed" }
                    ),
                ),
                _ => hospital.log.log(
                    Severity::Warning,
                    COMPONENT,
                    "UNEXPECTED_RESPONSE",
                    &format!("op {}", msg.operation_id),
                ),
            }
        })?;
    Ok(handle)
}
