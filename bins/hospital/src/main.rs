//! hospital — the coordinator daemon.
//!
//! Loads the configuration, brings up the shared state and the four
//! subsystem dispatchers, then runs the coordinator loop until SHUTDOWN
//! (command or signal). Commands arrive on stdin and on the `input_pipe`
//! FIFO, one per line.

mod coordinator;
mod input;
mod signals;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, Level};

use common::config::SystemConfig;
use common::log::{EventLog, Severity};
use shared::{Hospital, HospitalPaths};

const LOG_FILE: &str = "logs/hospital_log.log";
const INPUT_FIFO: &str = "input_pipe";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/config.txt".to_string());
    let config = SystemConfig::load(Path::new(&config_path))
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    info!(
        "Configuration loaded: {} medications, time unit {} ms",
        config.medications.len(),
        config.time_unit_ms
    );

    let log = EventLog::open(Path::new(LOG_FILE))?;
    let paths = HospitalPaths::default();
    std::fs::create_dir_all(&paths.results_dir)
        .with_context(|| format!("failed to create {}", paths.results_dir.display()))?;

    let hospital = Hospital::new(config, log, paths);
    hospital
        .log
        .log(Severity::Info, "MANAGER", "STARTUP", "hospital system booting");

    // Signal self-pipe and command FIFO before the subsystems, so nothing
    // starts without a working shutdown path.
    let signal_fd = signals::install(&[
        libc::SIGINT,
        libc::SIGTERM,
        libc::SIGUSR1,
        libc::SIGUSR2,
    ])?;
    let fifo_path = Path::new(INPUT_FIFO);
    let fifo_fd = input::open_command_fifo(fifo_path)?;

    let triage = triage::spawn(Arc::clone(&hospital));
    let surgery = surgery::spawn(Arc::clone(&hospital));
    let pharmacy = pharmacy::spawn(Arc::clone(&hospital));
    let lab = lab::spawn(Arc::clone(&hospital));
    let monitor = coordinator::spawn_notification_monitor(Arc::clone(&hospital))?;

    coordinator::Coordinator::new(Arc::clone(&hospital), signal_fd, fifo_fd).run();

    // --- Shutdown sequence ---
    hospital
        .log
        .log(Severity::Info, "MANAGER", "SHUTDOWN", "stopping subsystems");
    hospital.shutdown.set();

    // One poison pill per blocked reader: two triage intakes, the triage
    // correlator and the notification monitor share Responses.
    hospital.mail.triage.send_poison();
    hospital.mail.triage.send_poison();
    hospital.mail.surgery.send_poison();
    hospital.mail.pharmacy.send_poison();
    hospital.mail.lab.send_poison();
    hospital.mail.responses.send_poison();
    hospital.mail.responses.send_poison();
    hospital.block.teams.broadcast();

    triage.join();
    if !surgery.join() {
        hospital.log.log(
            Severity::Warning,
            "MANAGER",
            "SHUTDOWN_TIMEOUT",
            "surgery workers still running after drain window",
        );
    }
    if !pharmacy.join() {
        hospital.log.log(
            Severity::Warning,
            "MANAGER",
            "SHUTDOWN_TIMEOUT",
            "pharmacy workers still running after drain window",
        );
    }
    lab.join();
    let _ = monitor.join();

    input::remove_fifo(fifo_path);
    hospital
        .log
        .log(Severity::Info, "MANAGER", "SHUTDOWN", "hospital system stopped");
    info!("Shutdown complete");
    Ok(())
}
