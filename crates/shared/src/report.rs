//! Statistics rendering — console report (STATUS / SIGUSR1) and the
//! snapshot file with ASCII bar charts (SIGUSR2).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use common::config::SystemConfig;

use crate::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Triage,
    Surgery,
    Pharmacy,
    Lab,
}

impl StatusFilter {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ALL" => Some(StatusFilter::All),
            "TRIAGE" => Some(StatusFilter::Triage),
            "SURGERY" => Some(StatusFilter::Surgery),
            "PHARMACY" => Some(StatusFilter::Pharmacy),
            "LAB" => Some(StatusFilter::Lab),
            _ => None,
        }
    }
}

const ROOM_LABELS: [&str; 3] = ["BO1 (Cardiology)", "BO2 (Orthopedics)", "BO3 (Neurology)"];

fn avg(total: f64, count: u64) -> f64 {
    if count > 0 {
        total / count as f64
    } else {
        0.0
    }
}

fn sim_time(stats: &Stats) -> f64 {
    if stats.simulation_time_units > 0 {
        stats.simulation_time_units as f64
    } else {
        1.0
    }
}

/// Top-3 medications by dispensed units: (catalog index, count), desc.
fn top_medications(stats: &Stats) -> Vec<(usize, u64)> {
    let mut ranked: Vec<(usize, u64)> = stats
        .medication_usage
        .iter()
        .copied()
        .enumerate()
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(3);
    ranked
}

pub fn render_console(
    stats: &Stats,
    config: &SystemConfig,
    started: DateTime<Local>,
    filter: StatusFilter,
) -> String {
    let now = Local::now();
    let elapsed_seconds = (now - started).num_seconds().max(0);
    let elapsed_minutes = if elapsed_seconds > 0 {
        elapsed_seconds as f64 / 60.0
    } else {
        1.0
    };
    let sim = sim_time(stats);

    let show_all = filter == StatusFilter::All;
    let mut out = String::new();

    let _ = writeln!(out, "\n==========================================");
    let _ = writeln!(out, "HOSPITAL SYSTEM STATISTICS");
    let _ = writeln!(out, "==========================================");
    let _ = writeln!(out, "Timestamp: {}", now.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(
        out,
        "Operation Time: {elapsed_seconds} seconds ({elapsed_minutes:.0} minutes)"
    );

    if show_all || filter == StatusFilter::Triage {
        let occupancy = {
            let capacity = elapsed_seconds as f64 * config.triage_simultaneous_patients as f64;
            if capacity > 0.0 {
                stats.total_triage_usage_time / capacity * 100.0
            } else {
                0.0
            }
        };
        let _ = writeln!(out, "TRIAGE CENTER ------------------");
        let _ = writeln!(out, "Total Emergencies: {}", stats.total_emergency_patients);
        let _ = writeln!(out, "Total Appointments: {}", stats.total_appointments);
        let _ = writeln!(
            out,
            "Avg Wait Time (Emerg.): {:.1} tu",
            avg(stats.total_emergency_wait_time, stats.completed_emergencies)
        );
        let _ = writeln!(
            out,
            "Avg Wait Time (Appt.): {:.1} tu",
            avg(
                stats.total_appointment_wait_time,
                stats.completed_appointments
            )
        );
        let _ = writeln!(out, "Transferred Patients: {}", stats.critical_transfers);
        let _ = writeln!(out, "Rejected Patients: {}", stats.rejected_patients);
        let _ = writeln!(out, "Occupancy Rate: {occupancy:.1}%");
    }

    if show_all || filter == StatusFilter::Surgery {
        let _ = writeln!(out, "OPERATING BLOCKS ------------------");
        for i in 0..3 {
            let _ = writeln!(out, "{}:", ROOM_LABELS[i]);
            let _ = writeln!(
                out,
                "  Surgeries: {} | Avg Time: {:.1} tu | Utilization: {:.1}%",
                stats.total_surgeries_bo[i],
                avg(stats.bo_utilization_time[i], stats.total_surgeries_bo[i]),
                stats.bo_utilization_time[i] / sim * 100.0
            );
        }
        let _ = writeln!(out, "Cancelled Surgeries: {}", stats.cancelled_surgeries);
        let _ = writeln!(
            out,
            "Avg Wait Time: {:.1} tu",
            avg(stats.total_surgery_wait_time, stats.completed_surgeries)
        );
    }

    if show_all || filter == StatusFilter::Pharmacy {
        let _ = writeln!(out, "CENTRAL PHARMACY ----------------");
        let _ = writeln!(out, "Total Requests: {}", stats.total_pharmacy_requests);
        let _ = writeln!(out, "Urgent Requests: {}", stats.urgent_requests);
        let _ = writeln!(
            out,
            "Avg Response Time: {:.1} tu",
            avg(
                stats.total_pharmacy_response_time,
                stats.total_pharmacy_requests
            )
        );
        let _ = writeln!(out, "Stock Restocks: {}", stats.auto_restocks);
        let _ = writeln!(out, "Depletions: {}", stats.stock_depletions);
        let _ = writeln!(out, "Top Medicines:");
        for (rank, (med, count)) in top_medications(stats).into_iter().enumerate() {
            let name = config
                .medications
                .get(med)
                .map(|m| m.name.as_str())
                .unwrap_or("?");
            let _ = writeln!(out, "  {}. {name}: {count} units", rank + 1);
        }
    }

    if show_all || filter == StatusFilter::Lab {
        let util_lab1 =
            stats.total_lab1_time / (sim * config.max_simultaneous_tests_lab1 as f64) * 100.0;
        let util_lab2 =
            stats.total_lab2_time / (sim * config.max_simultaneous_tests_lab2 as f64) * 100.0;
        let total_tests = stats.total_lab_tests_lab1 + stats.total_lab_tests_lab2;

        let _ = writeln!(out, "LABORATORIES ------------");
        let _ = writeln!(
            out,
            "LAB1: {} tests | Avg Time: {:.1} tu | Utilization: {:.1}%",
            stats.total_lab_tests_lab1,
            avg(stats.total_lab1_time, stats.total_lab_tests_lab1),
            util_lab1
        );
        let _ = writeln!(
            out,
            "LAB2: {} tests | Avg Time: {:.1} tu | Utilization: {:.1}%",
            stats.total_lab_tests_lab2,
            avg(stats.total_lab2_time, stats.total_lab_tests_lab2),
            util_lab2
        );
        let _ = writeln!(out, "Urgent Tests: {}", stats.urgent_lab_tests);
        let _ = writeln!(
            out,
            "Global Avg Turnaround: {:.1} tu",
            avg(stats.total_lab_turnaround_time, total_tests)
        );
    }

    if show_all {
        let throughput = stats.total_operations as f64 / elapsed_minutes;
        let success_rate = if stats.total_operations > 0 {
            (stats.total_operations.saturating_sub(stats.system_errors)) as f64
                / stats.total_operations as f64
                * 100.0
        } else {
            100.0
        };
        let _ = writeln!(out, "GLOBALS -------");
        let _ = writeln!(out, "Total Operations: {}", stats.total_operations);
        let _ = writeln!(out, "Throughput: {throughput:.1} ops/min");
        let _ = writeln!(out, "System Errors: {}", stats.system_errors);
        let _ = writeln!(out, "Success Rate: {success_rate:.1}%");
    }
    let _ = writeln!(out, "==========================================");
    out
}

fn bar(width: usize) -> String {
    "*".repeat(width)
}

pub fn render_snapshot(
    stats: &Stats,
    config: &SystemConfig,
    started: DateTime<Local>,
    now: DateTime<Local>,
) -> String {
    let elapsed_seconds = (now - started).num_seconds().max(0);
    let elapsed_minutes = if elapsed_seconds > 0 {
        elapsed_seconds as f64 / 60.0
    } else {
        1.0
    };
    let sim = sim_time(stats);

    let avg_wait_em = avg(stats.total_emergency_wait_time, stats.completed_emergencies);
    let avg_wait_app = avg(
        stats.total_appointment_wait_time,
        stats.completed_appointments,
    );
    let bo_util: Vec<f64> = (0..3)
        .map(|i| stats.bo_utilization_time[i] / sim * 100.0)
        .collect();
    let util_lab1 =
        stats.total_lab1_time / (sim * config.max_simultaneous_tests_lab1 as f64) * 100.0;
    let util_lab2 =
        stats.total_lab2_time / (sim * config.max_simultaneous_tests_lab2 as f64) * 100.0;
    let total_tests = stats.total_lab_tests_lab1 + stats.total_lab_tests_lab2;
    let occupancy = {
        let capacity = elapsed_seconds as f64 * config.triage_simultaneous_patients as f64;
        if capacity > 0.0 {
            stats.total_triage_usage_time / capacity * 100.0
        } else {
            0.0
        }
    };

    let mut out = String::new();
    let _ = writeln!(out, "==========================================");
    let _ = writeln!(out, "HOSPITAL SYSTEM STATISTICS SNAPSHOT");
    let _ = writeln!(out, "==========================================");
    let _ = writeln!(out, "Timestamp: {}", now.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(
        out,
        "System Uptime: {elapsed_seconds} seconds ({elapsed_minutes:.2} minutes)\n"
    );

    let _ = writeln!(out, "--- TRIAGE STATS ---");
    let _ = writeln!(out, "Total Emergencies: {}", stats.total_emergency_patients);
    let _ = writeln!(out, "Total Appointments: {}", stats.total_appointments);
    let _ = writeln!(out, "Avg Wait Time (Emerg): {avg_wait_em:.2} tu");
    let _ = writeln!(out, "Avg Wait Time (Appt): {avg_wait_app:.2} tu");
    let _ = writeln!(out, "Rejected Patients: {}", stats.rejected_patients);
    let _ = writeln!(out, "Occupancy Rate: {occupancy:.2}%\n");

    let _ = writeln!(out, "--- SURGERY STATS ---");
    for i in 0..3 {
        let _ = writeln!(
            out,
            "{}: {} surgeries | Utilization: {:.2}%",
            ROOM_LABELS[i], stats.total_surgeries_bo[i], bo_util[i]
        );
    }
    let _ = writeln!(out, "Cancelled Surgeries: {}\n", stats.cancelled_surgeries);

    let _ = writeln!(out, "--- PHARMACY STATS ---");
    let _ = writeln!(out, "Total Requests: {}", stats.total_pharmacy_requests);
    let _ = writeln!(out, "Stock Depletions: {}", stats.stock_depletions);
    let _ = writeln!(out, "Top 3 Medications:");
    for (rank, (med, count)) in top_medications(stats).into_iter().enumerate() {
        let name = config
            .medications
            .get(med)
            .map(|m| m.name.as_str())
            .unwrap_or("?");
        let _ = writeln!(out, "  {}. {name} ({count} units)", rank + 1);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "--- LABORATORY STATS ---");
    let _ = writeln!(
        out,
        "Lab 1 Tests: {} | Utilization: {util_lab1:.2}%",
        stats.total_lab_tests_lab1
    );
    let _ = writeln!(
        out,
        "Lab 2 Tests: {} | Utilization: {util_lab2:.2}%",
        stats.total_lab_tests_lab2
    );
    let _ = writeln!(
        out,
        "Avg Turnaround Time: {:.2} tu\n",
        avg(stats.total_lab_turnaround_time, total_tests)
    );

    let _ = writeln!(out, "--- COMPARATIVE CHARTS ---\n");

    // Chart 1: triage wait times, scaled relative to the larger bar
    let _ = writeln!(out, "1. Average Wait Times (Triage)");
    let max_wait = avg_wait_em.max(avg_wait_app).max(1.0);
    let _ = writeln!(
        out,
        "Emergency   [{avg_wait_em:5.1} tu]: {}",
        bar((avg_wait_em / max_wait * 40.0) as usize)
    );
    let _ = writeln!(
        out,
        "Appointment [{avg_wait_app:5.1} tu]: {}\n",
        bar((avg_wait_app / max_wait * 40.0) as usize)
    );

    // Chart 2: room utilization, one star per 2%
    let _ = writeln!(out, "2. Surgery Room Utilization (%)");
    let room_tags = ["BO1 (Cardio)", "BO2 (Ortho) ", "BO3 (Neuro) "];
    for i in 0..3 {
        let _ = writeln!(
            out,
            "{} [{:5.1}%]: {}",
            room_tags[i],
            bo_util[i],
            bar((bo_util[i] / 2.0) as usize)
        );
    }
    let _ = writeln!(out);

    // Chart 3: lab utilization, one star per 2%
    let _ = writeln!(out, "3. Laboratory Utilization (%)");
    let _ = writeln!(
        out,
        "Lab 1        [{util_lab1:5.1}%]: {}",
        bar((util_lab1 / 2.0) as usize)
    );
    let _ = writeln!(
        out,
        "Lab 2        [{util_lab2:5.1}%]: {}",
        bar((util_lab2 / 2.0) as usize)
    );

    out
}

/// Write a timestamped snapshot under `<results_dir>/stats_snapshots/`.
/// Returns the created path.
pub fn write_snapshot(
    stats: &Stats,
    config: &SystemConfig,
    started: DateTime<Local>,
    results_dir: &Path,
) -> Result<PathBuf> {
    let now = Local::now();
    let dir = results_dir.join("stats_snapshots");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create snapshot dir: {}", dir.display()))?;
    let path = dir.join(format!(
        "stats_snapshot_{}.txt",
        now.format("%Y%m%d_%H%M%S")
    ));
    std::fs::write(&path, render_snapshot(stats, config, started, now))
        .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_stats() -> Stats {
        let mut stats = Stats {
            medication_usage: vec![0; 15],
            ..Stats::default()
        };
        stats.total_emergency_patients = 4;
        stats.completed_emergencies = 2;
        stats.total_emergency_wait_time = 10.0;
        stats.total_surgeries_bo[0] = 2;
        stats.bo_utilization_time[0] = 80.0;
        stats.simulation_time_units = 200;
        stats.total_pharmacy_requests = 3;
        stats.medication_usage[2] = 9;
        stats.medication_usage[7] = 4;
        stats.total_lab_tests_lab1 = 5;
        stats.total_lab1_time = 40.0;
        stats
    }

    #[test]
    fn test_status_filter_names() {
        assert_eq!(StatusFilter::from_name("all"), Some(StatusFilter::All));
        assert_eq!(StatusFilter::from_name("LAB"), Some(StatusFilter::Lab));
        assert_eq!(StatusFilter::from_name("nope"), None);
    }

    #[test]
    fn test_top_medications_ranking() {
        let stats = sample_stats();
        let top = top_medications(&stats);
        assert_eq!(top[0], (2, 9));
        assert_eq!(top[1], (7, 4));
        assert_eq!(top[2].1, 0);
    }

    #[test]
    fn test_console_filter_sections() {
        let config = SystemConfig::default();
        let stats = sample_stats();
        let started = Local::now();

        let all = render_console(&stats, &config, started, StatusFilter::All);
        assert!(all.contains("TRIAGE CENTER"));
        assert!(all.contains("OPERATING BLOCKS"));
        assert!(all.contains("CENTRAL PHARMACY"));
        assert!(all.contains("LABORATORIES"));
        assert!(all.contains("GLOBALS"));

        let lab_only = render_console(&stats, &config, started, StatusFilter::Lab);
        assert!(lab_only.contains("LABORATORIES"));
        assert!(!lab_only.contains("TRIAGE CENTER"));
        assert!(!lab_only.contains("GLOBALS"));
    }

    #[test]
    fn test_snapshot_contains_charts() {
        let config = SystemConfig::default();
        let stats = sample_stats();
        let text = render_snapshot(&stats, &config, Local::now(), Local::now());
        assert!(text.contains("HOSPITAL SYSTEM STATISTICS SNAPSHOT"));
        assert!(text.contains("1. Average Wait Times (Triage)"));
        assert!(text.contains("2. Surgery Room Utilization (%)"));
        assert!(text.contains("3. Laboratory Utilization (%)"));
        // BO1 ran 80/200 = 40% => 20 stars
        assert!(text.contains(&format!("[ 40.0%]: {}", "*".repeat(20))));
    }

    #[test]
    fn test_write_snapshot_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = SystemConfig::default();
        let stats = sample_stats();
        let path = write_snapshot(&stats, &config, Local::now(), dir.path()).unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("stats_snapshot_"));
        assert!(name.ends_with(".txt"));
    }

    #[test]
    fn test_empty_stats_render_without_panic() {
        let config = SystemConfig::default();
        let stats = Stats {
            medication_usage: vec![0; config.medications.len()],
            ..Stats::default()
        };
        let text = render_console(&stats, &config, Local::now(), StatusFilter::All);
        assert!(text.contains("Success Rate: 100.0%"));
    }
}
