//! Shared hospital state: resource gates, operating rooms and teams,
//! medication stock, statistics, and the context bundle handed to every
//! subsystem.

pub mod gates;
pub mod report;
pub mod rooms;
pub mod stats;
pub mod stock;
pub mod workers;

use std::path::PathBuf;
use std::sync::Arc;

use common::clock::SimClock;
use common::config::SystemConfig;
use common::log::EventLog;
use common::shutdown::ShutdownFlag;
use ipc::mailbox::Mailboxes;

pub use gates::ResourceGates;
pub use rooms::SurgeryBlock;
pub use stats::HospitalStats;
pub use stock::PharmacyStock;

/// Filesystem locations for artifacts.
#[derive(Debug, Clone)]
pub struct HospitalPaths {
    pub results_dir: PathBuf,
}

impl Default for HospitalPaths {
    fn default() -> Self {
        HospitalPaths {
            results_dir: PathBuf::from("results"),
        }
    }
}

impl HospitalPaths {
    pub fn lab_results_dir(&self) -> PathBuf {
        self.results_dir.join("lab_results")
    }

    pub fn pharmacy_deliveries_dir(&self) -> PathBuf {
        self.results_dir.join("pharmacy_deliveries")
    }
}

/// Everything the subsystems share. Construct once, hand out as `Arc`.
#[derive(Debug)]
pub struct Hospital {
    pub config: Arc<SystemConfig>,
    pub clock: SimClock,
    pub shutdown: Arc<ShutdownFlag>,
    pub log: EventLog,
    pub stats: HospitalStats,
    pub block: SurgeryBlock,
    pub stock: PharmacyStock,
    pub gates: ResourceGates,
    pub mail: Mailboxes,
    pub paths: HospitalPaths,
}

impl Hospital {
    pub fn new(config: SystemConfig, log: EventLog, paths: HospitalPaths) -> Arc<Self> {
        let shutdown = Arc::new(ShutdownFlag::new());
        let clock = SimClock::new(config.time_unit_ms);
        let stats = HospitalStats::new(&config);
        let block = SurgeryBlock::new(config.max_medical_teams, Arc::clone(&shutdown));
        let stock = PharmacyStock::new(&config);
        let gates = ResourceGates::new(&config, &shutdown);
        let mail = Mailboxes::new(Arc::clone(&shutdown));
        Arc::new(Hospital {
            config: Arc::new(config),
            clock,
            shutdown,
            log,
            stats,
            block,
            stock,
            gates,
            mail,
            paths,
        })
    }

    /// Current tick, published into the statistics record as the
    /// coordinator does each loop iteration.
    pub fn publish_time(&self) -> u64 {
        let tick = self.clock.now();
        self.stats.publish_simulation_time(tick);
        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hospital_construction() {
        let hospital = Hospital::new(
            SystemConfig::default(),
            EventLog::disabled(),
            HospitalPaths::default(),
        );
        assert_eq!(hospital.block.teams.available(), 2);
        assert_eq!(hospital.stock.cells().len(), 15);
        assert_eq!(hospital.gates.pharmacy().available(), 4);
        assert!(!hospital.shutdown.is_set());

        let tick = hospital.publish_time();
        assert_eq!(hospital.stats.snapshot().simulation_time_units, tick);
    }
}
