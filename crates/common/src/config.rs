//! System configuration — loaded from a `KEY=VALUE` file with `#` comments.
//!
//! Unknown keys containing a `:` in the value are medication lines of the
//! form `NAME=<initial_stock>:<threshold>` (up to 15).

use std::path::Path;

use anyhow::{Context, Result};

use crate::types::MAX_MEDICATIONS;

/// Default catalog used when a config file lists no medications explicitly
/// (tests, config-check dry runs).
pub const DEFAULT_MEDICATION_NAMES: [&str; MAX_MEDICATIONS] = [
    "ANALGESICO_A",
    "ANTIBIOTICO_B",
    "ANESTESICO_C",
    "SEDATIVO_D",
    "ANTIINFLAMATORIO_E",
    "CARDIOVASCULAR_F",
    "NEUROLOGICO_G",
    "ORTOPEDICO_H",
    "HEMOSTATIC_I",
    "ANTICOAGULANTE_J",
    "INSULINA_K",
    "ANALGESICO_FORTE_L",
    "ANTIBIOTICO_FORTE_M",
    "VITAMINA_N",
    "SUPLEMENTO_O",
];

#[derive(Debug, Clone)]
pub struct MedConfig {
    pub name: String,
    pub initial_stock: u32,
    pub threshold: u32,
}

#[derive(Debug, Clone)]
pub struct SystemConfig {
    // Globals
    pub time_unit_ms: u64,
    pub max_emergency_patients: usize,
    pub max_appointments: usize,
    pub max_surgeries_pending: usize,

    // Triage
    pub triage_simultaneous_patients: usize,
    pub triage_critical_stability: i32,
    pub triage_emergency_duration: u64,
    pub triage_appointment_duration: u64,

    // Surgery block (BO1..BO3 per specialty, plus cleanup)
    pub bo_min_duration: [u64; 3],
    pub bo_max_duration: [u64; 3],
    pub cleanup_min_time: u64,
    pub cleanup_max_time: u64,
    pub max_medical_teams: usize,

    // Pharmacy
    pub pharmacy_prep_time_min: u64,
    pub pharmacy_prep_time_max: u64,
    pub auto_restock_enabled: bool,
    pub restock_qty_multiplier: u32,

    // Labs
    pub lab1_min_duration: u64,
    pub lab1_max_duration: u64,
    pub lab2_min_duration: u64,
    pub lab2_max_duration: u64,
    pub max_simultaneous_tests_lab1: usize,
    pub max_simultaneous_tests_lab2: usize,

    pub medications: Vec<MedConfig>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            time_unit_ms: 100,
            max_emergency_patients: 20,
            max_appointments: 30,
            max_surgeries_pending: 10,
            triage_simultaneous_patients: 3,
            triage_critical_stability: 50,
            triage_emergency_duration: 10,
            triage_appointment_duration: 5,
            bo_min_duration: [30, 20, 40],
            bo_max_duration: [60, 45, 80],
            cleanup_min_time: 5,
            cleanup_max_time: 10,
            max_medical_teams: 2,
            pharmacy_prep_time_min: 5,
            pharmacy_prep_time_max: 15,
            auto_restock_enabled: true,
            restock_qty_multiplier: 3,
            lab1_min_duration: 5,
            lab1_max_duration: 10,
            lab2_min_duration: 8,
            lab2_max_duration: 15,
            max_simultaneous_tests_lab1: 2,
            max_simultaneous_tests_lab2: 2,
            medications: DEFAULT_MEDICATION_NAMES
                .iter()
                .map(|name| MedConfig {
                    name: (*name).to_string(),
                    initial_stock: 100,
                    threshold: 20,
                })
                .collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    BadValue { key: String, value: String },
    #[error("configuration invalid:\n{}", .issues.join("\n"))]
    Invalid { issues: Vec<String> },
}

impl SystemConfig {
    /// Load and validate a config file. Keys missing from the file keep
    /// their defaults; medication lines replace the default catalog.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = SystemConfig::default();
        let mut medications: Vec<MedConfig> = Vec::new();

        for line in content.lines() {
            let Some((key, value)) = parse_line(line) else {
                continue;
            };
            config.apply(key, value, &mut medications)?;
        }

        if !medications.is_empty() {
            config.medications = medications;
        }
        Ok(config)
    }

    fn apply(
        &mut self,
        key: &str,
        value: &str,
        medications: &mut Vec<MedConfig>,
    ) -> Result<(), ConfigError> {
        match key {
            "TIME_UNIT_MS" => self.time_unit_ms = num(key, value)?,
            "MAX_EMERGENCY_PATIENTS" => self.max_emergency_patients = num(key, value)?,
            "MAX_APPOINTMENTS" => self.max_appointments = num(key, value)?,
            "MAX_SURGERIES_PENDING" => self.max_surgeries_pending = num(key, value)?,
            "TRIAGE_SIMULTANEOUS_PATIENTS" => {
                self.triage_simultaneous_patients = num(key, value)?
            }
            "TRIAGE_CRITICAL_STABILITY" => self.triage_critical_stability = num(key, value)?,
            "TRIAGE_EMERGENCY_DURATION" => self.triage_emergency_duration = num(key, value)?,
            "TRIAGE_APPOINTMENT_DURATION" => self.triage_appointment_duration = num(key, value)?,
            "BO1_MIN_DURATION" => self.bo_min_duration[0] = num(key, value)?,
            "BO1_MAX_DURATION" => self.bo_max_duration[0] = num(key, value)?,
            "BO2_MIN_DURATION" => self.bo_min_duration[1] = num(key, value)?,
            "BO2_MAX_DURATION" => self.bo_max_duration[1] = num(key, value)?,
            "BO3_MIN_DURATION" => self.bo_min_duration[2] = num(key, value)?,
            "BO3_MAX_DURATION" => self.bo_max_duration[2] = num(key, value)?,
            "CLEANUP_MIN_TIME" => self.cleanup_min_time = num(key, value)?,
            "CLEANUP_MAX_TIME" => self.cleanup_max_time = num(key, value)?,
            "MAX_MEDICAL_TEAMS" => self.max_medical_teams = num(key, value)?,
            "PHARMACY_PREPARATION_TIME_MIN" => self.pharmacy_prep_time_min = num(key, value)?,
            "PHARMACY_PREPARATION_TIME_MAX" => self.pharmacy_prep_time_max = num(key, value)?,
            "AUTO_RESTOCK_ENABLED" => {
                self.auto_restock_enabled = match value {
                    "0" => false,
                    "1" => true,
                    _ => return Err(bad_value(key, value)),
                }
            }
            "RESTOCK_QUANTITY_MULTIPLIER" => self.restock_qty_multiplier = num(key, value)?,
            "LAB1_TEST_MIN_DURATION" => self.lab1_min_duration = num(key, value)?,
            "LAB1_TEST_MAX_DURATION" => self.lab1_max_duration = num(key, value)?,
            "LAB2_TEST_MIN_DURATION" => self.lab2_min_duration = num(key, value)?,
            "LAB2_TEST_MAX_DURATION" => self.lab2_max_duration = num(key, value)?,
            "MAX_SIMULTANEOUS_TESTS_LAB1" => self.max_simultaneous_tests_lab1 = num(key, value)?,
            "MAX_SIMULTANEOUS_TESTS_LAB2" => self.max_simultaneous_tests_lab2 = num(key, value)?,
            _ => {
                // Medication line: NAME=<initial_stock>:<threshold>
                if let Some((stock, threshold)) = value.split_once(':') {
                    if medications.len() >= MAX_MEDICATIONS {
                        return Ok(()); // catalog full, extra lines ignored
                    }
                    medications.push(MedConfig {
                        name: key.to_string(),
                        initial_stock: num(key, stock.trim())?,
                        threshold: num(key, threshold.trim())?,
                    });
                }
                // Unknown scalar keys are ignored, as in the original loader
            }
        }
        Ok(())
    }

    /// Check the loaded values for logical consistency. Collects every
    /// violation so the operator sees them all at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();

        if self.time_unit_ms == 0 {
            issues.push("TIME_UNIT_MS must be > 0".to_string());
        }
        if self.max_emergency_patients == 0 {
            issues.push("MAX_EMERGENCY_PATIENTS must be > 0".to_string());
        }
        if self.max_appointments == 0 {
            issues.push("MAX_APPOINTMENTS must be > 0".to_string());
        }
        if self.max_surgeries_pending == 0 {
            issues.push("MAX_SURGERIES_PENDING must be > 0".to_string());
        }
        if self.triage_simultaneous_patients == 0 {
            issues.push("TRIAGE_SIMULTANEOUS_PATIENTS must be > 0".to_string());
        }
        if !(0..=100).contains(&self.triage_critical_stability) {
            issues.push(format!(
                "TRIAGE_CRITICAL_STABILITY must be 0-100, found {}",
                self.triage_critical_stability
            ));
        }
        if self.triage_emergency_duration == 0 {
            issues.push("TRIAGE_EMERGENCY_DURATION must be > 0".to_string());
        }
        if self.triage_appointment_duration == 0 {
            issues.push("TRIAGE_APPOINTMENT_DURATION must be > 0".to_string());
        }
        for i in 0..3 {
            if self.bo_min_duration[i] == 0 || self.bo_min_duration[i] > self.bo_max_duration[i] {
                issues.push(format!(
                    "BO{} duration range invalid: {}-{}",
                    i + 1,
                    self.bo_min_duration[i],
                    self.bo_max_duration[i]
                ));
            }
        }
        if self.cleanup_min_time == 0 || self.cleanup_min_time > self.cleanup_max_time {
            issues.push(format!(
                "cleanup time range invalid: {}-{}",
                self.cleanup_min_time, self.cleanup_max_time
            ));
        }
        if self.max_medical_teams == 0 {
            issues.push("MAX_MEDICAL_TEAMS must be > 0".to_string());
        }
        if self.pharmacy_prep_time_min == 0
            || self.pharmacy_prep_time_min > self.pharmacy_prep_time_max
        {
            issues.push(format!(
                "pharmacy preparation time range invalid: {}-{}",
                self.pharmacy_prep_time_min, self.pharmacy_prep_time_max
            ));
        }
        if self.restock_qty_multiplier == 0 {
            issues.push("RESTOCK_QUANTITY_MULTIPLIER must be > 0".to_string());
        }
        if self.lab1_min_duration == 0 || self.lab1_min_duration > self.lab1_max_duration {
            issues.push(format!(
                "LAB1 duration range invalid: {}-{}",
                self.lab1_min_duration, self.lab1_max_duration
            ));
        }
        if self.lab2_min_duration == 0 || self.lab2_min_duration > self.lab2_max_duration {
            issues.push(format!(
                "LAB2 duration range invalid: {}-{}",
                self.lab2_min_duration, self.lab2_max_duration
            ));
        }
        if self.max_simultaneous_tests_lab1 == 0 {
            issues.push("MAX_SIMULTANEOUS_TESTS_LAB1 must be > 0".to_string());
        }
        if self.max_simultaneous_tests_lab2 == 0 {
            issues.push("MAX_SIMULTANEOUS_TESTS_LAB2 must be > 0".to_string());
        }
        if self.medications.is_empty() {
            issues.push("at least one medication must be configured".to_string());
        }
        if self.medications.len() > MAX_MEDICATIONS {
            issues.push(format!(
                "at most {MAX_MEDICATIONS} medications supported, found {}",
                self.medications.len()
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { issues })
        }
    }

    /// Surgery duration range for a room index (0..3).
    pub fn bo_duration_range(&self, room: usize) -> (u64, u64) {
        (self.bo_min_duration[room], self.bo_max_duration[room])
    }

    /// Look up a medication by (case-sensitive) catalog name.
    pub fn med_id(&self, name: &str) -> Option<usize> {
        self.medications.iter().position(|m| m.name == name)
    }

    /// Human-readable dump, used by config-check and the HELP path.
    pub fn render_summary(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "=== GLOBAL SETTINGS ===");
        let _ = writeln!(out, "Time Unit (ms): {}", self.time_unit_ms);
        let _ = writeln!(out, "Max Emergency Patients: {}", self.max_emergency_patients);
        let _ = writeln!(out, "Max Appointments: {}", self.max_appointments);
        let _ = writeln!(out, "Max Surgeries Pending: {}", self.max_surgeries_pending);
        let _ = writeln!(out, "\n=== TRIAGE ===");
        let _ = writeln!(
            out,
            "Simultaneous Patients: {}",
            self.triage_simultaneous_patients
        );
        let _ = writeln!(
            out,
            "Critical Stability Threshold: {}",
            self.triage_critical_stability
        );
        let _ = writeln!(out, "Emergency Duration: {}", self.triage_emergency_duration);
        let _ = writeln!(
            out,
            "Appointment Duration: {}",
            self.triage_appointment_duration
        );
        let _ = writeln!(out, "\n=== OPERATING BLOCKS ===");
        for i in 0..3 {
            let _ = writeln!(
                out,
                "BO{} Duration: {} - {}",
                i + 1,
                self.bo_min_duration[i],
                self.bo_max_duration[i]
            );
        }
        let _ = writeln!(
            out,
            "Cleanup Time: {} - {}",
            self.cleanup_min_time, self.cleanup_max_time
        );
        let _ = writeln!(out, "Max Medical Teams: {}", self.max_medical_teams);
        let _ = writeln!(out, "\n=== PHARMACY & LABS ===");
        let _ = writeln!(
            out,
            "Pharmacy Prep Time: {} - {}",
            self.pharmacy_prep_time_min, self.pharmacy_prep_time_max
        );
        let _ = writeln!(
            out,
            "Auto Restock: {}",
            if self.auto_restock_enabled {
                "ENABLED"
            } else {
                "DISABLED"
            }
        );
        let _ = writeln!(
            out,
            "Lab1 Duration: {} - {} (Max Sim: {})",
            self.lab1_min_duration, self.lab1_max_duration, self.max_simultaneous_tests_lab1
        );
        let _ = writeln!(
            out,
            "Lab2 Duration: {} - {} (Max Sim: {})",
            self.lab2_min_duration, self.lab2_max_duration, self.max_simultaneous_tests_lab2
        );
        let _ = writeln!(
            out,
            "\n=== MEDICATIONS (Count: {}/{MAX_MEDICATIONS}) ===",
            self.medications.len()
        );
        let _ = writeln!(out, "{:<25} | {:<10} | {:<10}", "Name", "Stock", "Threshold");
        let _ = writeln!(out, "----------------------------------------------------");
        for m in &self.medications {
            let _ = writeln!(
                out,
                "{:<25} | {:<10} | {:<10}",
                m.name, m.initial_stock, m.threshold
            );
        }
        out
    }
}

fn bad_value(key: &str, value: &str) -> ConfigError {
    ConfigError::BadValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Parse a numeric config value, reporting the offending key on failure.
fn num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| bad_value(key, value))
}

/// Split one `KEY=VALUE` line, skipping comments, blanks and lines without
/// an `=`. Both halves are whitespace-trimmed.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  KEY = 10  "), Some(("KEY", "10")));
        assert_eq!(parse_line("# comment"), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("no equals sign"), None);
    }

    #[test]
    fn test_parse_full_config() {
        let content = "\
# Hospital configuration
TIME_UNIT_MS=50
MAX_EMERGENCY_PATIENTS=5
MAX_APPOINTMENTS=7
TRIAGE_CRITICAL_STABILITY=40
BO1_MIN_DURATION=10
BO1_MAX_DURATION=20
AUTO_RESTOCK_ENABLED=0

ANALGESICO_A=100:20
ANTIBIOTICO_B=50:10
";
        let config = SystemConfig::parse(content).unwrap();
        assert_eq!(config.time_unit_ms, 50);
        assert_eq!(config.max_emergency_patients, 5);
        assert_eq!(config.max_appointments, 7);
        assert_eq!(config.triage_critical_stability, 40);
        assert_eq!(config.bo_min_duration[0], 10);
        assert_eq!(config.bo_max_duration[0], 20);
        assert!(!config.auto_restock_enabled);

        assert_eq!(config.medications.len(), 2);
        assert_eq!(config.medications[0].name, "ANALGESICO_A");
        assert_eq!(config.medications[0].initial_stock, 100);
        assert_eq!(config.medications[1].threshold, 10);

        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_are_valid() {
        SystemConfig::default().validate().unwrap();
    }

    #[test]
    fn test_bad_value_rejected() {
        let err = SystemConfig::parse("TIME_UNIT_MS=abc\n").unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { .. }));
    }

    #[test]
    fn test_validate_collects_all_issues() {
        let mut config = SystemConfig::default();
        config.time_unit_ms = 0;
        config.max_medical_teams = 0;
        config.medications.clear();

        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Invalid { issues } => assert_eq!(issues.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_med_id_lookup() {
        let config = SystemConfig::default();
        assert_eq!(config.med_id("ANALGESICO_A"), Some(0));
        assert_eq!(config.med_id("SUPLEMENTO_O"), Some(14));
        assert_eq!(config.med_id("NOPE"), None);
    }
}
