use std::fmt;

// === Constants ===

pub const MAX_MEDICATIONS: usize = 15;
pub const MAX_TESTS_TRIAGE: usize = 3;
pub const MAX_TESTS_SURGERY: usize = 5;
pub const MAX_TESTS_LAB: usize = 4;
pub const MAX_MEDS_TRIAGE: usize = 5;
pub const MAX_MEDS_SURGERY: usize = 5;
pub const MAX_ITEMS_PHARMACY: usize = 8;

pub const PATIENT_ID_MIN_LEN: usize = 5;
pub const PATIENT_ID_MAX_LEN: usize = 15;

/// Index into the medication catalog.
pub type MedId = usize;

// === Message Priority ===

/// Mailbox priority. Lower value is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Urgent = 1,
    High = 2,
    Normal = 3,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "URGENT" => Some(Priority::Urgent),
            "HIGH" => Some(Priority::High),
            "NORMAL" => Some(Priority::Normal),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Priority::Urgent => "URGENT",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
        }
    }
}

// === Specialties / Surgery Types ===

/// Doctor specialty; for surgeries this also selects the operating room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Specialty {
    Cardio = 0,
    Ortho = 1,
    Neuro = 2,
}

impl Specialty {
    /// Index of the operating room bound to this specialty (BO1..BO3).
    pub fn room_index(self) -> usize {
        self as usize
    }

    pub fn room_name(self) -> &'static str {
        match self {
            Specialty::Cardio => "BO1",
            Specialty::Ortho => "BO2",
            Specialty::Neuro => "BO3",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "CARDIO" => Some(Specialty::Cardio),
            "ORTHO" => Some(Specialty::Ortho),
            "NEURO" => Some(Specialty::Neuro),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Specialty::Cardio => "CARDIO",
            Specialty::Ortho => "ORTHO",
            Specialty::Neuro => "NEURO",
        }
    }
}

// === Surgery Urgency ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Urgency {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Urgency {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "LOW" => Some(Urgency::Low),
            "MEDIUM" => Some(Urgency::Medium),
            "HIGH" => Some(Urgency::High),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Urgency::Low => "LOW",
            Urgency::Medium => "MEDIUM",
            Urgency::High => "HIGH",
        }
    }
}

// === Lab Tests ===

/// Clinical test catalog. HEMO/GLIC run on the hematology bench (Lab1),
/// COLEST/RENAL/HEPAT on the biochemistry bench (Lab2). PREOP runs on both
/// in sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TestKind {
    Hemo = 0,
    Glic = 1,
    Colest = 2,
    Renal = 3,
    Hepat = 4,
    Preop = 5,
}

impl TestKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "HEMO" => Some(TestKind::Hemo),
            "GLIC" => Some(TestKind::Glic),
            "COLEST" => Some(TestKind::Colest),
            "RENAL" => Some(TestKind::Renal),
            "HEPAT" => Some(TestKind::Hepat),
            "PREOP" => Some(TestKind::Preop),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TestKind::Hemo => "HEMO",
            TestKind::Glic => "GLIC",
            TestKind::Colest => "COLEST",
            TestKind::Renal => "RENAL",
            TestKind::Hepat => "HEPAT",
            TestKind::Preop => "PREOP",
        }
    }

    /// The single bench this test runs on, or `None` for PREOP (two-phase).
    pub fn bench(self) -> Option<LabBench> {
        match self {
            TestKind::Hemo | TestKind::Glic => Some(LabBench::Lab1),
            TestKind::Colest | TestKind::Renal | TestKind::Hepat => Some(LabBench::Lab2),
            TestKind::Preop => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabBench {
    Lab1,
    Lab2,
}

/// Lab routing requested by the submitter. Validation only; workers route
/// each test by its own bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabSelector {
    Lab1,
    Lab2,
    Both,
}

impl LabSelector {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "LAB1" => Some(LabSelector::Lab1),
            "LAB2" => Some(LabSelector::Lab2),
            "BOTH" => Some(LabSelector::Both),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LabSelector::Lab1 => "LAB1",
            LabSelector::Lab2 => "LAB2",
            LabSelector::Both => "BOTH",
        }
    }

    /// Whether this selector may carry the given test.
    pub fn accepts(self, test: TestKind) -> bool {
        match self {
            LabSelector::Both => true,
            LabSelector::Lab1 => test.bench() == Some(LabBench::Lab1),
            LabSelector::Lab2 => test.bench() == Some(LabBench::Lab2),
        }
    }
}

// === Request Origin ===

/// Which subsystem issued a Pharmacy/Lab request. Decides where the
/// response is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    Triage,
    Surgery,
    Coordinator,
}

impl Sender {
    pub fn name(self) -> &'static str {
        match self {
            Sender::Triage => "TRIAGE",
            Sender::Surgery => "SURGERY",
            Sender::Coordinator => "COORDINATOR",
        }
    }
}

// === Patient / Request Ids ===

/// Mandatory id prefix per submitter role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdRole {
    Patient,
    PharmacyOrder,
    LabOrder,
}

impl IdRole {
    pub fn prefix(self) -> &'static str {
        match self {
            IdRole::Patient => "PAC",
            IdRole::PharmacyOrder => "REQ",
            IdRole::LabOrder => "LAB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("id must start with {0}")]
    BadPrefix(&'static str),
    #[error("id must be 5-15 characters, got {0}")]
    BadLength(usize),
    #[error("id body must be digits only")]
    NonDigitBody,
}

/// Validate `PAC<d+>` / `REQ<d+>` / `LAB<d+>` ids, 5-15 chars total.
pub fn validate_id(id: &str, role: IdRole) -> Result<(), IdError> {
    let prefix = role.prefix();
    if !(PATIENT_ID_MIN_LEN..=PATIENT_ID_MAX_LEN).contains(&id.len()) {
        return Err(IdError::BadLength(id.len()));
    }
    let body = id
        .strip_prefix(prefix)
        .ok_or(IdError::BadPrefix(prefix))?;
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdError::NonDigitBody);
    }
    Ok(())
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Specialty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Urgent < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert_eq!(Priority::from_name("urgent"), Some(Priority::Urgent));
        assert_eq!(Priority::from_name("bogus"), None);
    }

    #[test]
    fn test_specialty_room_mapping() {
        assert_eq!(Specialty::Cardio.room_index(), 0);
        assert_eq!(Specialty::Neuro.room_index(), 2);
        assert_eq!(Specialty::Ortho.room_name(), "BO2");
    }

    #[test]
    fn test_test_benches() {
        assert_eq!(TestKind::Hemo.bench(), Some(LabBench::Lab1));
        assert_eq!(TestKind::Renal.bench(), Some(LabBench::Lab2));
        assert_eq!(TestKind::Preop.bench(), None);
    }

    #[test]
    fn test_lab_selector_compatibility() {
        assert!(LabSelector::Lab1.accepts(TestKind::Hemo));
        assert!(!LabSelector::Lab1.accepts(TestKind::Colest));
        assert!(!LabSelector::Lab1.accepts(TestKind::Preop));
        assert!(LabSelector::Lab2.accepts(TestKind::Hepat));
        assert!(!LabSelector::Lab2.accepts(TestKind::Glic));
        assert!(LabSelector::Both.accepts(TestKind::Preop));
        assert!(LabSelector::Both.accepts(TestKind::Glic));
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("PAC001", IdRole::Patient).is_ok());
        assert!(validate_id("REQ12345", IdRole::PharmacyOrder).is_ok());
        assert!(validate_id("LAB99", IdRole::LabOrder).is_ok());

        assert_eq!(
            validate_id("XYZ001", IdRole::Patient),
            Err(IdError::BadPrefix("PAC"))
        );
        assert_eq!(
            validate_id("PAC1", IdRole::Patient),
            Err(IdError::BadLength(4))
        );
        assert_eq!(
            validate_id("PAC0123456789012", IdRole::Patient),
            Err(IdError::BadLength(16))
        );
        assert_eq!(
            validate_id("PAC12A", IdRole::Patient),
            Err(IdError::NonDigitBody)
        );
        // Prefix alone has no digit body
        assert!(validate_id("PACPAC", IdRole::Patient).is_err());
    }
}
