use common::clock::Tick;
use common::types::{LabSelector, MedId, Priority, Sender, Specialty, TestKind, Urgency};

// === Correlation-id spaces ===
//
// Triage allocates per-patient ids in [1000, 1999] (wraparound); the
// coordinator owns the range from 2000 up, with one fixed lane per
// subsystem it talks to. Surgery ids live on a separate mailbox and may
// overlap numerically without cross-talk.

pub const TRIAGE_OP_MIN: u32 = 1000;
pub const TRIAGE_OP_MAX: u32 = 1999;
pub const COORDINATOR_OP_MIN: u32 = 2000;
pub const COORDINATOR_PHARMACY_LANE: u32 = 2001;
pub const COORDINATOR_LAB_LANE: u32 = 2002;

/// Discriminant of a message body, used by kind-filtered receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    NewEmergency,
    NewAppointment,
    NewSurgery,
    PharmacyRequest,
    PharmReady,
    LabRequest,
    LabResultsReady,
    Shutdown,
}

/// A mailbox record: common header plus a kind-specific body.
#[derive(Debug, Clone)]
pub struct Message {
    pub priority: Priority,
    pub patient_id: String,
    /// Correlation id tying a request to its response. 0 when unused.
    pub operation_id: u32,
    /// Submission tick.
    pub timestamp: Tick,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub enum Body {
    NewEmergency {
        triage_level: u8,
        stability: i32,
        tests: Vec<TestKind>,
        meds: Vec<MedId>,
    },
    NewAppointment {
        scheduled_tick: Tick,
        doctor: Specialty,
        tests: Vec<TestKind>,
    },
    NewSurgery {
        scheduled_tick: Tick,
        surgery_type: Specialty,
        urgency: Urgency,
        estimated_duration: u64,
        tests: Vec<TestKind>,
        meds: Vec<MedId>,
    },
    PharmacyRequest {
        items: Vec<(MedId, u32)>,
        sender: Sender,
    },
    LabRequest {
        tests: Vec<TestKind>,
        lab: LabSelector,
        sender: Sender,
    },
    PharmReady {
        success: bool,
    },
    LabResultsReady {
        code: i32,
    },
    /// Poison pill: wakes one blocked mailbox reader for orderly exit.
    Shutdown,
}

impl Body {
    pub fn kind(&self) -> Kind {
        match self {
            Body::NewEmergency { .. } => Kind::NewEmergency,
            Body::NewAppointment { .. } => Kind::NewAppointment,
            Body::NewSurgery { .. } => Kind::NewSurgery,
            Body::PharmacyRequest { .. } => Kind::PharmacyRequest,
            Body::PharmReady { .. } => Kind::PharmReady,
            Body::LabRequest { .. } => Kind::LabRequest,
            Body::LabResultsReady { .. } => Kind::LabResultsReady,
            Body::Shutdown => Kind::Shutdown,
        }
    }
}

impl Message {
    pub fn kind(&self) -> Kind {
        self.body.kind()
    }

    /// A poison pill at the highest priority.
    pub fn poison() -> Message {
        Message {
            priority: Priority::Urgent,
            patient_id: String::new(),
            operation_id: 0,
            timestamp: 0,
            body: Body::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Message::poison().kind(), Kind::Shutdown);
        let body = Body::PharmReady { success: true };
        assert_eq!(body.kind(), Kind::PharmReady);
    }

    #[test]
    fn test_correlation_spaces_disjoint() {
        assert!(TRIAGE_OP_MAX < COORDINATOR_OP_MIN);
        assert!(COORDINATOR_PHARMACY_LANE >= COORDINATOR_OP_MIN);
        assert!(COORDINATOR_LAB_LANE >= COORDINATOR_OP_MIN);
    }
}
