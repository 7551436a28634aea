//! Command parsing and dispatch.
//!
//! Grammar: `<VERB> <id> key: value ...` with list arguments as
//! `[A,B,...]` (brackets optional). Validation failures log a WARNING and
//! print the verb's synopsis; they never reach a mailbox.

use std::sync::Arc;

use common::log::Severity;
use common::types::{
    validate_id, IdRole, LabSelector, MedId, Priority, Specialty, TestKind, Urgency,
    MAX_ITEMS_PHARMACY, MAX_MEDS_SURGERY, MAX_MEDS_TRIAGE, MAX_TESTS_LAB, MAX_TESTS_SURGERY,
    MAX_TESTS_TRIAGE,
};
use ipc::message::{Body, Message, COORDINATOR_LAB_LANE, COORDINATOR_PHARMACY_LANE};
use ipc::{DeferredScheduler, Mailbox};
use shared::report::{self, StatusFilter};
use shared::Hospital;

pub const HELP_TEXT: &str = "\
=== HOSPITAL SYSTEM COMMANDS ===

SHUTDOWN
  Gracefully shuts down the hospital system.

STATUS <component>
  <component>: ALL | TRIAGE | SURGERY | PHARMACY | LAB

EMERGENCY <patient_id> init: <time> triage: <1-5> stability: <value> [tests: [test1,test2,...]] [meds: [med1,med2,...]]
  Registers a new emergency patient.

APPOINTMENT <patient_id> init: <time> scheduled: <time> doctor: <specialty> [tests: [test1,test2,...]]
  <specialty>: CARDIO | ORTHO | NEURO

SURGERY <patient_id> init: <time> type: <specialty> scheduled: <time> urgency: <level> tests: [test1,test2,...] meds: [med1,med2,...]
  <specialty>: CARDIO | ORTHO | NEURO
  <level>: LOW | MEDIUM | HIGH
  Note: PREOP test is required.

PHARMACY_REQUEST <request_id> init: <time> priority: <priority> items: [med1:qty1,med2:qty2,...]
  <priority>: URGENT | HIGH | NORMAL

LAB_REQUEST <request_id> init: <time> priority: <priority> lab: <lab> tests: [test1,test2,...]
  <priority>: URGENT | NORMAL
  <lab>: LAB1 | LAB2 | BOTH

RESTOCK <medication_name> quantity: <amount>
  Restocks a medication in the pharmacy.

HELP
  Displays this help message.
";

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{verb}: {reason}")]
    Invalid { verb: &'static str, reason: String },
    #[error("unknown command: {0}")]
    UnknownVerb(String),
}

/// What the coordinator should do after a handled line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Shutdown,
}

/// A validated command, before dispatch.
#[derive(Debug)]
pub enum Parsed {
    Shutdown,
    Help,
    Status(StatusFilter),
    Restock {
        med: MedId,
        name: String,
        qty: u32,
    },
    Submit {
        target: SubmitTarget,
        init_offset: u64,
        msg: Message,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTarget {
    Triage,
    Surgery,
    Pharmacy,
    Lab,
}

fn synopsis(verb: &str) -> &'static str {
    match verb {
        "EMERGENCY" => "Format: EMERGENCY <patient_id> init: <time> triage: <1-5> stability: <value> [tests: [test1,test2,...]] [meds: [med1,med2,...]]",
        "APPOINTMENT" => "Format: APPOINTMENT <patient_id> init: <time> scheduled: <time> doctor: CARDIO|ORTHO|NEURO [tests: [test1,test2,...]]",
        "SURGERY" => "Format: SURGERY <patient_id> init: <time> type: CARDIO|ORTHO|NEURO scheduled: <time> urgency: LOW|MEDIUM|HIGH tests: [... PREOP required ...] meds: [med1,...]",
        "PHARMACY_REQUEST" => "Format: PHARMACY_REQUEST <request_id> init: <time> priority: URGENT|HIGH|NORMAL items: [med1:qty1,med2:qty2,...]",
        "LAB_REQUEST" => "Format: LAB_REQUEST <request_id> init: <time> priority: URGENT|NORMAL lab: LAB1|LAB2|BOTH tests: [test1,test2,...]",
        "RESTOCK" => "Format: RESTOCK <medication_name> quantity: <amount>",
        "STATUS" => "Format: STATUS ALL|TRIAGE|SURGERY|PHARMACY|LAB",
        _ => "For a list of commands, type 'HELP'",
    }
}

// === Token scanning ===

/// `key:`-tagged arguments collected after the id token.
struct Args<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Args<'a> {
    fn collect(tokens: &[&'a str]) -> Self {
        let mut pairs = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if let Some(key) = tokens[i].strip_suffix(':') {
                if i + 1 < tokens.len() {
                    pairs.push((key, tokens[i + 1]));
                    i += 2;
                    continue;
                }
            }
            i += 1;
        }
        Args { pairs }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }
}

fn invalid(verb: &'static str, reason: impl Into<String>) -> CommandError {
    CommandError::Invalid {
        verb,
        reason: reason.into(),
    }
}

fn require<'a>(args: &Args<'a>, verb: &'static str, key: &str) -> Result<&'a str, CommandError> {
    args.get(key)
        .ok_or_else(|| invalid(verb, format!("missing '{key}:'")))
}

fn parse_u64(verb: &'static str, key: &str, value: &str) -> Result<u64, CommandError> {
    value
        .parse()
        .map_err(|_| invalid(verb, format!("invalid '{key}:' value {value:?}")))
}

fn checked_id(verb: &'static str, id: &str, role: IdRole) -> Result<String, CommandError> {
    validate_id(id, role).map_err(|e| invalid(verb, format!("invalid id {id:?}: {e}")))?;
    Ok(id.to_string())
}

/// Split `[A,B,C]` (brackets optional) into trimmed items.
fn split_list(value: &str) -> Vec<&str> {
    value
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_tests(
    verb: &'static str,
    value: &str,
    max: usize,
) -> Result<Vec<TestKind>, CommandError> {
    let items = split_list(value);
    if items.len() > max {
        return Err(invalid(verb, format!("at most {max} tests allowed")));
    }
    items
        .into_iter()
        .map(|name| {
            TestKind::from_name(name).ok_or_else(|| invalid(verb, format!("unknown test {name:?}")))
        })
        .collect()
}

fn parse_meds(
    hospital: &Hospital,
    verb: &'static str,
    value: &str,
    max: usize,
) -> Result<Vec<MedId>, CommandError> {
    let items = split_list(value);
    if items.len() > max {
        return Err(invalid(verb, format!("at most {max} medications allowed")));
    }
    items
        .into_iter()
        .map(|name| {
            hospital
                .config
                .med_id(name)
                .ok_or_else(|| invalid(verb, format!("unknown medication {name:?}")))
        })
        .collect()
}

fn parse_items(
    hospital: &Hospital,
    verb: &'static str,
    value: &str,
) -> Result<Vec<(MedId, u32)>, CommandError> {
    let items = split_list(value);
    if items.is_empty() {
        return Err(invalid(verb, "missing items"));
    }
    if items.len() > MAX_ITEMS_PHARMACY {
        return Err(invalid(
            verb,
            format!("at most {MAX_ITEMS_PHARMACY} items allowed"),
        ));
    }
    items
        .into_iter()
        .map(|item| {
            let (name, qty) = item
                .split_once(':')
                .ok_or_else(|| invalid(verb, format!("item {item:?} must be NAME:QTY")))?;
            let med = hospital
                .config
                .med_id(name.trim())
                .ok_or_else(|| invalid(verb, format!("unknown medication {name:?}")))?;
            let qty: u32 = qty
                .trim()
                .parse()
                .map_err(|_| invalid(verb, format!("invalid quantity in {item:?}")))?;
            if qty == 0 {
                return Err(invalid(verb, format!("quantity must be > 0 in {item:?}")));
            }
            Ok((med, qty))
        })
        .collect()
}

// === Per-verb builders ===

fn parse_emergency(hospital: &Hospital, tokens: &[&str]) -> Result<Parsed, CommandError> {
    const VERB: &str = "EMERGENCY";
    let id = tokens
        .first()
        .ok_or_else(|| invalid(VERB, "missing patient id"))?;
    let patient_id = checked_id(VERB, id, IdRole::Patient)?;
    let args = Args::collect(&tokens[1..]);

    let init = parse_u64(VERB, "init", require(&args, VERB, "init")?)?;
    let triage_level = parse_u64(VERB, "triage", require(&args, VERB, "triage")?)?;
    if !(1..=5).contains(&triage_level) {
        return Err(invalid(VERB, "triage level must be 1-5"));
    }
    let stability = parse_u64(VERB, "stability", require(&args, VERB, "stability")?)?;
    if stability < 100 {
        return Err(invalid(VERB, "stability must be >= 100"));
    }
    let tests = match args.get("tests") {
        Some(v) => parse_tests(VERB, v, MAX_TESTS_TRIAGE)?,
        None => Vec::new(),
    };
    let meds = match args.get("meds") {
        Some(v) => parse_meds(hospital, VERB, v, MAX_MEDS_TRIAGE)?,
        None => Vec::new(),
    };

    let priority = match triage_level {
        1 => Priority::Urgent,
        2 | 3 => Priority::High,
        _ => Priority::Normal,
    };

    Ok(Parsed::Submit {
        target: SubmitTarget::Triage,
        init_offset: init,
        msg: Message {
            priority,
            patient_id,
            operation_id: 0,
            timestamp: 0,
            body: Body::NewEmergency {
                triage_level: triage_level as u8,
                stability: stability as i32,
                tests,
                meds,
            },
        },
    })
}

fn parse_appointment(hospital: &Hospital, tokens: &[&str]) -> Result<Parsed, CommandError> {
    const VERB: &str = "APPOINTMENT";
    let id = tokens
        .first()
        .ok_or_else(|| invalid(VERB, "missing patient id"))?;
    let patient_id = checked_id(VERB, id, IdRole::Patient)?;
    let args = Args::collect(&tokens[1..]);

    let init = parse_u64(VERB, "init", require(&args, VERB, "init")?)?;
    let scheduled = parse_u64(VERB, "scheduled", require(&args, VERB, "scheduled")?)?;
    let doctor = Specialty::from_name(require(&args, VERB, "doctor")?)
        .ok_or_else(|| invalid(VERB, "doctor must be CARDIO, ORTHO or NEURO"))?;

    let submission = hospital.clock.now() + init;
    if scheduled <= submission {
        return Err(invalid(
            VERB,
            "scheduled time must be after the submission tick",
        ));
    }

    let tests = match args.get("tests") {
        Some(v) => parse_tests(VERB, v, MAX_TESTS_TRIAGE)?,
        None => Vec::new(),
    };

    Ok(Parsed::Submit {
        target: SubmitTarget::Triage,
        init_offset: init,
        msg: Message {
            priority: Priority::Normal,
            patient_id,
            operation_id: 0,
            timestamp: 0,
            body: Body::NewAppointment {
                scheduled_tick: scheduled,
                doctor,
                tests,
            },
        },
    })
}

fn parse_surgery(hospital: &Hospital, tokens: &[&str]) -> Result<Parsed, CommandError> {
    const VERB: &str = "SURGERY";
    let id = tokens
        .first()
        .ok_or_else(|| invalid(VERB, "missing patient id"))?;
    let patient_id = checked_id(VERB, id, IdRole::Patient)?;
    let args = Args::collect(&tokens[1..]);

    let init = parse_u64(VERB, "init", require(&args, VERB, "init")?)?;
    let surgery_type = Specialty::from_name(require(&args, VERB, "type")?)
        .ok_or_else(|| invalid(VERB, "type must be CARDIO, ORTHO or NEURO"))?;
    let scheduled = parse_u64(VERB, "scheduled", require(&args, VERB, "scheduled")?)?;
    if scheduled < init {
        return Err(invalid(VERB, "scheduled time must be >= init"));
    }
    let urgency = Urgency::from_name(require(&args, VERB, "urgency")?)
        .ok_or_else(|| invalid(VERB, "urgency must be LOW, MEDIUM or HIGH"))?;

    let tests = parse_tests(VERB, require(&args, VERB, "tests")?, MAX_TESTS_SURGERY)?;
    if !tests.contains(&TestKind::Preop) {
        return Err(invalid(VERB, "tests must include PREOP"));
    }
    let meds = parse_meds(hospital, VERB, require(&args, VERB, "meds")?, MAX_MEDS_SURGERY)?;
    if meds.is_empty() {
        return Err(invalid(VERB, "at least one medication is required"));
    }

    let (lo, hi) = hospital
        .config
        .bo_duration_range(surgery_type.room_index());
    let estimated_duration = (lo + hi) / 2;

    let priority = match urgency {
        Urgency::High => Priority::Urgent,
        Urgency::Medium => Priority::High,
        Urgency::Low => Priority::Normal,
    };

    Ok(Parsed::Submit {
        target: SubmitTarget::Surgery,
        init_offset: init,
        msg: Message {
            priority,
            patient_id,
            operation_id: 0,
            timestamp: 0,
            body: Body::NewSurgery {
                scheduled_tick: scheduled,
                surgery_type,
                urgency,
                estimated_duration,
                tests,
                meds,
            },
        },
    })
}

fn parse_pharmacy_request(hospital: &Hospital, tokens: &[&str]) -> Result<Parsed, CommandError> {
    const VERB: &str = "PHARMACY_REQUEST";
    let id = tokens
        .first()
        .ok_or_else(|| invalid(VERB, "missing request id"))?;
    let patient_id = checked_id(VERB, id, IdRole::PharmacyOrder)?;
    let args = Args::collect(&tokens[1..]);

    let init = parse_u64(VERB, "init", require(&args, VERB, "init")?)?;
    let priority = Priority::from_name(require(&args, VERB, "priority")?)
        .ok_or_else(|| invalid(VERB, "priority must be URGENT, HIGH or NORMAL"))?;
    let items = parse_items(hospital, VERB, require(&args, VERB, "items")?)?;

    Ok(Parsed::Submit {
        target: SubmitTarget::Pharmacy,
        init_offset: init,
        msg: Message {
            priority,
            patient_id,
            operation_id: COORDINATOR_PHARMACY_LANE,
            timestamp: 0,
            body: Body::PharmacyRequest {
                items,
                sender: common::types::Sender::Coordinator,
            },
        },
    })
}

fn parse_lab_request(_hospital: &Hospital, tokens: &[&str]) -> Result<Parsed, CommandError> {
    const VERB: &str = "LAB_REQUEST";
    let id = tokens
        .first()
        .ok_or_else(|| invalid(VERB, "missing request id"))?;
    let patient_id = checked_id(VERB, id, IdRole::LabOrder)?;
    let args = Args::collect(&tokens[1..]);

    let init = parse_u64(VERB, "init", require(&args, VERB, "init")?)?;
    let priority = match require(&args, VERB, "priority")?.to_ascii_uppercase().as_str() {
        "URGENT" => Priority::Urgent,
        "NORMAL" => Priority::Normal,
        other => {
            return Err(invalid(
                VERB,
                format!("priority must be URGENT or NORMAL, got {other:?}"),
            ))
        }
    };
    let lab = LabSelector::from_name(require(&args, VERB, "lab")?)
        .ok_or_else(|| invalid(VERB, "lab must be LAB1, LAB2 or BOTH"))?;
    let tests = parse_tests(VERB, require(&args, VERB, "tests")?, MAX_TESTS_LAB)?;
    if tests.is_empty() {
        return Err(invalid(VERB, "at least one test is required"));
    }
    for test in &tests {
        if !lab.accepts(*test) {
            return Err(invalid(
                VERB,
                format!("test {test} cannot run on {}", lab.name()),
            ));
        }
    }

    Ok(Parsed::Submit {
        target: SubmitTarget::Lab,
        init_offset: init,
        msg: Message {
            priority,
            patient_id,
            operation_id: COORDINATOR_LAB_LANE,
            timestamp: 0,
            body: Body::LabRequest {
                tests,
                lab,
                sender: common::types::Sender::Coordinator,
            },
        },
    })
}

fn parse_restock(hospital: &Hospital, tokens: &[&str]) -> Result<Parsed, CommandError> {
    const VERB: &str = "RESTOCK";
    let name = tokens
        .first()
        .ok_or_else(|| invalid(VERB, "missing medication name"))?;
    let med = hospital
        .config
        .med_id(name)
        .ok_or_else(|| invalid(VERB, format!("unknown medication {name:?}")))?;
    let args = Args::collect(&tokens[1..]);
    let qty = parse_u64(VERB, "quantity", require(&args, VERB, "quantity")?)?;
    if qty == 0 {
        return Err(invalid(VERB, "quantity must be > 0"));
    }
    Ok(Parsed::Restock {
        med,
        name: (*name).to_string(),
        qty: qty as u32,
    })
}

/// Parse and validate one command line.
pub fn parse_command(hospital: &Hospital, line: &str) -> Result<Parsed, CommandError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((verb, rest)) = tokens.split_first() else {
        return Err(CommandError::UnknownVerb(String::new()));
    };

    match verb.to_ascii_uppercase().as_str() {
        "SHUTDOWN" => Ok(Parsed::Shutdown),
        "HELP" => Ok(Parsed::Help),
        "STATUS" => {
            let component = rest
                .first()
                .ok_or_else(|| invalid("STATUS", "missing component"))?;
            StatusFilter::from_name(component)
                .map(Parsed::Status)
                .ok_or_else(|| invalid("STATUS", format!("invalid component {component:?}")))
        }
        "EMERGENCY" => parse_emergency(hospital, rest),
        "APPOINTMENT" => parse_appointment(hospital, rest),
        "SURGERY" => parse_surgery(hospital, rest),
        "PHARMACY_REQUEST" => parse_pharmacy_request(hospital, rest),
        "LAB_REQUEST" => parse_lab_request(hospital, rest),
        "RESTOCK" => parse_restock(hospital, rest),
        other => Err(CommandError::UnknownVerb(other.to_string())),
    }
}

fn target_mailbox(hospital: &Hospital, target: SubmitTarget) -> Arc<Mailbox> {
    match target {
        SubmitTarget::Triage => Arc::clone(&hospital.mail.triage),
        SubmitTarget::Surgery => Arc::clone(&hospital.mail.surgery),
        SubmitTarget::Pharmacy => Arc::clone(&hospital.mail.pharmacy),
        SubmitTarget::Lab => Arc::clone(&hospital.mail.lab),
    }
}

/// Handle one input line end to end. Returns `Action::Shutdown` when the
/// operator asked for a shutdown; everything else is dealt with here.
pub fn handle_line(
    hospital: &Hospital,
    scheduler: &mut DeferredScheduler,
    line: &str,
) -> Action {
    if line.trim().is_empty() {
        return Action::None;
    }

    let parsed = match parse_command(hospital, line) {
        Ok(parsed) => parsed,
        Err(err) => {
            hospital
                .log
                .log(Severity::Warning, "MANAGER", "INVALID_CMD", &err.to_string());
            match &err {
                CommandError::Invalid { verb, .. } => println!("{}", synopsis(verb)),
                CommandError::UnknownVerb(_) => {
                    println!("Invalid command. For a list of commands, type 'HELP'")
                }
            }
            return Action::None;
        }
    };

    match parsed {
        Parsed::Shutdown => Action::Shutdown,
        Parsed::Help => {
            println!("{HELP_TEXT}");
            Action::None
        }
        Parsed::Status(filter) => {
            hospital
                .log
                .log(Severity::Info, "STATS", "DISPLAY", "displaying statistics");
            let text = report::render_console(
                &hospital.stats.snapshot(),
                &hospital.config,
                hospital.stats.started(),
                filter,
            );
            println!("{text}");
            Action::None
        }
        Parsed::Restock { med, name, qty } => {
            let added = hospital
                .stock
                .cell(med)
                .map(|cell| cell.restock(qty))
                .unwrap_or(0);
            hospital.log.log(
                Severity::Info,
                "MANAGER",
                "RESTOCK",
                &format!("restocked {name} with {added} units"),
            );
            Action::None
        }
        Parsed::Submit {
            target,
            init_offset,
            mut msg,
        } => {
            let current = hospital.clock.now();
            let due = current + init_offset;
            msg.timestamp = due;
            let mailbox = target_mailbox(hospital, target);
            if due <= current {
                if let Err(err) = mailbox.send(msg) {
                    hospital.stats.system_error();
                    hospital.log.log(
                        Severity::Error,
                        "MANAGER",
                        "SEND_FAIL",
                        &format!("dropping command for {}: {err}", mailbox.name()),
                    );
                }
            } else {
                scheduler.add(due, mailbox, msg);
            }
            Action::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::SystemConfig;
    use common::log::EventLog;
    use ipc::message::Kind;
    use shared::HospitalPaths;

    fn hospital() -> Arc<Hospital> {
        Hospital::new(
            SystemConfig::default(),
            EventLog::disabled(),
            HospitalPaths::default(),
        )
    }

    #[test]
    fn test_emergency_parses_and_maps_priority() {
        let h = hospital();
        let parsed = parse_command(
            &h,
            "EMERGENCY PAC001 init: 0 triage: 1 stability: 150 tests: [HEMO,GLIC] meds: [ANALGESICO_A]",
        )
        .unwrap();
        match parsed {
            Parsed::Submit { target, msg, .. } => {
                assert_eq!(target, SubmitTarget::Triage);
                assert_eq!(msg.priority, Priority::Urgent);
                match msg.body {
                    Body::NewEmergency {
                        triage_level,
                        stability,
                        tests,
                        meds,
                    } => {
                        assert_eq!(triage_level, 1);
                        assert_eq!(stability, 150);
                        assert_eq!(tests, vec![TestKind::Hemo, TestKind::Glic]);
                        assert_eq!(meds, vec![0]);
                    }
                    other => panic!("unexpected body: {other:?}"),
                }
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_emergency_rejects_bad_ranges() {
        let h = hospital();
        assert!(parse_command(&h, "EMERGENCY PAC001 init: 0 triage: 6 stability: 150").is_err());
        assert!(parse_command(&h, "EMERGENCY PAC001 init: 0 triage: 3 stability: 99").is_err());
        assert!(parse_command(&h, "EMERGENCY PAC001 triage: 3 stability: 150").is_err());
    }

    #[test]
    fn test_id_prefixes_are_strict() {
        let h = hospital();
        assert!(parse_command(&h, "EMERGENCY REQ001 init: 0 triage: 1 stability: 150").is_err());
        assert!(
            parse_command(&h, "PHARMACY_REQUEST PAC001 init: 0 priority: NORMAL items: [ANALGESICO_A:1]")
                .is_err()
        );
        assert!(parse_command(
            &h,
            "LAB_REQUEST REQ001 init: 0 priority: NORMAL lab: LAB1 tests: [HEMO]"
        )
        .is_err());
    }

    #[test]
    fn test_surgery_requires_preop_and_meds() {
        let h = hospital();
        let err = parse_command(
            &h,
            "SURGERY PAC002 init: 0 type: CARDIO scheduled: 100 urgency: HIGH tests: [HEMO] meds: [ANALGESICO_A]",
        )
        .unwrap_err();
        assert!(err.to_string().contains("PREOP"));

        assert!(parse_command(
            &h,
            "SURGERY PAC002 init: 0 type: CARDIO scheduled: 100 urgency: HIGH tests: [PREOP] meds: []"
        )
        .is_err());

        let parsed = parse_command(
            &h,
            "SURGERY PAC002 init: 0 type: CARDIO scheduled: 100 urgency: HIGH tests: [PREOP] meds: [ANALGESICO_A]",
        )
        .unwrap();
        match parsed {
            Parsed::Submit { target, msg, .. } => {
                assert_eq!(target, SubmitTarget::Surgery);
                assert_eq!(msg.priority, Priority::Urgent);
                assert_eq!(msg.kind(), Kind::NewSurgery);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_lab_selector_compatibility_enforced() {
        let h = hospital();
        // COLEST belongs to Lab2
        assert!(parse_command(
            &h,
            "LAB_REQUEST LAB001 init: 0 priority: NORMAL lab: LAB1 tests: [COLEST]"
        )
        .is_err());
        // PREOP needs BOTH
        assert!(parse_command(
            &h,
            "LAB_REQUEST LAB001 init: 0 priority: NORMAL lab: LAB2 tests: [PREOP]"
        )
        .is_err());
        assert!(parse_command(
            &h,
            "LAB_REQUEST LAB001 init: 0 priority: URGENT lab: BOTH tests: [PREOP,HEMO]"
        )
        .is_ok());
        // HIGH is not a lab priority
        assert!(parse_command(
            &h,
            "LAB_REQUEST LAB001 init: 0 priority: HIGH lab: LAB1 tests: [HEMO]"
        )
        .is_err());
    }

    #[test]
    fn test_pharmacy_request_quantities() {
        let h = hospital();
        assert!(parse_command(
            &h,
            "PHARMACY_REQUEST REQ001 init: 0 priority: HIGH items: [ANALGESICO_A:0]"
        )
        .is_err());
        assert!(parse_command(
            &h,
            "PHARMACY_REQUEST REQ001 init: 0 priority: HIGH items: [NOPE:1]"
        )
        .is_err());

        let parsed = parse_command(
            &h,
            "PHARMACY_REQUEST REQ001 init: 0 priority: HIGH items: [ANALGESICO_A:2,INSULINA_K:1]",
        )
        .unwrap();
        match parsed {
            Parsed::Submit { target, msg, .. } => {
                assert_eq!(target, SubmitTarget::Pharmacy);
                assert_eq!(msg.operation_id, COORDINATOR_PHARMACY_LANE);
                match msg.body {
                    Body::PharmacyRequest { items, sender } => {
                        assert_eq!(items, vec![(0, 2), (10, 1)]);
                        assert_eq!(sender, common::types::Sender::Coordinator);
                    }
                    other => panic!("unexpected body: {other:?}"),
                }
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_verb() {
        let h = hospital();
        assert!(matches!(
            parse_command(&h, "FROBNICATE PAC001"),
            Err(CommandError::UnknownVerb(_))
        ));
    }

    #[test]
    fn test_handle_line_immediate_vs_deferred() {
        let h = hospital();
        let mut scheduler = DeferredScheduler::new();

        let action = handle_line(
            &h,
            &mut scheduler,
            "EMERGENCY PAC010 init: 0 triage: 2 stability: 120",
        );
        assert_eq!(action, Action::None);
        assert_eq!(h.mail.triage.len(), 1);
        assert!(scheduler.is_empty());

        handle_line(
            &h,
            &mut scheduler,
            "EMERGENCY PAC011 init: 500 triage: 2 stability: 120",
        );
        assert_eq!(h.mail.triage.len(), 1);
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.next_due().unwrap() >= 500);
    }

    #[test]
    fn test_handle_line_restock_applies() {
        let h = hospital();
        let mut scheduler = DeferredScheduler::new();
        let before = h.stock.cell(0).unwrap().snapshot().current;

        let action = handle_line(&h, &mut scheduler, "RESTOCK ANALGESICO_A quantity: 5");
        assert_eq!(action, Action::None);
        assert_eq!(h.stock.cell(0).unwrap().snapshot().current, before + 5);
    }

    #[test]
    fn test_handle_line_shutdown_and_invalid() {
        let h = hospital();
        let mut scheduler = DeferredScheduler::new();
        assert_eq!(handle_line(&h, &mut scheduler, "SHUTDOWN"), Action::Shutdown);
        assert_eq!(handle_line(&h, &mut scheduler, "garbage"), Action::None);
        assert_eq!(handle_line(&h, &mut scheduler, "   "), Action::None);
    }
}
