//! Response routing — where `PharmReady` / `LabResultsReady` records go.
//!
//! Surgery consumes responses on its own mailbox (same stream as
//! admissions, keyed by `operation_id = surgery_id`). Triage and the
//! coordinator share the Responses mailbox, split by correlation range.

use common::types::Sender;

use crate::mailbox::{Mailboxes, SendError};
use crate::message::Message;

pub fn route_response(mail: &Mailboxes, sender: Sender, msg: Message) -> Result<(), SendError> {
    match sender {
        Sender::Surgery => mail.surgery.send(msg),
        Sender::Triage | Sender::Coordinator => mail.responses.send(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Body, COORDINATOR_PHARMACY_LANE};
    use common::shutdown::ShutdownFlag;
    use common::types::Priority;
    use std::sync::Arc;

    fn response(operation_id: u32) -> Message {
        Message {
            priority: Priority::Normal,
            patient_id: "PAC001".to_string(),
            operation_id,
            timestamp: 0,
            body: Body::PharmReady { success: true },
        }
    }

    #[test]
    fn test_routing_targets() {
        let mail = Mailboxes::new(Arc::new(ShutdownFlag::new()));

        route_response(&mail, Sender::Surgery, response(3)).unwrap();
        route_response(&mail, Sender::Triage, response(1004)).unwrap();
        route_response(&mail, Sender::Coordinator, response(COORDINATOR_PHARMACY_LANE)).unwrap();

        assert_eq!(mail.surgery.len(), 1);
        assert_eq!(mail.responses.len(), 2);
        assert!(mail.pharmacy.is_empty());
    }
}
