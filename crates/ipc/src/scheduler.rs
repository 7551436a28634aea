//! Deferred-event scheduler — records waiting for their submission tick.
//!
//! Kept sorted ascending by `(due_tick, insertion_order)`. Owned and
//! drained by the coordinator loop; not shared across threads.

use std::sync::Arc;

use common::clock::Tick;

use crate::mailbox::Mailbox;
use crate::message::Message;

#[derive(Debug)]
struct ScheduledEvent {
    due_tick: Tick,
    seq: u64,
    target: Arc<Mailbox>,
    msg: Message,
}

#[derive(Debug, Default)]
pub struct DeferredScheduler {
    // Sorted by (due_tick, seq); equal due ticks keep insertion order.
    entries: Vec<ScheduledEvent>,
    next_seq: u64,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, due_tick: Tick, target: Arc<Mailbox>, msg: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let pos = self
            .entries
            .partition_point(|e| e.due_tick <= due_tick);
        self.entries.insert(
            pos,
            ScheduledEvent {
                due_tick,
                seq,
                target,
                msg,
            },
        );
        tracing::debug!(due_tick, seq, "event scheduled");
    }

    /// Send every entry due at or before `current_tick`. Returns how many
    /// were delivered; entries whose send fails (shutdown) are dropped.
    pub fn drain(&mut self, current_tick: Tick) -> usize {
        let mut sent = 0;
        while self
            .entries
            .first()
            .is_some_and(|e| e.due_tick <= current_tick)
        {
            let event = self.entries.remove(0);
            match event.target.send(event.msg) {
                Ok(()) => {
                    sent += 1;
                    tracing::debug!(
                        due_tick = event.due_tick,
                        current_tick,
                        mailbox = event.target.name(),
                        "deferred event delivered"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        due_tick = event.due_tick,
                        mailbox = event.target.name(),
                        "deferred event dropped: {err}"
                    );
                }
            }
        }
        sent
    }

    /// Tick of the earliest pending entry.
    pub fn next_due(&self) -> Option<Tick> {
        self.entries.first().map(|e| e.due_tick)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
