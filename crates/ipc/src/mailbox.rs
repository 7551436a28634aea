//! Priority mailboxes.
//!
//! Delivery order is (priority, FIFO-within-priority). Filtered receives
//! (`recv_exact_kind`, correlation ranges) leave non-matching records
//! queued. A `Shutdown` record is eligible for every receive regardless of
//! the filter, so a single poison pill wakes any reader.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use common::shutdown::{ShutdownFlag, CANCEL_POLL};
use common::types::Priority;

use crate::message::{Kind, Message};

/// Records a mailbox holds before `send` starts blocking.
pub const DEFAULT_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("mailbox send aborted by shutdown")]
    Shutdown,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    msg: Message,
}

#[derive(Debug, Default)]
struct Inner {
    entries: VecDeque<Entry>,
    next_seq: u64,
}

#[derive(Debug)]
pub struct Mailbox {
    name: &'static str,
    capacity: usize,
    inner: Mutex<Inner>,
    readable: Condvar,
    writable: Condvar,
    shutdown: Arc<ShutdownFlag>,
}

impl Mailbox {
    pub fn new(name: &'static str, capacity: usize, shutdown: Arc<ShutdownFlag>) -> Self {
        Mailbox {
            name,
            capacity,
            inner: Mutex::new(Inner::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
            shutdown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocking send. Waits while the mailbox is at capacity, re-checking
    /// shutdown every `CANCEL_POLL`.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        let mut inner = self.inner.lock();
        while inner.entries.len() >= self.capacity {
            if self.shutdown.is_set() {
                return Err(SendError::Shutdown);
            }
            self.writable.wait_for(&mut inner, CANCEL_POLL);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(Entry { seq, msg });
        drop(inner);
        self.readable.notify_all();
        Ok(())
    }

    /// Inject a poison pill, bypassing the capacity bound so shutdown can
    /// never be blocked by a full mailbox. One pill per reader thread.
    pub fn send_poison(&self) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push_back(Entry {
            seq,
            msg: Message::poison(),
        });
        drop(inner);
        self.readable.notify_all();
    }

    /// Receive the next record in (priority, FIFO) order.
    pub fn recv_any(&self) -> Option<Message> {
        self.recv_matching(|_| true)
    }

    /// Receive the first record with `priority <= max_prio`.
    pub fn recv_up_to_priority(&self, max_prio: Priority) -> Option<Message> {
        self.recv_matching(move |m| m.priority <= max_prio)
    }

    /// Receive the first record of the given kind, leaving others queued.
    pub fn recv_exact_kind(&self, kind: Kind) -> Option<Message> {
        self.recv_matching(move |m| m.kind() == kind)
    }

    /// Receive the first record with `operation_id <= max_corr`.
    pub fn recv_up_to_correlation(&self, max_corr: u32) -> Option<Message> {
        self.recv_matching(move |m| m.operation_id <= max_corr)
    }

    /// Receive the first record with `operation_id >= min_corr`.
    pub fn recv_from_correlation(&self, min_corr: u32) -> Option<Message> {
        self.recv_matching(move |m| m.operation_id >= min_corr)
    }

    /// Core receive: block until a record matching `filter` (or any
    /// `Shutdown` record) is available; pick the eligible record with the
    /// lowest (priority, seq). Returns `None` only when shutdown is flagged
    /// and nothing eligible is queued.
    fn recv_matching<F>(&self, filter: F) -> Option<Message>
    where
        F: Fn(&Message) -> bool,
    {
        let mut inner = self.inner.lock();
        loop {
            let best = inner
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.msg.kind() == Kind::Shutdown || filter(&e.msg))
                .min_by_key(|(_, e)| (e.msg.priority, e.seq))
                .map(|(i, _)| i);

            if let Some(i) = best {
                let entry = inner.entries.remove(i).expect("index valid under lock");
                drop(inner);
                self.writable.notify_all();
                return Some(entry.msg);
            }

            if self.shutdown.is_set() {
                return None;
            }
            self.readable.wait_for(&mut inner, CANCEL_POLL);
        }
    }
}

/// The five system mailboxes.
#[derive(Debug)]
pub struct Mailboxes {
    pub triage: Arc<Mailbox>,
    pub surgery: Arc<Mailbox>,
    pub pharmacy: Arc<Mailbox>,
    pub lab: Arc<Mailbox>,
    pub responses: Arc<Mailbox>,
}

impl Mailboxes {
    pub fn new(shutdown: Arc<ShutdownFlag>) -> Self {
        let mk = |name| Arc::new(Mailbox::new(name, DEFAULT_CAPACITY, Arc::clone(&shutdown)));
        Mailboxes {
            triage: mk("triage"),
            surgery: mk("surgery"),
            pharmacy: mk("pharmacy"),
            lab: mk("lab"),
            responses: mk("responses"),
        }
    }
}
