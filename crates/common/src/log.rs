//! Hospital event log — append-only file sink plus a 1000-slot circular
//! buffer of critical events.
//!
//! Line format: `[YYYY-MM-DD HH:MM:SS] [<component>] [<severity>]
//! [<event_type>] <details>`. Critical/Error events are additionally
//! appended to the ring; every write also emits the matching `tracing`
//! event for console observability.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// Capacity of the critical-event ring buffer.
pub const RING_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl Severity {
    pub fn name(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
        }
    }

    fn goes_to_ring(self) -> bool {
        matches!(self, Severity::Critical | Severity::Error)
    }
}

#[derive(Debug, Clone)]
pub struct CriticalEvent {
    pub timestamp: DateTime<Local>,
    pub component: String,
    pub event_type: String,
    pub description: String,
    pub severity: Severity,
}

#[derive(Debug, Default)]
struct RingInner {
    events: Vec<CriticalEvent>,
    write_index: usize,
    event_count: usize,
}

/// Circular buffer of the most recent critical events. The writer index
/// wraps; `event_count` saturates at capacity.
#[derive(Debug, Default)]
pub struct CriticalRing {
    inner: Mutex<RingInner>,
}

impl CriticalRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: CriticalEvent) {
        let mut inner = self.inner.lock();
        let idx = inner.write_index;
        if inner.events.len() < RING_CAPACITY {
            inner.events.push(event);
        } else {
            inner.events[idx] = event;
        }
        inner.write_index = (idx + 1) % RING_CAPACITY;
        if inner.event_count < RING_CAPACITY {
            inner.event_count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().event_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events oldest-first.
    pub fn snapshot(&self) -> Vec<CriticalEvent> {
        let inner = self.inner.lock();
        if inner.events.len() < RING_CAPACITY {
            inner.events.clone()
        } else {
            let mut out = Vec::with_capacity(RING_CAPACITY);
            out.extend_from_slice(&inner.events[inner.write_index..]);
            out.extend_from_slice(&inner.events[..inner.write_index]);
            out
        }
    }
}

/// The shared log sink. Cheap to clone via `Arc`; all writes are serialized
/// by the file mutex.
#[derive(Debug)]
pub struct EventLog {
    file: Mutex<Option<File>>,
    ring: Arc<CriticalRing>,
}

impl EventLog {
    /// Open (append) the log file, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;
        Ok(EventLog {
            file: Mutex::new(Some(file)),
            ring: Arc::new(CriticalRing::new()),
        })
    }

    /// Sink without a backing file. Ring and tracing output still work;
    /// used by tests and config-check.
    pub fn disabled() -> Self {
        EventLog {
            file: Mutex::new(None),
            ring: Arc::new(CriticalRing::new()),
        }
    }

    pub fn ring(&self) -> Arc<CriticalRing> {
        Arc::clone(&self.ring)
    }

    pub fn log(&self, severity: Severity, component: &str, event_type: &str, details: &str) {
        let now = Local::now();
        {
            let mut guard = self.file.lock();
            if let Some(file) = guard.as_mut() {
                let line = format!(
                    "[{}] [{}] [{}] [{}] {}\n",
                    now.format("%Y-%m-%d %H:%M:%S"),
                    component,
                    severity.name(),
                    event_type,
                    details
                );
                // A failed log write must never take the system down.
                let _ = file.write_all(line.as_bytes());
                let _ = file.flush();
            }
        }

        if severity.goes_to_ring() {
            self.ring.push(CriticalEvent {
                timestamp: now,
                component: component.to_string(),
                event_type: event_type.to_string(),
                description: details.to_string(),
                severity,
            });
        }

        match severity {
            Severity::Critical | Severity::Error => {
                tracing::error!(component, event = event_type, "{details}")
            }
            Severity::Warning => tracing::warn!(component, event = event_type, "{details}"),
            Severity::Info => tracing::info!(component, event = event_type, "{details}"),
            Severity::Debug => tracing::debug!(component, event = event_type, "{details}"),
        }
    }
}
