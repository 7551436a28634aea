//! Global shutdown flag. Every blocking wait in the system re-checks this
//! at least once per `CANCEL_POLL`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Poll interval for cancellable waits (timed condvar waits, chunked
/// sleeps, semaphore acquires).
pub const CANCEL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct ShutdownFlag {
    flag: AtomicBool,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }
}
