//! Surgery block state — per-room status records and the medical-team pool.
//!
//! Room mutations happen under the room lock, after the room semaphore is
//! acquired and before it is released. Teams are a counter guarded by a
//! condvar, broadcast-woken on shutdown so no surgery worker is stranded.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use common::clock::Tick;
use common::shutdown::{ShutdownFlag, CANCEL_POLL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Free,
    Occupied,
    Cleaning,
}

#[derive(Debug, Clone)]
pub struct RoomStatus {
    pub state: RoomState,
    pub current_patient: Option<String>,
    pub start_tick: Tick,
    pub estimated_end_tick: Tick,
}

#[derive(Debug)]
pub struct OperatingRoom {
    id: usize,
    status: Mutex<RoomStatus>,
}

impl OperatingRoom {
    fn new(id: usize) -> Self {
        OperatingRoom {
            id,
            status: Mutex::new(RoomStatus {
                state: RoomState::Free,
                current_patient: None,
                start_tick: 0,
                estimated_end_tick: 0,
            }),
        }
    }

    /// 1-based room number (BO1..BO3).
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn occupy(&self, patient_id: &str, start_tick: Tick, estimated_end_tick: Tick) {
        let mut status = self.status.lock();
        status.state = RoomState::Occupied;
        status.current_patient = Some(patient_id.to_string());
        status.start_tick = start_tick;
        status.estimated_end_tick = estimated_end_tick;
    }

    pub fn begin_cleaning(&self) {
        self.status.lock().state = RoomState::Cleaning;
    }

    pub fn set_free(&self) {
        let mut status = self.status.lock();
        status.state = RoomState::Free;
        status.current_patient = None;
        status.start_tick = 0;
        status.estimated_end_tick = 0;
    }

    pub fn snapshot(&self) -> RoomStatus {
        self.status.lock().clone()
    }
}

/// Pool of medical teams shared by all surgeries.
#[derive(Debug)]
pub struct TeamPool {
    available: Mutex<usize>,
    max_teams: usize,
    teams_available: Condvar,
    shutdown: Arc<ShutdownFlag>,
}

impl TeamPool {
    pub fn new(max_teams: usize, shutdown: Arc<ShutdownFlag>) -> Self {
        TeamPool {
            available: Mutex::new(max_teams),
            max_teams,
            teams_available: Condvar::new(),
            shutdown,
        }
    }

    /// Wait for a free team. Returns `false` on shutdown.
    pub fn acquire(&self) -> bool {
        let mut available = self.available.lock();
        while *available == 0 {
            if self.shutdown.is_set() {
                return false;
            }
            self.teams_available.wait_for(&mut available, CANCEL_POLL);
        }
        *available -= 1;
        true
    }

    pub fn release(&self) {
        let mut available = self.available.lock();
        *available += 1;
        debug_assert!(*available <= self.max_teams);
        drop(available);
        self.teams_available.notify_all();
    }

    /// Wake every waiter so shutdown can unwind blocked surgery workers.
    pub fn broadcast(&self) {
        let _guard = self.available.lock();
        self.teams_available.notify_all();
    }

    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    pub fn max_teams(&self) -> usize {
        self.max_teams
    }
}

#[derive(Debug)]
pub struct SurgeryBlock {
    rooms: [OperatingRoom; 3],
    pub teams: TeamPool,
}

impl SurgeryBlock {
    pub fn new(max_teams: usize, shutdown: Arc<ShutdownFlag>) -> Self {
        SurgeryBlock {
            rooms: [
                OperatingRoom::new(1),
                OperatingRoom::new(2),
                OperatingRoom::new(3),
            ],
            teams: TeamPool::new(max_teams, shutdown),
        }
    }

    pub fn room(&self, room_index: usize) -> &OperatingRoom {
        &self.rooms[room_index]
    }

    pub fn rooms(&self) -> &[OperatingRoom; 3] {
        &self.rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_room_lifecycle() {
        let room = OperatingRoom::new(1);
        assert_eq!(room.snapshot().state, RoomState::Free);

        room.occupy("PAC001", 100, 150);
        let status = room.snapshot();
        assert_eq!(status.state, RoomState::Occupied);
        assert_eq!(status.current_patient.as_deref(), Some("PAC001"));
        assert_eq!(status.start_tick, 100);
        assert_eq!(status.estimated_end_tick, 150);

        room.begin_cleaning();
        assert_eq!(room.snapshot().state, RoomState::Cleaning);

        room.set_free();
        let status = room.snapshot();
        assert_eq!(status.state, RoomState::Free);
        assert!(status.current_patient.is_none());
    }

    #[test]
    fn test_team_pool_acquire_release() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let pool = TeamPool::new(2, shutdown);
        assert!(pool.acquire());
        assert!(pool.acquire());
        assert_eq!(pool.available(), 0);
        pool.release();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_team_pool_shutdown_unblocks_waiter() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let pool = Arc::new(TeamPool::new(1, Arc::clone(&shutdown)));
        assert!(pool.acquire());

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire())
        };
        std::thread::sleep(Duration::from_millis(50));
        shutdown.set();
        pool.broadcast();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_team_pool_waiter_gets_released_team() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let pool = Arc::new(TeamPool::new(1, shutdown));
        assert!(pool.acquire());

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.acquire())
        };
        std::thread::sleep(Duration::from_millis(50));
        pool.release();
        assert!(waiter.join().unwrap());
        assert_eq!(pool.available(), 0);
    }
}
