use crate::limits::*;
use crate::model::*;

use super::{Store, StoreError};

impl Store {
    pub async fn get_room(&self, id: RoomId) -> Option<Room> {
        let rs = self.get_room_state(&id)?;
        let guard = rs.read().await;
        Some(guard.room.clone())
    }

    pub async fn get_booking(&self, id: BookingId) -> Option<Booking> {
        let room_id = self.room_for_booking(&id)?;
        let rs = self.get_room_state(&room_id)?;
        let guard = rs.read().await;
        guard.bookings.iter().find(|b| b.id == id).cloned()
    }

    /// Bookings of one room overlapping `window`, ordered by start.
    /// An unknown room has no bookings.
    pub async fn list_bookings(&self, room_id: RoomId, window: Span) -> Result<Vec<Booking>, StoreError> {
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(StoreError::LimitExceeded("query window too wide"));
        }
        let Some(rs) = self.get_room_state(&room_id) else {
            return Ok(vec![]);
        };
        let guard = rs.read().await;
        Ok(guard.overlapping(&window).cloned().collect())
    }

    /// Unflagged bookings in every room whose start lies in `window`,
    /// ordered by start.
    pub async fn collect_due_reminders(&self, window: Span) -> Vec<Booking> {
        // Clone the Arcs first: never hold a DashMap shard across an await.
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut due = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            due.extend(guard.due_for_reminder(&window).cloned());
        }
        due.sort_by_key(|b| (b.span.start, b.id));
        due
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_room.len()
    }
}
