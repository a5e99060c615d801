use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::debug;

use crate::limits::*;
use crate::model::*;

use super::{apply_to_room, Store, StoreError, WalCommand};

fn check_name(name: &Option<String>) -> Result<(), StoreError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(StoreError::LimitExceeded("name too long"));
    }
    Ok(())
}

/// Exclusion check inside the room's write lock. `exclude` is the booking
/// being replaced, if any.
fn check_exclusion(rs: &RoomState, span: &Span, exclude: Option<BookingId>) -> Result<(), StoreError> {
    match rs.overlapping(span).find(|b| Some(b.id) != exclude) {
        Some(b) => Err(StoreError::Conflict(b.id)),
        None => Ok(()),
    }
}

/// The stored flag wins over the caller's copy of it: it survives a replace
/// unless the start moved, in which case the new slot is due again.
fn carry_reminder_flag(rs: &RoomState, booking: &mut Booking) -> Result<(), StoreError> {
    let stored = rs
        .bookings
        .iter()
        .find(|b| b.id == booking.id)
        .ok_or(StoreError::NotFound(booking.id))?;
    booking.reminder_sent = stored.reminder_sent && stored.span.start == booking.span.start;
    Ok(())
}

impl Store {
    pub async fn insert_room(&self, room: Room) -> Result<(), StoreError> {
        if self.rooms.len() >= MAX_ROOMS {
            return Err(StoreError::LimitExceeded("too many rooms"));
        }
        check_name(&room.name)?;
        check_name(&room.location)?;
        if self.rooms.contains_key(&room.id) {
            return Err(StoreError::AlreadyExists(room.id));
        }

        let event = Event::RoomCreated {
            id: room.id,
            name: room.name.clone(),
            location: room.location.clone(),
            capacity: room.capacity,
        };
        self.wal_append(&event).await?;
        self.rooms.insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
        Ok(())
    }

    pub async fn patch_room(&self, id: RoomId, patch: RoomPatch) -> Result<Room, StoreError> {
        check_name(&patch.name)?;
        check_name(&patch.location)?;
        let rs = self.get_room_state(&id).ok_or(StoreError::NotFound(id))?;
        let mut guard = rs.write().await;

        let mut room = guard.room.clone();
        patch.apply(&mut room);
        let event = Event::RoomUpdated {
            id,
            name: room.name.clone(),
            location: room.location.clone(),
            capacity: room.capacity,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room)
    }

    pub async fn remove_room(&self, id: RoomId) -> Result<(), StoreError> {
        let rs = self.get_room_state(&id).ok_or(StoreError::NotFound(id))?;
        let guard = rs.write().await;
        if !guard.bookings.is_empty() {
            return Err(StoreError::RoomInUse(id));
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.rooms.remove(&id);
        Ok(())
    }

    pub async fn insert_booking(&self, booking: Booking) -> Result<BookingId, StoreError> {
        if self.booking_to_room.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists(booking.id));
        }
        let rs = self
            .get_room_state(&booking.room_id)
            .ok_or(StoreError::NotFound(booking.room_id))?;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many bookings on room"));
        }
        check_exclusion(&guard, &booking.span, None)?;

        let id = booking.id;
        let event = Event::BookingCreated { booking };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    /// Replace a booking and return the row as stored. A room move takes both
    /// rooms' write locks in id order so two opposite moves cannot deadlock.
    pub async fn replace_booking(&self, mut booking: Booking) -> Result<Booking, StoreError> {
        let previous_room = self
            .room_for_booking(&booking.id)
            .ok_or(StoreError::NotFound(booking.id))?;

        if previous_room == booking.room_id {
            let rs = self
                .get_room_state(&previous_room)
                .ok_or(StoreError::NotFound(previous_room))?;
            let mut guard = rs.write().await;
            carry_reminder_flag(&guard, &mut booking)?;
            check_exclusion(&guard, &booking.span, Some(booking.id))?;
            let event = Event::BookingUpdated {
                previous_room,
                booking: booking.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            return Ok(booking);
        }

        let old_rs = self
            .get_room_state(&previous_room)
            .ok_or(StoreError::NotFound(previous_room))?;
        let new_rs = self
            .get_room_state(&booking.room_id)
            .ok_or(StoreError::NotFound(booking.room_id))?;
        let (mut old_guard, mut new_guard) = if previous_room < booking.room_id {
            let o = old_rs.write_owned().await;
            let n = new_rs.write_owned().await;
            (o, n)
        } else {
            let n = new_rs.write_owned().await;
            let o = old_rs.write_owned().await;
            (o, n)
        };

        carry_reminder_flag(&old_guard, &mut booking)?;
        if new_guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(StoreError::LimitExceeded("too many bookings on room"));
        }
        check_exclusion(&new_guard, &booking.span, Some(booking.id))?;

        let event = Event::BookingUpdated {
            previous_room,
            booking: booking.clone(),
        };
        self.wal_append(&event).await?;
        apply_to_room(&mut old_guard, &event, &self.booking_to_room);
        apply_to_room(&mut new_guard, &event, &self.booking_to_room);
        Ok(booking)
    }

    pub async fn remove_booking(&self, id: BookingId) -> Result<Booking, StoreError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        let event = Event::BookingDeleted { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    /// Flag the reminder for the slot starting at `reminded_start`. A no-op if
    /// the booking is already flagged or has since moved to another start.
    pub async fn flag_reminder(&self, id: BookingId, reminded_start: Ms) -> Result<(), StoreError> {
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let stored = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if stored.reminder_sent {
            return Ok(());
        }
        if stored.span.start != reminded_start {
            debug!("booking {id} moved off {reminded_start} before its reminder was flagged");
            return Ok(());
        }
        let event = Event::ReminderMarked { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn store_calendar_ref(&self, id: BookingId, calendar_ref: Option<String>) -> Result<(), StoreError> {
        check_name(&calendar_ref)?;
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        if !guard.bookings.iter().any(|b| b.id == id) {
            return Err(StoreError::NotFound(id));
        }
        let event = Event::CalendarRefSet {
            id,
            room_id,
            calendar_ref,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Compact the WAL down to the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let mut events = Vec::new();
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        // Read locks stay held until the swap so no booking write lands
        // in the old file after its room was snapshotted.
        let mut guards = Vec::with_capacity(states.len());
        for rs in states {
            let guard = rs.read_owned().await;
            events.push(Event::RoomCreated {
                id: guard.room.id,
                name: guard.room.name.clone(),
                location: guard.room.location.clone(),
                capacity: guard.room.capacity,
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
