//! Booking flows over the collaborator traits.
//!
//! Every write to a room runs inside that room's critical section: load the
//! room and its overlapping bookings, validate, persist. Confirmation mail and
//! calendar mirroring happen after the lock is released and never fail the
//! operation.

mod error;

pub use error::BookingError;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability as obs;
use crate::ports::{CalendarSync, ContactResolver, Notifier, Storage};
use crate::validate::{check_interval, validate};

pub const CONFIRMED_SUBJECT: &str = "Meeting Room Booking Confirmation";
pub const UPDATED_SUBJECT: &str = "Meeting Room Booking Updated and Confirmed";
pub const CANCELLED_SUBJECT: &str = "Meeting Room Booking Cancelled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub room_id: RoomId,
    pub organizer: EmployeeId,
    pub span: Span,
    pub attendees: u32,
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingChanges {
    pub room_id: Option<RoomId>,
    pub span: Option<Span>,
    pub attendees: Option<u32>,
}

impl BookingChanges {
    fn apply(&self, booking: &mut Booking) {
        if let Some(room_id) = self.room_id {
            booking.room_id = room_id;
        }
        if let Some(span) = self.span {
            booking.span = span;
        }
        if let Some(attendees) = self.attendees {
            booking.attendees = attendees;
        }
    }
}

pub struct BookingService {
    storage: Arc<dyn Storage>,
    contacts: Arc<dyn ContactResolver>,
    notifier: Arc<dyn Notifier>,
    calendar: Option<Arc<dyn CalendarSync>>,
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl BookingService {
    pub fn new(storage: Arc<dyn Storage>, contacts: Arc<dyn ContactResolver>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            storage,
            contacts,
            notifier,
            calendar: None,
            room_locks: DashMap::new(),
        }
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarSync>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn create(&self, req: NewBooking) -> Result<Booking, BookingError> {
        let result = self.create_inner(req).await;
        record("create", &result);
        let mut booking = result?;

        info!("booking {} created in room {}", booking.id, booking.room_id);
        self.notify_organizer(&booking, CONFIRMED_SUBJECT, "confirmed").await;
        self.mirror_to_calendar(&mut booking).await;
        Ok(booking)
    }

    async fn create_inner(&self, req: NewBooking) -> Result<Booking, BookingError> {
        let _guard = self.room_lock(req.room_id).lock_owned().await;
        let room = self
            .storage
            .room(req.room_id)
            .await?
            .ok_or(BookingError::NotFound(req.room_id))?;

        let candidate = Booking::new(Ulid::new(), req.room_id, req.organizer, req.span, req.attendees);
        check_interval(&candidate.span)?;
        let existing = self.storage.bookings_overlapping(room.id, candidate.span).await?;
        validate(&candidate, &existing, &room)?;

        self.storage.create(candidate.clone()).await?;
        Ok(candidate)
    }

    /// Change room, time or attendees of a booking its organizer owns.
    ///
    /// Moving the start time clears `reminder_sent` so the new slot gets its
    /// own reminder; any other change leaves the flag alone.
    pub async fn update(
        &self,
        id: BookingId,
        organizer: EmployeeId,
        changes: BookingChanges,
    ) -> Result<Booking, BookingError> {
        let result = self.update_inner(id, organizer, &changes).await;
        record("update", &result);
        let (previous, mut booking) = result?;

        info!("booking {id} updated");
        if self.calendar.is_some() {
            self.remove_from_calendar(&previous).await;
            self.mirror_to_calendar(&mut booking).await;
        }
        self.notify_organizer(&booking, UPDATED_SUBJECT, "updated and confirmed").await;
        Ok(booking)
    }

    async fn update_inner(
        &self,
        id: BookingId,
        organizer: EmployeeId,
        changes: &BookingChanges,
    ) -> Result<(Booking, Booking), BookingError> {
        // Lock the booking's current room and its target room; if a concurrent
        // move got there first, take the locks again for the room it is in now.
        let (existing, _guards) = loop {
            let seen = self.load_owned(id, organizer).await?;
            let target = changes.room_id.unwrap_or(seen.room_id);
            let guards = self.lock_rooms(seen.room_id, target).await;
            let current = self.load_owned(id, organizer).await?;
            if current.room_id == seen.room_id {
                break (current, guards);
            }
            debug!("booking {id} moved while waiting for its room lock, retrying");
        };

        let mut updated = existing.clone();
        changes.apply(&mut updated);
        if self.calendar.is_some() {
            updated.calendar_ref = None;
        }

        let room = self
            .storage
            .room(updated.room_id)
            .await?
            .ok_or(BookingError::NotFound(updated.room_id))?;
        check_interval(&updated.span)?;
        let others = self.storage.bookings_overlapping(room.id, updated.span).await?;
        validate(&updated, &others, &room)?;

        // The store owns `reminder_sent`; the scheduler may flag it at any time.
        let stored = self.storage.update(updated).await?;
        Ok((existing, stored))
    }

    pub async fn delete(&self, id: BookingId, organizer: EmployeeId) -> Result<Booking, BookingError> {
        let result = self.delete_inner(id, organizer).await;
        record("delete", &result);
        let removed = result?;

        info!("booking {id} deleted from room {}", removed.room_id);
        self.remove_from_calendar(&removed).await;
        self.notify_organizer(&removed, CANCELLED_SUBJECT, "cancelled").await;
        Ok(removed)
    }

    async fn delete_inner(&self, id: BookingId, organizer: EmployeeId) -> Result<Booking, BookingError> {
        let existing = self.load_owned(id, organizer).await?;
        let _guard = self.room_lock(existing.room_id).lock_owned().await;
        // Ownership never changes, so only existence needs re-checking.
        Ok(self.storage.delete(id).await?)
    }

    pub async fn get(&self, id: BookingId, organizer: EmployeeId) -> Result<Booking, BookingError> {
        self.load_owned(id, organizer).await
    }

    /// Bookings of a room overlapping `window`, ordered by start.
    pub async fn list_for_room(&self, room_id: RoomId, window: Span) -> Result<Vec<Booking>, BookingError> {
        if self.storage.room(room_id).await?.is_none() {
            return Err(BookingError::NotFound(room_id));
        }
        Ok(self.storage.bookings_overlapping(room_id, window).await?)
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<Room, BookingError> {
        let result = self.storage.create_room(room.clone()).await.map_err(BookingError::from);
        record("create_room", &result);
        result?;
        info!("room {} created (capacity {:?})", room.id, room.capacity);
        Ok(room)
    }

    pub async fn update_room(&self, id: RoomId, patch: RoomPatch) -> Result<Room, BookingError> {
        let _guard = self.room_lock(id).lock_owned().await;
        let result = self.storage.update_room(id, patch).await.map_err(BookingError::from);
        record("update_room", &result);
        result
    }

    /// Fails with `StoreError::RoomInUse` while the room still has bookings.
    pub async fn delete_room(&self, id: RoomId) -> Result<(), BookingError> {
        let lock = self.room_lock(id);
        let result = {
            let _guard = lock.lock().await;
            self.storage.delete_room(id).await.map_err(BookingError::from)
        };
        drop(lock);
        record("delete_room", &result);
        result?;
        // Forget the lock only if no other task still holds a clone of it; a
        // room re-created under the same id must keep the same mutex.
        self.room_locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        info!("room {id} deleted");
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────

    fn room_lock(&self, id: RoomId) -> Arc<Mutex<()>> {
        self.room_locks.entry(id).or_default().value().clone()
    }

    /// Lock both rooms in id order so concurrent moves cannot deadlock.
    async fn lock_rooms(&self, a: RoomId, b: RoomId) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = vec![a, b];
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.room_lock(id).lock_owned().await);
        }
        guards
    }

    async fn load_owned(&self, id: BookingId, organizer: EmployeeId) -> Result<Booking, BookingError> {
        let booking = self.storage.booking(id).await?.ok_or(BookingError::NotFound(id))?;
        if booking.organizer != organizer {
            return Err(BookingError::NotOwner {
                booking: id,
                employee: organizer,
            });
        }
        Ok(booking)
    }

    async fn notify_organizer(&self, booking: &Booking, subject: &str, outcome: &str) {
        let to = match self.contacts.email_for(booking.organizer).await {
            Ok(to) => to,
            Err(e) => {
                warn!("no {outcome} mail for booking {}: {e}", booking.id);
                return;
            }
        };
        let body = format!(
            "Your booking for Room {} from {} to {} has been {outcome}.",
            booking.room_id,
            format_ms(booking.span.start),
            format_ms(booking.span.end),
        );
        if let Err(e) = self.notifier.send(&to, subject, &body).await {
            warn!("{outcome} mail for booking {} to {to} failed: {e}", booking.id);
        }
    }

    async fn mirror_to_calendar(&self, booking: &mut Booking) {
        let Some(calendar) = &self.calendar else { return };
        let event_ref = match calendar.create_event(booking).await {
            Ok(r) => r,
            Err(e) => {
                warn!("calendar event for booking {} not created: {e}", booking.id);
                return;
            }
        };
        match self.storage.set_calendar_ref(booking.id, Some(event_ref.clone())).await {
            Ok(()) => booking.calendar_ref = Some(event_ref),
            Err(e) => warn!("calendar ref for booking {} not stored: {e}", booking.id),
        }
    }

    async fn remove_from_calendar(&self, booking: &Booking) {
        let (Some(calendar), Some(event_ref)) = (&self.calendar, &booking.calendar_ref) else {
            return;
        };
        if let Err(e) = calendar.delete_event(booking.organizer, event_ref).await {
            warn!("calendar event {event_ref} for booking {} not deleted: {e}", booking.id);
        }
    }
}

fn record<T>(op: &'static str, result: &Result<T, BookingError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => {
            debug!("{op} rejected: {e}");
            e.label()
        }
    };
    metrics::counter!(obs::BOOKINGS_TOTAL, "op" => op, "status" => status).increment(1);
}
