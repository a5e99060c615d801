//! Collaborator seams. Booking flows and the reminder scheduler only ever see
//! these traits; concrete storage, mail and calendar live behind them.

use async_trait::async_trait;

use crate::model::*;
use crate::store::StoreError;

#[async_trait]
pub trait StorageReader: Send + Sync {
    async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Bookings of `room_id` whose span overlaps `window`.
    async fn bookings_overlapping(&self, room_id: RoomId, window: Span) -> Result<Vec<Booking>, StoreError>;

    /// Bookings across all rooms with `start` inside `window` and `reminder_sent == false`.
    async fn bookings_due_for_reminder(&self, window: Span) -> Result<Vec<Booking>, StoreError>;
}

#[async_trait]
pub trait StorageWriter: Send + Sync {
    async fn create_room(&self, room: Room) -> Result<(), StoreError>;

    async fn update_room(&self, id: RoomId, patch: RoomPatch) -> Result<Room, StoreError>;

    async fn delete_room(&self, id: RoomId) -> Result<(), StoreError>;

    /// Must reject with `StoreError::Conflict` if a same-room booking overlaps.
    async fn create(&self, booking: Booking) -> Result<BookingId, StoreError>;

    /// Replace a booking's room, time, attendees and calendar ref. Same
    /// exclusion rule as `create`. `reminder_sent` is not taken from the
    /// argument: the stored flag is kept unless the start changed, in which
    /// case it resets. Returns the row as stored.
    async fn update(&self, booking: Booking) -> Result<Booking, StoreError>;

    async fn delete(&self, id: BookingId) -> Result<Booking, StoreError>;

    /// Flag the reminder as sent, but only while the booking still starts at
    /// `reminded_start`. A booking moved in the meantime stays unflagged.
    async fn mark_reminder_sent(&self, id: BookingId, reminded_start: Ms) -> Result<(), StoreError>;

    async fn set_calendar_ref(&self, id: BookingId, calendar_ref: Option<String>) -> Result<(), StoreError>;
}

pub trait Storage: StorageReader + StorageWriter {}

impl<T: StorageReader + StorageWriter> Storage for T {}

// ── Contacts ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactError {
    UnknownEmployee(EmployeeId),
    Unavailable(String),
}

impl std::fmt::Display for ContactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactError::UnknownEmployee(id) => write!(f, "unknown employee: {id}"),
            ContactError::Unavailable(e) => write!(f, "contact lookup unavailable: {e}"),
        }
    }
}

impl std::error::Error for ContactError {}

#[async_trait]
pub trait ContactResolver: Send + Sync {
    async fn email_for(&self, employee_id: EmployeeId) -> Result<String, ContactError>;
}

// ── Notifications ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    InvalidRecipient(String),
    Transport(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::InvalidRecipient(to) => write!(f, "invalid recipient: {to:?}"),
            NotifyError::Transport(e) => write!(f, "notification transport failed: {e}"),
        }
    }
}

impl std::error::Error for NotifyError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

// ── Calendar ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    NotLinked(EmployeeId),
    Provider(String),
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::NotLinked(id) => write!(f, "no calendar linked for employee {id}"),
            CalendarError::Provider(e) => write!(f, "calendar provider error: {e}"),
        }
    }
}

impl std::error::Error for CalendarError {}

/// Best-effort mirror of bookings into an external calendar.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    /// Returns the provider's event reference.
    async fn create_event(&self, booking: &Booking) -> Result<String, CalendarError>;

    async fn delete_event(&self, organizer: EmployeeId, event_ref: &str) -> Result<(), CalendarError>;
}
