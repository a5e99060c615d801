//! Conflict & capacity validation.
//!
//! Pure function over a candidate, the other bookings of its room, and the
//! room itself. No I/O and no locking: callers serialize same-room writes.

use crate::limits::*;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidInterval(Span),
    CapacityExceeded { attendees: u32, capacity: u32 },
    CapacityUnset(RoomId),
    TimeConflict(BookingId),
    RoomMismatch { expected: RoomId, got: RoomId },
    NoAttendees,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidInterval(span) => {
                write!(f, "invalid interval [{}, {})", span.start, span.end)
            }
            ValidationError::CapacityExceeded {
                attendees,
                capacity,
            } => write!(f, "capacity exceeded: {attendees} attendees, room holds {capacity}"),
            ValidationError::CapacityUnset(id) => write!(f, "room {id} has no capacity set"),
            ValidationError::TimeConflict(id) => write!(f, "time conflicts with booking {id}"),
            ValidationError::RoomMismatch { expected, got } => {
                write!(f, "booking targets room {got}, validated against room {expected}")
            }
            ValidationError::NoAttendees => write!(f, "attendee count must be positive"),
        }
    }
}

impl std::error::Error for ValidationError {}

pub(crate) fn check_interval(span: &Span) -> Result<(), ValidationError> {
    if !span.is_well_formed()
        || span.start < MIN_VALID_TIMESTAMP_MS
        || span.end > MAX_VALID_TIMESTAMP_MS
        || span.duration_ms() > MAX_BOOKING_DURATION_MS
    {
        return Err(ValidationError::InvalidInterval(*span));
    }
    Ok(())
}

pub(crate) fn check_capacity(attendees: u32, room: &Room) -> Result<(), ValidationError> {
    let capacity = room.capacity.ok_or(ValidationError::CapacityUnset(room.id))?;
    if attendees > capacity {
        return Err(ValidationError::CapacityExceeded {
            attendees,
            capacity,
        });
    }
    Ok(())
}

/// First booking in `existing` (other than the candidate itself, same room)
/// whose span overlaps the candidate's.
pub(crate) fn find_conflict<'a>(
    candidate: &Booking,
    existing: impl IntoIterator<Item = &'a Booking>,
) -> Option<&'a Booking> {
    existing.into_iter().find(|b| {
        b.id != candidate.id && b.room_id == candidate.room_id && b.span.overlaps(&candidate.span)
    })
}

/// Decide whether `candidate` may be committed to `room`.
///
/// `existing` is whatever the caller loaded for the room; entries for other
/// rooms and the candidate's own previous version are ignored, so the same
/// call serves both creates and updates.
pub fn validate(candidate: &Booking, existing: &[Booking], room: &Room) -> Result<(), ValidationError> {
    check_interval(&candidate.span)?;
    if candidate.room_id != room.id {
        return Err(ValidationError::RoomMismatch {
            expected: room.id,
            got: candidate.room_id,
        });
    }
    if candidate.attendees == 0 {
        return Err(ValidationError::NoAttendees);
    }
    check_capacity(candidate.attendees, room)?;
    if let Some(b) = find_conflict(candidate, existing) {
        return Err(ValidationError::TimeConflict(b.id));
    }
    Ok(())
}
