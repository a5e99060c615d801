use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type. Zero or negative means "unset".
pub type Ms = i64;

pub type RoomId = Ulid;
pub type BookingId = Ulid;
pub type EmployeeId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    /// Both ends set and `end > start`.
    pub fn is_well_formed(&self) -> bool {
        self.start > 0 && self.end > 0 && self.end > self.start
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// RFC 3339, UTC, second precision. Falls back to the raw ms for
/// out-of-range values.
pub fn format_ms(ms: Ms) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: Option<String>,
    pub location: Option<String>,
    /// `None` means the facility admin never set it.
    pub capacity: Option<u32>,
}

impl Room {
    pub fn new(id: RoomId, capacity: Option<u32>) -> Self {
        Self {
            id,
            name: None,
            location: None,
            capacity,
        }
    }
}

/// Partial room update: only `Some` fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
}

impl RoomPatch {
    pub fn apply(&self, room: &mut Room) {
        if let Some(ref n) = self.name {
            room.name = Some(n.clone());
        }
        if let Some(ref l) = self.location {
            room.location = Some(l.clone());
        }
        if let Some(c) = self.capacity {
            room.capacity = Some(c);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    pub organizer: EmployeeId,
    pub span: Span,
    pub attendees: u32,
    pub reminder_sent: bool,
    /// Provider event id, present only after a successful calendar sync.
    pub calendar_ref: Option<String>,
}

impl Booking {
    pub fn new(id: BookingId, room_id: RoomId, organizer: EmployeeId, span: Span, attendees: u32) -> Self {
        Self {
            id,
            room_id,
            organizer,
            span,
            attendees,
            reminder_sent: false,
            calendar_ref: None,
        }
    }
}

/// Contact record held by the employee directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub email: String,
}

/// A room and its bookings, kept sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get_booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Unflagged bookings whose start falls inside `window`.
    pub fn due_for_reminder(&self, window: &Span) -> impl Iterator<Item = &Booking> {
        let lo = self.bookings.partition_point(|b| b.span.start < window.start);
        let hi = self.bookings.partition_point(|b| b.span.start < window.end);
        self.bookings[lo..hi].iter().filter(|b| !b.reminder_sent)
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: RoomId,
        name: Option<String>,
        location: Option<String>,
        capacity: Option<u32>,
    },
    RoomUpdated {
        id: RoomId,
        name: Option<String>,
        location: Option<String>,
        capacity: Option<u32>,
    },
    RoomDeleted {
        id: RoomId,
    },
    BookingCreated {
        booking: Booking,
    },
    /// Full replacement; `previous_room` differs from `booking.room_id` on a room move.
    BookingUpdated {
        previous_room: RoomId,
        booking: Booking,
    },
    BookingDeleted {
        id: BookingId,
        room_id: RoomId,
    },
    ReminderMarked {
        id: BookingId,
        room_id: RoomId,
    },
    CalendarRefSet {
        id: BookingId,
        room_id: RoomId,
        calendar_ref: Option<String>,
    },
}
