use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — bookkeeping timestamps only.
pub type Ms = i64;

pub type UserId = Ulid;
pub type RoomId = Ulid;
pub type BookingId = Ulid;

/// Half-open time-of-day range `[start, end)` within a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSpan {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeSpan start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// Flat role set carried over from the account directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Faculty,
    Student,
    StudentRep,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Faculty => "faculty",
            Role::Student => "student",
            Role::StudentRep => "student_rep",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "faculty" => Ok(Role::Faculty),
            "student" => Ok(Role::Student),
            "student_rep" => Ok(Role::StudentRep),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "approved" => Ok(BookingStatus::Approved),
            "rejected" => Ok(BookingStatus::Rejected),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reservation of a room for `[span.start, span.end)` on `date`.
///
/// `decided_by`/`decided_at` record the last approve OR reject action; the
/// decision itself is the `status` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room_id: RoomId,
    pub requester: UserId,
    pub date: NaiveDate,
    pub span: TimeSpan,
    pub purpose: Option<String>,
    /// Delivery override set when an admin books on behalf of a faculty
    /// member; notifications go here instead of the requester's address.
    pub faculty_email: Option<String>,
    pub status: BookingStatus,
    pub rejection_reason: Option<String>,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<Ms>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: RoomId,
    pub number: String,
    /// All bookings on this room, sorted by `(date, span.start)`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(id: RoomId, number: String) -> Self {
        Self {
            id,
            number,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by `(date, span.start)`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.span.start);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.span.start) < key);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == id) {
            Some(self.bookings.remove(pos))
        } else {
            None
        }
    }

    pub fn get_booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings on `date` whose range overlaps `query`, regardless of status.
    /// Binary search skips everything sorted at or after `(date, query.end)`.
    pub fn overlapping(&self, date: NaiveDate, query: &TimeSpan) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| (b.date, b.span.start) < (date, query.end));
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.date == date && b.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// `BookingCreated` carries the full record (including decision fields) so a
/// compacted WAL can snapshot any booking in one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserCreated {
        id: UserId,
        username: String,
        email: String,
        role: Role,
    },
    UserDeleted {
        id: UserId,
    },
    RoomCreated {
        id: RoomId,
        number: String,
    },
    RoomDeleted {
        id: RoomId,
    },
    BookingCreated {
        id: BookingId,
        room_id: RoomId,
        requester: UserId,
        date: NaiveDate,
        span: TimeSpan,
        purpose: Option<String>,
        faculty_email: Option<String>,
        status: BookingStatus,
        rejection_reason: Option<String>,
        decided_by: Option<UserId>,
        decided_at: Option<Ms>,
        created_at: Ms,
    },
    BookingApproved {
        id: BookingId,
        room_id: RoomId,
        by: UserId,
        at: Ms,
    },
    BookingRejected {
        id: BookingId,
        room_id: RoomId,
        by: UserId,
        at: Ms,
        reason: Option<String>,
    },
    BookingCancelled {
        id: BookingId,
        room_id: RoomId,
        at: Ms,
    },
    BookingDestroyed {
        id: BookingId,
        room_id: RoomId,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: RoomId,
    pub number: String,
    pub booking_count: usize,
}
