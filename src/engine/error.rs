use chrono::NaiveTime;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// `start >= end` — the range can never hold a reservation.
    TimeRangeInvalid {
        start: NaiveTime,
        end: NaiveTime,
    },
    /// The room already has an approved booking overlapping the requested
    /// range; carries the conflicting booking's id.
    SlotConflict(Ulid),
    /// Admin-supplied faculty_email did not resolve to a faculty account.
    UnknownFacultyEmail(String),
    /// The transition is not legal from the booking's current status.
    InvalidStateTransition {
        action: &'static str,
        status: BookingStatus,
    },
    /// Actor lacks the role or ownership the operation requires.
    Forbidden(&'static str),
    /// Room still holds bookings and cannot be deleted.
    RoomInUse(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::TimeRangeInvalid { start, end } => {
                write!(f, "invalid time range: start {start} is not before end {end}")
            }
            EngineError::SlotConflict(id) => {
                write!(f, "room already booked for that time (conflicts with {id})")
            }
            EngineError::UnknownFacultyEmail(email) => {
                write!(f, "no faculty account for email: {email}")
            }
            EngineError::InvalidStateTransition { action, status } => {
                write!(f, "cannot {action} booking with status: {status}")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::RoomInUse(id) => {
                write!(f, "cannot delete room {id}: bookings exist")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
