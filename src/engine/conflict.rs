use chrono::{NaiveDate, NaiveTime};

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// A range with `start >= end` can never hold a reservation.
pub(crate) fn validate_time_range(start: NaiveTime, end: NaiveTime) -> Result<(), EngineError> {
    if start >= end {
        return Err(EngineError::TimeRangeInvalid { start, end });
    }
    Ok(())
}

/// Scan the room for an approved booking overlapping `[span.start, span.end)`
/// on `date`. Two ranges overlap iff `s1 < e2 && e1 > s2`; ranges that merely
/// touch do not. Only `approved` bookings block — pending, rejected, and
/// cancelled never count. `exclude` removes one booking from the scan so a
/// record is never tested against itself.
///
/// Pure check against the current committed room state; no side effects.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    date: NaiveDate,
    span: &TimeSpan,
    exclude: Option<BookingId>,
) -> Result<(), EngineError> {
    for booking in rs.overlapping(date, span) {
        if booking.status != BookingStatus::Approved {
            continue;
        }
        if exclude == Some(booking.id) {
            continue;
        }
        if booking.span.overlaps(span) {
            return Err(EngineError::SlotConflict(booking.id));
        }
    }
    Ok(())
}
