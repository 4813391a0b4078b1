use chrono::NaiveDate;

use crate::model::*;

use super::Engine;

/// Optional equality filters for booking listings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BookingFilter {
    pub room_id: Option<RoomId>,
    pub date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
    pub requester: Option<UserId>,
}

impl BookingFilter {
    fn matches(&self, b: &Booking) -> bool {
        self.room_id.is_none_or(|id| b.room_id == id)
            && self.date.is_none_or(|d| b.date == d)
            && self.status.is_none_or(|s| b.status == s)
            && self.requester.is_none_or(|u| b.requester == u)
    }
}

impl Engine {
    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .rooms
            .iter()
            .map(|entry| {
                let rs = entry.value().clone();
                let guard = rs.try_read().expect("list_rooms: uncontended read");
                RoomInfo {
                    id: guard.id,
                    number: guard.number.clone(),
                    booking_count: guard.bookings.len(),
                }
            })
            .collect();
        rooms.sort_by(|a, b| a.number.cmp(&b.number));
        rooms
    }

    pub async fn find_booking(&self, id: BookingId) -> Option<Booking> {
        let room_id = self.get_room_for_booking(&id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.get_booking(id).cloned()
    }

    /// All bookings matching `filter`, newest-created first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let mut out = Vec::new();
        if let Some(room_id) = filter.room_id {
            if let Some(rs) = self.get_room(&room_id) {
                let guard = rs.read().await;
                out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
            }
        } else {
            let room_arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
            for rs in room_arcs {
                let guard = rs.read().await;
                out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// The approval queue: every pending booking, ordered by date then start.
    pub async fn pending_bookings(&self) -> Vec<Booking> {
        let filter = BookingFilter {
            status: Some(BookingStatus::Pending),
            ..Default::default()
        };
        let mut pending = self.list_bookings(&filter).await;
        pending.sort_by_key(|b| (b.date, b.span.start));
        pending
    }
}
