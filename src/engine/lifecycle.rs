use chrono::{NaiveDate, NaiveTime};

use crate::limits::*;
use crate::model::*;
use crate::notify::{self, Notification};

use super::conflict::{check_no_conflict, now_ms, validate_time_range};
use super::policy::{Action, authorize};
use super::{Engine, EngineError};

/// Initial status is a function of the creating actor's role and nothing
/// else: admins bypass the pending queue entirely.
fn initial_status(actor: &User, now: Ms) -> (BookingStatus, Option<UserId>, Option<Ms>) {
    if actor.role == Role::Admin {
        (BookingStatus::Approved, Some(actor.id), Some(now))
    } else {
        (BookingStatus::Pending, None, None)
    }
}

impl Engine {
    /// Create a booking request. The conflict scan and the commit happen under
    /// the room's write lock, so two concurrent creations for the same room
    /// cannot both pass validation and both land.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_booking(
        &self,
        id: BookingId,
        room_id: RoomId,
        actor_id: UserId,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        purpose: Option<String>,
        faculty_email: Option<String>,
    ) -> Result<Booking, EngineError> {
        let actor = self.require_actor(actor_id)?;
        authorize(&actor, Action::CreateBooking)?;
        validate_time_range(start, end)?;
        let span = TimeSpan::new(start, end);

        if let Some(ref p) = purpose
            && p.len() > MAX_PURPOSE_LEN
        {
            return Err(EngineError::LimitExceeded("purpose too long"));
        }
        if let Some(ref email) = faculty_email {
            if email.len() > MAX_EMAIL_LEN {
                return Err(EngineError::LimitExceeded("faculty_email too long"));
            }
            // Courtesy lookup for admin overrides only; a non-admin's value is
            // stored as-is.
            if actor.role == Role::Admin {
                match self.find_user_by_email(email) {
                    Some(u) if u.role == Role::Faculty => {}
                    _ => return Err(EngineError::UnknownFacultyEmail(email.clone())),
                }
            }
        }
        if self.get_room_for_booking(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        check_no_conflict(&guard, date, &span, None)?;

        let now = now_ms();
        let (status, decided_by, decided_at) = initial_status(&actor, now);
        let event = Event::BookingCreated {
            id,
            room_id,
            requester: actor.id,
            date,
            span,
            purpose,
            faculty_email,
            status,
            rejection_reason: None,
            decided_by,
            decided_at,
            created_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let booking = guard
            .get_booking(id)
            .cloned()
            .expect("booking just applied");
        if booking.status == BookingStatus::Approved {
            self.notify_requester(&guard.number, &booking, |b, room, requester| {
                notify::booking_confirmed(b, room, requester)
            });
        }
        Ok(booking)
    }

    /// `pending` → `approved`. Admin or faculty only; the role check runs
    /// before the state check so a wrong actor always sees `Forbidden`.
    pub async fn approve_booking(
        &self,
        id: BookingId,
        actor_id: UserId,
    ) -> Result<Booking, EngineError> {
        let actor = self.require_actor(actor_id)?;
        authorize(&actor, Action::ApproveBooking)?;

        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let (status, date, span) = {
            let b = guard.get_booking(id).ok_or(EngineError::NotFound(id))?;
            (b.status, b.date, b.span)
        };
        if status != BookingStatus::Pending {
            return Err(EngineError::InvalidStateTransition {
                action: "approve",
                status,
            });
        }
        // An overlapping booking may have been approved since this one was
        // requested; the no-overlap invariant is enforced here too.
        check_no_conflict(&guard, date, &span, Some(id))?;

        let event = Event::BookingApproved {
            id,
            room_id,
            by: actor.id,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let booking = guard.get_booking(id).cloned().expect("booking present");
        let approver = actor.username.clone();
        self.notify_requester(&guard.number, &booking, move |b, room, requester| {
            notify::booking_approved(b, room, requester, &approver)
        });
        Ok(booking)
    }

    /// `pending` → `rejected`. Same gates as approve; records the reason and
    /// who decided.
    pub async fn reject_booking(
        &self,
        id: BookingId,
        actor_id: UserId,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let actor = self.require_actor(actor_id)?;
        authorize(&actor, Action::RejectBooking)?;
        if let Some(ref r) = reason
            && r.len() > MAX_REJECTION_REASON_LEN
        {
            return Err(EngineError::LimitExceeded("rejection reason too long"));
        }

        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let status = guard
            .get_booking(id)
            .ok_or(EngineError::NotFound(id))?
            .status;
        if status != BookingStatus::Pending {
            return Err(EngineError::InvalidStateTransition {
                action: "reject",
                status,
            });
        }

        let event = Event::BookingRejected {
            id,
            room_id,
            by: actor.id,
            at: now_ms(),
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let booking = guard.get_booking(id).cloned().expect("booking present");
        self.notify_requester(&guard.number, &booking, |b, room, requester| {
            notify::booking_rejected(b, room, requester)
        });
        Ok(booking)
    }

    /// Any status except `cancelled` → `cancelled`. Allowed to the requester
    /// themself or an admin; ownership is checked before the state check.
    pub async fn cancel_booking(
        &self,
        id: BookingId,
        actor_id: UserId,
    ) -> Result<Booking, EngineError> {
        let actor = self.require_actor(actor_id)?;

        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let (requester, status) = {
            let b = guard.get_booking(id).ok_or(EngineError::NotFound(id))?;
            (b.requester, b.status)
        };
        authorize(&actor, Action::CancelBooking { requester })?;
        if status == BookingStatus::Cancelled {
            return Err(EngineError::InvalidStateTransition {
                action: "cancel",
                status,
            });
        }

        let event = Event::BookingCancelled {
            id,
            room_id,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let booking = guard.get_booking(id).cloned().expect("booking present");
        self.notify_requester(&guard.number, &booking, |b, room, requester| {
            notify::booking_cancelled(b, room, requester)
        });
        Ok(booking)
    }

    /// Administrative hard delete, any status. The cancellation notification
    /// is queued from pre-delete field values before the record is removed.
    pub async fn destroy_booking(&self, id: BookingId, actor_id: UserId) -> Result<(), EngineError> {
        let actor = self.require_actor(actor_id)?;
        authorize(&actor, Action::DestroyBooking)?;

        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard
            .get_booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        self.notify_requester(&guard.number, &booking, |b, room, requester| {
            notify::booking_destroyed(b, room, requester)
        });

        let event = Event::BookingDestroyed { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Build and queue a notification for the booking's requester (or their
    /// faculty_email override). A vanished requester is logged and skipped;
    /// notification outcome never affects the transition.
    fn notify_requester<F>(&self, room_number: &str, booking: &Booking, build: F)
    where
        F: FnOnce(&Booking, &str, &User) -> Notification,
    {
        match self.get_user(&booking.requester) {
            Some(requester) => self
                .notifier
                .send(build(booking, room_number, &requester)),
            None => tracing::debug!(
                "requester {} no longer exists, skipping notification",
                booking.requester
            ),
        }
    }
}
