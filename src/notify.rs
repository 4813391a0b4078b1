use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::limits::NOTIFY_QUEUE_CAPACITY;
use crate::model::{Booking, User};

/// Payload handed to the external notifier capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

/// Delivery seam. Actual delivery (SMTP, webhook, …) lives outside this
/// system; the engine only knows the trigger points and the payload.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), String>;
}

/// Default transport: emit the payload as a structured log line.
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn deliver(&self, notification: &Notification) -> Result<(), String> {
        let payload = serde_json::to_string(notification).map_err(|e| e.to_string())?;
        info!(target: "roomd::notify", %payload, "notification");
        Ok(())
    }
}

/// Bounded queue in front of the transport. State transitions enqueue and move
/// on; a full queue or a failing transport is logged and counted, never
/// surfaced to the triggering request.
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        let (tx, rx) = mpsc::channel(NOTIFY_QUEUE_CAPACITY);
        tokio::spawn(notifier_loop(rx, transport));
        Self { tx }
    }

    /// Fire-and-forget enqueue. Never blocks, never fails the caller.
    pub fn send(&self, notification: Notification) {
        metrics::counter!(crate::observability::NOTIFICATIONS_QUEUED_TOTAL).increment(1);
        if self.tx.try_send(notification).is_err() {
            metrics::counter!(crate::observability::NOTIFICATIONS_DROPPED_TOTAL).increment(1);
            warn!("notification queue full, dropping message");
        }
    }
}

async fn notifier_loop(
    mut rx: mpsc::Receiver<Notification>,
    transport: Arc<dyn NotificationTransport>,
) {
    while let Some(notification) = rx.recv().await {
        if let Err(e) = transport.deliver(&notification).await {
            metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
            warn!("notification delivery failed: {e}");
        }
    }
}

// ── Message builders ─────────────────────────────────────────────

/// faculty_email overrides the requester's address when present.
pub fn recipient(booking: &Booking, requester: &User) -> String {
    booking
        .faculty_email
        .clone()
        .unwrap_or_else(|| requester.email.clone())
}

pub fn booking_confirmed(booking: &Booking, room_number: &str, requester: &User) -> Notification {
    Notification {
        subject: format!("Booking Confirmed: {room_number}"),
        body: format!(
            "Dear {},\n\nYour booking has been CONFIRMED.\n\nRoom: {room_number}\nDate: {}\nTime: {} - {}\nPurpose: {}\n",
            requester.username,
            booking.date,
            booking.span.start,
            booking.span.end,
            booking.purpose.as_deref().unwrap_or("-"),
        ),
        recipients: vec![recipient(booking, requester)],
    }
}

pub fn booking_approved(
    booking: &Booking,
    room_number: &str,
    requester: &User,
    approver: &str,
) -> Notification {
    Notification {
        subject: format!("Booking Approved: {room_number}"),
        body: format!(
            "Dear {},\n\nYour booking has been APPROVED.\n\nRoom: {room_number}\nDate: {}\nTime: {} - {}\nApproved by: {approver}\n",
            requester.username,
            booking.date,
            booking.span.start,
            booking.span.end,
        ),
        recipients: vec![recipient(booking, requester)],
    }
}

pub fn booking_rejected(booking: &Booking, room_number: &str, requester: &User) -> Notification {
    Notification {
        subject: format!("Booking Rejected: {room_number}"),
        body: format!(
            "Dear {},\n\nYour booking has been REJECTED.\n\nRoom: {room_number}\nDate: {}\nTime: {} - {}\nReason: {}\n",
            requester.username,
            booking.date,
            booking.span.start,
            booking.span.end,
            booking
                .rejection_reason
                .as_deref()
                .unwrap_or("No reason provided"),
        ),
        recipients: vec![recipient(booking, requester)],
    }
}

pub fn booking_cancelled(booking: &Booking, room_number: &str, requester: &User) -> Notification {
    Notification {
        subject: format!("Booking Cancelled: {room_number}"),
        body: format!(
            "Dear {},\n\nYour booking has been CANCELLED.\n\nRoom: {room_number}\nDate: {}\nTime: {} - {}\n",
            requester.username,
            booking.date,
            booking.span.start,
            booking.span.end,
        ),
        recipients: vec![recipient(booking, requester)],
    }
}

/// Administrative hard delete. Built from pre-delete field values; queued
/// before the record is removed.
pub fn booking_destroyed(booking: &Booking, room_number: &str, requester: &User) -> Notification {
    Notification {
        subject: format!("Booking Cancelled: {room_number}"),
        body: format!(
            "Dear {},\n\nYour booking for room {room_number} on {} from {} to {} has been CANCELLED by the administrator.\n",
            requester.username,
            booking.date,
            booking.span.start,
            booking.span.end,
        ),
        recipients: vec![recipient(booking, requester)],
    }
}

/// Transport that hands every delivered notification to a test channel.
#[cfg(test)]
pub struct CaptureTransport {
    tx: mpsc::UnboundedSender<Notification>,
}

#[cfg(test)]
impl CaptureTransport {
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationTransport for CaptureTransport {
    async fn deliver(&self, notification: &Notification) -> Result<(), String> {
        self.tx
            .send(notification.clone())
            .map_err(|e| e.to_string())
    }
}
