mod catalog;
mod conflict;
mod error;
mod lifecycle;
mod policy;
mod queries;

pub use error::EngineError;
pub use policy::{Action, authorize};
pub use queries::BookingFilter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::model::*;
use crate::notify::Notifier;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Admin account seeded into a freshly created (empty) tenant so the
/// directory is never unreachable.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub rooms: DashMap<RoomId, SharedRoomState>,
    users: DashMap<UserId, User>,
    users_by_name: DashMap<String, UserId>,
    users_by_email: DashMap<String, UserId>,
    rooms_by_number: DashMap<String, RoomId>,
    /// Reverse lookup: booking id → room id
    pub(super) booking_to_room: DashMap<BookingId, RoomId>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notifier: Arc<Notifier>,
}

/// Apply a booking event directly to a RoomState (no locking — caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, booking_index: &DashMap<BookingId, RoomId>) {
    match event {
        Event::BookingCreated {
            id,
            room_id,
            requester,
            date,
            span,
            purpose,
            faculty_email,
            status,
            rejection_reason,
            decided_by,
            decided_at,
            created_at,
        } => {
            rs.insert_booking(Booking {
                id: *id,
                room_id: *room_id,
                requester: *requester,
                date: *date,
                span: *span,
                purpose: purpose.clone(),
                faculty_email: faculty_email.clone(),
                status: *status,
                rejection_reason: rejection_reason.clone(),
                decided_by: *decided_by,
                decided_at: *decided_at,
                created_at: *created_at,
                updated_at: decided_at.unwrap_or(*created_at),
            });
            booking_index.insert(*id, *room_id);
        }
        Event::BookingApproved { id, by, at, .. } => {
            if let Some(b) = rs.get_booking_mut(*id) {
                b.status = BookingStatus::Approved;
                b.decided_by = Some(*by);
                b.decided_at = Some(*at);
                b.updated_at = *at;
            }
        }
        Event::BookingRejected { id, by, at, reason, .. } => {
            if let Some(b) = rs.get_booking_mut(*id) {
                b.status = BookingStatus::Rejected;
                b.rejection_reason = reason.clone();
                b.decided_by = Some(*by);
                b.decided_at = Some(*at);
                b.updated_at = *at;
            }
        }
        Event::BookingCancelled { id, at, .. } => {
            if let Some(b) = rs.get_booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
                b.updated_at = *at;
            }
        }
        Event::BookingDestroyed { id, .. } => {
            rs.remove_booking(*id);
            booking_index.remove(id);
        }
        // User/room events are handled at the map level, not here
        Event::UserCreated { .. }
        | Event::UserDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        admin_seed: Option<AdminSeed>,
        notifier: Arc<Notifier>,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let mut wal = Wal::open(&wal_path)?;

        let (wal_tx, wal_rx) = mpsc::channel(4096);

        let engine = Self {
            rooms: DashMap::new(),
            users: DashMap::new(),
            users_by_name: DashMap::new(),
            users_by_email: DashMap::new(),
            rooms_by_number: DashMap::new(),
            booking_to_room: DashMap::new(),
            wal_tx,
            notifier,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::UserCreated { id, username, email, role } => {
                    engine.index_user(User {
                        id: *id,
                        username: username.clone(),
                        email: email.clone(),
                        role: *role,
                    });
                }
                Event::UserDeleted { id } => {
                    engine.unindex_user(id);
                }
                Event::RoomCreated { id, number } => {
                    let rs = RoomState::new(*id, number.clone());
                    engine.rooms_by_number.insert(number.clone(), *id);
                    engine.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::RoomDeleted { id } => {
                    if let Some((_, rs)) = engine.rooms.remove(id) {
                        let guard = rs.try_read().expect("replay: uncontended read");
                        engine.rooms_by_number.remove(&guard.number);
                    }
                }
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(entry) = engine.rooms.get(&room_id)
                    {
                        let rs_arc = entry.clone();
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &engine.booking_to_room);
                    }
                }
            }
        }

        // An empty directory is unreachable (every mutation needs a known
        // actor), so seed the configured admin before serving.
        if engine.users.is_empty()
            && let Some(seed) = admin_seed
        {
            let admin = User {
                id: ulid::Ulid::new(),
                username: seed.username,
                email: seed.email,
                role: Role::Admin,
            };
            let event = Event::UserCreated {
                id: admin.id,
                username: admin.username.clone(),
                email: admin.email.clone(),
                role: admin.role,
            };
            wal.append_buffered(&event)?;
            wal.flush_sync()?;
            engine.index_user(admin);
        }

        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply in one call. The caller holds the room's write lock,
    /// so validate-then-commit is atomic per room.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.booking_to_room);
        Ok(())
    }

    pub fn get_room(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_booking(&self, booking_id: &BookingId) -> Option<RoomId> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Lookup booking → room, get room, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &BookingId,
    ) -> Result<(RoomId, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .get_room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }

    // ── User directory ───────────────────────────────────────

    pub(super) fn index_user(&self, user: User) {
        self.users_by_name.insert(user.username.clone(), user.id);
        self.users_by_email.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user);
    }

    pub(super) fn unindex_user(&self, id: &UserId) {
        if let Some((_, user)) = self.users.remove(id) {
            self.users_by_name.remove(&user.username);
            self.users_by_email.remove(&user.email);
        }
    }

    pub fn get_user(&self, id: &UserId) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn find_user_by_username(&self, username: &str) -> Option<User> {
        let id = *self.users_by_name.get(username)?.value();
        self.get_user(&id)
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.users_by_email.get(email)?.value();
        self.get_user(&id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub(super) fn username_taken(&self, username: &str) -> bool {
        self.users_by_name.contains_key(username)
    }

    pub(super) fn email_taken(&self, email: &str) -> bool {
        self.users_by_email.contains_key(email)
    }

    pub(super) fn room_number_taken(&self, number: &str) -> bool {
        self.rooms_by_number.contains_key(number)
    }

    pub(super) fn unindex_room_number(&self, number: &str) {
        self.rooms_by_number.remove(number);
    }

    pub(super) fn index_room_number(&self, number: &str, id: RoomId) {
        self.rooms_by_number.insert(number.to_string(), id);
    }

    /// Resolve the acting user or fail. Every mutating operation starts here.
    pub(super) fn require_actor(&self, actor_id: UserId) -> Result<User, EngineError> {
        self.get_user(&actor_id).ok_or(EngineError::NotFound(actor_id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state: the directory, the rooms, and one snapshot event per
    /// live booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.users.iter() {
            let user = entry.value();
            events.push(Event::UserCreated {
                id: user.id,
                username: user.username.clone(),
                email: user.email.clone(),
                role: user.role,
            });
        }

        for entry in self.rooms.iter() {
            let rs = entry.value().clone();
            let guard = rs.try_read().expect("compact: uncontended read");
            events.push(Event::RoomCreated {
                id: guard.id,
                number: guard.number.clone(),
            });
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    room_id: b.room_id,
                    requester: b.requester,
                    date: b.date,
                    span: b.span,
                    purpose: b.purpose.clone(),
                    faculty_email: b.faculty_email.clone(),
                    status: b.status,
                    rejection_reason: b.rejection_reason.clone(),
                    decided_by: b.decided_by,
                    decided_at: b.decided_at,
                    created_at: b.created_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the room_id from a booking event (None for directory/room events).
fn event_room_id(event: &Event) -> Option<RoomId> {
    match event {
        Event::BookingCreated { room_id, .. }
        | Event::BookingApproved { room_id, .. }
        | Event::BookingRejected { room_id, .. }
        | Event::BookingCancelled { room_id, .. }
        | Event::BookingDestroyed { room_id, .. } => Some(*room_id),
        Event::UserCreated { .. }
        | Event::UserDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. } => None,
    }
}
