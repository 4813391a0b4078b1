use std::sync::Arc;

use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::*;

use super::policy::{Action, authorize};
use super::{Engine, EngineError};

/// User and room directories. The booking core only consumes these (role and
/// email lookups, room existence), but something has to populate them;
/// everything here is an admin-only surface.
impl Engine {
    pub async fn create_user(
        &self,
        actor_id: UserId,
        id: UserId,
        username: String,
        email: String,
        role: Role,
    ) -> Result<(), EngineError> {
        let actor = self.require_actor(actor_id)?;
        authorize(&actor, Action::ManageCatalog)?;

        if self.user_count() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(EngineError::LimitExceeded("bad username length"));
        }
        if email.is_empty() || email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("bad email length"));
        }
        if self.get_user(&id).is_some() || self.username_taken(&username) || self.email_taken(&email)
        {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::UserCreated {
            id,
            username: username.clone(),
            email: email.clone(),
            role,
        };
        self.wal_append(&event).await?;
        self.index_user(User {
            id,
            username,
            email,
            role,
        });
        Ok(())
    }

    pub async fn delete_user(&self, actor_id: UserId, id: UserId) -> Result<(), EngineError> {
        let actor = self.require_actor(actor_id)?;
        authorize(&actor, Action::ManageCatalog)?;
        if self.get_user(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::UserDeleted { id };
        self.wal_append(&event).await?;
        self.unindex_user(&id);
        Ok(())
    }

    pub async fn create_room(
        &self,
        actor_id: UserId,
        id: RoomId,
        number: String,
    ) -> Result<(), EngineError> {
        let actor = self.require_actor(actor_id)?;
        authorize(&actor, Action::ManageCatalog)?;

        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if number.is_empty() || number.len() > MAX_ROOM_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("bad room number length"));
        }
        if self.rooms.contains_key(&id) || self.room_number_taken(&number) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated {
            id,
            number: number.clone(),
        };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, number.clone());
        self.index_room_number(&number, id);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        Ok(())
    }

    /// Rooms that still hold bookings are refused; there is no cascade.
    pub async fn delete_room(&self, actor_id: UserId, id: RoomId) -> Result<(), EngineError> {
        let actor = self.require_actor(actor_id)?;
        authorize(&actor, Action::ManageCatalog)?;

        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        if !guard.bookings.is_empty() {
            return Err(EngineError::RoomInUse(id));
        }
        let number = guard.number.clone();
        drop(guard);

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.rooms.remove(&id);
        self.unindex_room_number(&number);
        Ok(())
    }
}
