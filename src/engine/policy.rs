use crate::model::{Role, User, UserId};

use super::EngineError;

/// Everything an actor can ask the engine to do that needs a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateBooking,
    ApproveBooking,
    RejectBooking,
    /// Cancellation is gated on ownership, not just role.
    CancelBooking { requester: UserId },
    DestroyBooking,
    /// User and room directory changes.
    ManageCatalog,
}

/// Single authorization gate for every operation. Callers run this BEFORE any
/// state-validity check so a wrong actor always sees `Forbidden`, never
/// `InvalidStateTransition`.
pub fn authorize(actor: &User, action: Action) -> Result<(), EngineError> {
    match action {
        Action::CreateBooking => Ok(()),
        Action::ApproveBooking => match actor.role {
            Role::Admin | Role::Faculty => Ok(()),
            _ => Err(EngineError::Forbidden(
                "only admin and faculty can approve bookings",
            )),
        },
        Action::RejectBooking => match actor.role {
            Role::Admin | Role::Faculty => Ok(()),
            _ => Err(EngineError::Forbidden(
                "only admin and faculty can reject bookings",
            )),
        },
        Action::CancelBooking { requester } => {
            if actor.id == requester || actor.role == Role::Admin {
                Ok(())
            } else {
                Err(EngineError::Forbidden(
                    "you can only cancel your own bookings",
                ))
            }
        }
        Action::DestroyBooking => match actor.role {
            Role::Admin => Ok(()),
            _ => Err(EngineError::Forbidden("only admin can destroy bookings")),
        },
        Action::ManageCatalog => match actor.role {
            Role::Admin => Ok(()),
            _ => Err(EngineError::Forbidden(
                "only admin can manage users and rooms",
            )),
        },
    }
}
