use serde::Serialize;
use thiserror::Error;

use crate::combat::CombatId;
use crate::item::ItemId;

/// Broad class of a failed command, reported to the client alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, rejected before touching state
    Validation,
    /// State did not allow the command; nothing changed
    Precondition,
    /// Combat bookkeeping disagreed with the command
    Conflict,
    /// Storage could not be reached for a command that needs it synchronously
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    // Validation
    #[error("You must move a direction: 'n', 's', 'e', 'w' (got '{0}')")]
    InvalidDirection(String),

    #[error("{0}")]
    Validation(String),

    // Preconditions
    #[error("Item {0} is not in this room")]
    ItemNotPresent(ItemId),

    #[error("You are not holding item {0}")]
    ItemNotHeld(ItemId),

    #[error("Too heavy: carrying {current} + {added} would exceed {max}")]
    Overweight { current: i32, added: i32, max: i32 },

    #[error("This room is not a store")]
    NotAStore,

    #[error("The store does not carry item {0}")]
    NotInStock(ItemId),

    #[error("Offered value {offered} is less than the item's score {required}")]
    InsufficientValue { offered: i32, required: i32 },

    #[error("You cannot move in that direction")]
    NoRoomInDirection,

    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("Username already exists")]
    UsernameTaken,

    #[error("Player {0} is already in the world")]
    AlreadyConnected(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Players must be in the same room to fight")]
    NotInSameRoom,

    #[error("Item {0} is not part of this combat")]
    NotInCombatPool(ItemId),

    #[error("Stake weighs {weight}, the limit is {cap}")]
    StakeTooHeavy { weight: i32, cap: i32 },

    #[error("User not authorized")]
    NotAdmin,

    // Conflicts
    #[error("{0} is already in combat")]
    AlreadyInCombat(String),

    #[error("You are busy in combat")]
    BusyInCombat,

    #[error("Combat {0} not found")]
    CombatNotFound(CombatId),

    #[error("You are not part of combat {0}")]
    NotACombatant(CombatId),

    // Storage needed synchronously (registration / login only)
    #[error("Storage unavailable: {0}")]
    Storage(String),
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::InvalidDirection(_) | GameError::Validation(_) => ErrorKind::Validation,
            GameError::AlreadyInCombat(_)
            | GameError::BusyInCombat
            | GameError::CombatNotFound(_)
            | GameError::NotACombatant(_) => ErrorKind::Conflict,
            GameError::Storage(_) => ErrorKind::Unavailable,
            _ => ErrorKind::Precondition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(GameError::InvalidDirection("up".into()).kind(), ErrorKind::Validation);
        assert_eq!(GameError::ItemNotPresent(4).kind(), ErrorKind::Precondition);
        assert_eq!(
            GameError::Overweight { current: 60, added: 50, max: 100 }.kind(),
            ErrorKind::Precondition
        );
        assert_eq!(GameError::CombatNotFound(9).kind(), ErrorKind::Conflict);
        assert_eq!(GameError::Storage("closed".into()).kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_error_messages_are_client_facing() {
        let err = GameError::InsufficientValue { offered: 300, required: 500 };
        assert_eq!(err.to_string(), "Offered value 300 is less than the item's score 500");
    }
}
