//! Durable room records, as held by the repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::game::GameMode;
use crate::{RoomId, UserId};

/// Smallest allowed room capacity.
pub const MIN_ROOM_CAPACITY: usize = 2;
/// Largest allowed room capacity.
pub const MAX_ROOM_CAPACITY: usize = 12;

/// Lobby status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

/// A room as stored by the repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Room {
    pub id: RoomId,
    pub room_name: String,
    pub creator_id: UserId,
    pub max_players: usize,
    pub current_players: usize,
    pub status: RoomStatus,
    pub game_mode_id: GameMode,
    pub is_private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Room {
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }
}

/// Request to create a room.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewRoom {
    pub room_name: String,
    pub max_players: usize,
    pub game_mode_id: GameMode,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub room_code: Option<String>,
}

impl NewRoom {
    /// # Errors
    ///
    /// Returns `InvalidInput` on an empty name, an out-of-range capacity, or
    /// a private room without a join code.
    pub fn validate(&self) -> CoreResult<()> {
        if self.room_name.trim().is_empty() {
            return Err(CoreError::invalid("room name cannot be empty"));
        }
        if !(MIN_ROOM_CAPACITY..=MAX_ROOM_CAPACITY).contains(&self.max_players) {
            return Err(CoreError::invalid(format!(
                "max_players must be between {MIN_ROOM_CAPACITY} and {MAX_ROOM_CAPACITY}"
            )));
        }
        let has_code = self
            .room_code
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        if self.is_private && !has_code {
            return Err(CoreError::invalid("private rooms require a room code"));
        }
        Ok(())
    }
}

/// A room as listed to one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomListing {
    #[serde(flatten)]
    pub room: Room,
    pub is_user_in_room: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_room(max_players: usize, is_private: bool, code: Option<&str>) -> NewRoom {
        NewRoom {
            room_name: "lobby".into(),
            max_players,
            game_mode_id: GameMode::DrawingGuessing,
            is_private,
            room_code: code.map(String::from),
        }
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(new_room(2, false, None).validate().is_ok());
        assert!(new_room(12, false, None).validate().is_ok());
        assert!(new_room(1, false, None).validate().is_err());
        assert!(new_room(13, false, None).validate().is_err());
    }

    #[test]
    fn test_private_room_requires_code() {
        assert!(new_room(4, true, None).validate().is_err());
        assert!(new_room(4, true, Some("  ")).validate().is_err());
        assert!(new_room(4, true, Some("k3y")).validate().is_ok());
    }

    #[test]
    fn test_new_room_deserializes_numeric_mode() {
        let req: NewRoom =
            serde_json::from_str(r#"{"room_name":"a","max_players":4,"game_mode_id":2}"#).unwrap();
        assert_eq!(req.game_mode_id, GameMode::CollaborativeCanvas);
        assert!(!req.is_private);
    }
}
