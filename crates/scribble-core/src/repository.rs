//! Room persistence collaborator.
//!
//! The core only needs membership checks and the transactional room
//! operations below. [`InMemoryRoomRepository`] keeps everything behind one
//! async lock, which makes every operation a transaction.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::game::GameMode;
use crate::room::{NewRoom, Room, RoomListing, RoomStatus};
use crate::{RoomId, UserId};

/// Durable room storage.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Whether `user` has joined `room`.
    async fn is_room_member(&self, room: RoomId, user: UserId) -> CoreResult<bool>;

    /// Fetch one room.
    async fn get_room(&self, room: RoomId) -> CoreResult<Room>;

    /// Create a room owned by `creator`, who becomes its first member.
    async fn create_room(&self, creator: UserId, request: NewRoom) -> CoreResult<Room>;

    /// Add `user` to a waiting room, checking capacity and the join code.
    async fn join_room(&self, room: RoomId, user: UserId, code: Option<&str>) -> CoreResult<Room>;

    /// Remove `user` from a room.
    ///
    /// Returns the updated room, or `None` when the last member left and
    /// the room was deleted.
    async fn leave_room(&self, room: RoomId, user: UserId) -> CoreResult<Option<Room>>;

    /// Change the room's game mode. Only the creator may do this.
    async fn update_game_mode(&self, room: RoomId, user: UserId, mode: GameMode) -> CoreResult<Room>;

    /// Waiting public rooms plus private rooms `user` belongs to.
    async fn visible_rooms(&self, user: UserId) -> CoreResult<Vec<RoomListing>>;
}

#[derive(Debug)]
struct RoomRecord {
    room: Room,
    /// Members in join order.
    members: Vec<UserId>,
}

/// In-process repository.
#[derive(Debug, Default)]
pub struct InMemoryRoomRepository {
    rooms: RwLock<HashMap<RoomId, RoomRecord>>,
}

impl InMemoryRoomRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    async fn is_room_member(&self, room: RoomId, user: UserId) -> CoreResult<bool> {
        let rooms = self.rooms.read().await;
        Ok(rooms
            .get(&room)
            .is_some_and(|record| record.members.contains(&user)))
    }

    async fn get_room(&self, room: RoomId) -> CoreResult<Room> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&room)
            .map(|record| record.room.clone())
            .ok_or_else(|| CoreError::not_found(format!("room {room}")))
    }

    async fn create_room(&self, creator: UserId, request: NewRoom) -> CoreResult<Room> {
        request.validate()?;

        let room = Room {
            id: RoomId::new(),
            room_name: request.room_name.trim().to_string(),
            creator_id: creator,
            max_players: request.max_players,
            current_players: 1,
            status: RoomStatus::Waiting,
            game_mode_id: request.game_mode_id,
            is_private: request.is_private,
            room_code: request
                .room_code
                .filter(|_| request.is_private)
                .map(|c| c.trim().to_string()),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        let mut rooms = self.rooms.write().await;
        rooms.insert(
            room.id,
            RoomRecord {
                room: room.clone(),
                members: vec![creator],
            },
        );
        debug!(room = %room.id, creator = %creator, "Room created");
        Ok(room)
    }

    async fn join_room(&self, room: RoomId, user: UserId, code: Option<&str>) -> CoreResult<Room> {
        let mut rooms = self.rooms.write().await;
        let record = rooms
            .get_mut(&room)
            .ok_or_else(|| CoreError::not_found(format!("room {room}")))?;

        if record.room.status != RoomStatus::Waiting {
            return Err(CoreError::conflict("room is not accepting players"));
        }
        if record.members.contains(&user) {
            return Err(CoreError::conflict("already joined this room"));
        }
        if record.room.is_full() {
            return Err(CoreError::conflict("room is full"));
        }
        if record.room.is_private {
            let expected = record
                .room
                .room_code
                .as_deref()
                .ok_or_else(|| CoreError::internal("private room without a code"))?;
            if code.map(str::trim) != Some(expected) {
                return Err(CoreError::forbidden("wrong room code"));
            }
        }

        record.members.push(user);
        record.room.current_players += 1;
        debug!(room = %room, user = %user, occupancy = record.room.current_players, "Joined room");
        Ok(record.room.clone())
    }

    async fn leave_room(&self, room: RoomId, user: UserId) -> CoreResult<Option<Room>> {
        let mut rooms = self.rooms.write().await;
        let record = rooms
            .get_mut(&room)
            .ok_or_else(|| CoreError::not_found(format!("room {room}")))?;

        let index = record
            .members
            .iter()
            .position(|m| *m == user)
            .ok_or_else(|| CoreError::not_found("not a member of this room"))?;
        record.members.remove(index);

        let Some(next_owner) = record.members.first().copied() else {
            rooms.remove(&room);
            debug!(room = %room, "Last member left, room deleted");
            return Ok(None);
        };

        record.room.current_players = record.members.len();
        if record.room.creator_id == user {
            record.room.creator_id = next_owner;
            debug!(room = %room, owner = %next_owner, "Ownership transferred");
        }
        Ok(Some(record.room.clone()))
    }

    async fn update_game_mode(&self, room: RoomId, user: UserId, mode: GameMode) -> CoreResult<Room> {
        let mut rooms = self.rooms.write().await;
        let record = rooms
            .get_mut(&room)
            .ok_or_else(|| CoreError::not_found(format!("room {room}")))?;

        if record.room.creator_id != user {
            return Err(CoreError::forbidden("only the room owner can change the mode"));
        }
        record.room.game_mode_id = mode;
        Ok(record.room.clone())
    }

    async fn visible_rooms(&self, user: UserId) -> CoreResult<Vec<RoomListing>> {
        let rooms = self.rooms.read().await;
        let mut listings: Vec<RoomListing> = rooms
            .values()
            .filter_map(|record| {
                let is_member = record.members.contains(&user);
                let visible = if record.room.is_private {
                    is_member
                } else {
                    record.room.status == RoomStatus::Waiting
                };
                if !visible {
                    return None;
                }
                let mut room = record.room.clone();
                if !room.is_private {
                    room.room_code = None;
                }
                Some(RoomListing {
                    room,
                    is_user_in_room: is_member,
                })
            })
            .collect();
        listings.sort_by(|a, b| b.room.created_at.cmp(&a.room.created_at));
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_room(max_players: usize) -> NewRoom {
        NewRoom {
            room_name: "open lobby".into(),
            max_players,
            game_mode_id: GameMode::DrawingGuessing,
            is_private: false,
            room_code: None,
        }
    }

    fn private_room(code: &str) -> NewRoom {
        NewRoom {
            room_name: "secret".into(),
            max_players: 4,
            game_mode_id: GameMode::DrawingGuessing,
            is_private: true,
            room_code: Some(code.into()),
        }
    }

    #[tokio::test]
    async fn test_create_room_adds_creator() {
        let repo = InMemoryRoomRepository::new();
        let owner = UserId::new();

        let room = repo.create_room(owner, public_room(4)).await.unwrap();

        assert_eq!(room.current_players, 1);
        assert_eq!(room.status, RoomStatus::Waiting);
        assert!(repo.is_room_member(room.id, owner).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_room_rejects_bad_capacity() {
        let repo = InMemoryRoomRepository::new();
        let err = repo.create_room(UserId::new(), public_room(20)).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_join_full_room_conflicts() {
        let repo = InMemoryRoomRepository::new();
        let room = repo.create_room(UserId::new(), public_room(2)).await.unwrap();

        repo.join_room(room.id, UserId::new(), None).await.unwrap();
        let err = repo.join_room(room.id, UserId::new(), None).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_join_twice_conflicts() {
        let repo = InMemoryRoomRepository::new();
        let room = repo.create_room(UserId::new(), public_room(4)).await.unwrap();
        let user = UserId::new();

        repo.join_room(room.id, user, None).await.unwrap();
        let err = repo.join_room(room.id, user, None).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_private_room_checks_code() {
        let repo = InMemoryRoomRepository::new();
        let room = repo.create_room(UserId::new(), private_room("abc")).await.unwrap();

        let err = repo.join_room(room.id, UserId::new(), Some("nope")).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
        let err = repo.join_room(room.id, UserId::new(), None).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        let joined = repo.join_room(room.id, UserId::new(), Some("abc")).await.unwrap();
        assert_eq!(joined.current_players, 2);
    }

    #[tokio::test]
    async fn test_join_missing_room() {
        let repo = InMemoryRoomRepository::new();
        let err = repo.join_room(RoomId::new(), UserId::new(), None).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_owner_leaving_transfers_ownership() {
        let repo = InMemoryRoomRepository::new();
        let owner = UserId::new();
        let second = UserId::new();
        let room = repo.create_room(owner, public_room(4)).await.unwrap();
        repo.join_room(room.id, second, None).await.unwrap();

        let after = repo.leave_room(room.id, owner).await.unwrap().unwrap();

        assert_eq!(after.creator_id, second);
        assert_eq!(after.current_players, 1);
    }

    #[tokio::test]
    async fn test_last_member_leaving_deletes_room() {
        let repo = InMemoryRoomRepository::new();
        let owner = UserId::new();
        let room = repo.create_room(owner, public_room(4)).await.unwrap();

        assert!(repo.leave_room(room.id, owner).await.unwrap().is_none());
        assert!(matches!(
            repo.get_room(room.id).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_leave_as_non_member() {
        let repo = InMemoryRoomRepository::new();
        let room = repo.create_room(UserId::new(), public_room(4)).await.unwrap();
        let err = repo.leave_room(room.id, UserId::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_only_owner_updates_mode() {
        let repo = InMemoryRoomRepository::new();
        let owner = UserId::new();
        let room = repo.create_room(owner, public_room(4)).await.unwrap();

        let err = repo
            .update_game_mode(room.id, UserId::new(), GameMode::CollaborativeCanvas)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        let updated = repo
            .update_game_mode(room.id, owner, GameMode::CollaborativeCanvas)
            .await
            .unwrap();
        assert_eq!(updated.game_mode_id, GameMode::CollaborativeCanvas);
    }

    #[tokio::test]
    async fn test_visible_rooms() {
        let repo = InMemoryRoomRepository::new();
        let viewer = UserId::new();
        let public = repo.create_room(UserId::new(), public_room(4)).await.unwrap();
        let hidden = repo.create_room(UserId::new(), private_room("x")).await.unwrap();
        let mine = repo.create_room(UserId::new(), private_room("y")).await.unwrap();
        repo.join_room(mine.id, viewer, Some("y")).await.unwrap();

        let listings = repo.visible_rooms(viewer).await.unwrap();
        let ids: Vec<RoomId> = listings.iter().map(|l| l.room.id).collect();

        assert!(ids.contains(&public.id));
        assert!(ids.contains(&mine.id));
        assert!(!ids.contains(&hidden.id));

        let own = listings.iter().find(|l| l.room.id == mine.id).unwrap();
        assert!(own.is_user_in_room);
        let open = listings.iter().find(|l| l.room.id == public.id).unwrap();
        assert!(!open.is_user_in_room);
        assert!(open.room.room_code.is_none());
    }
}
