//! The per-room game state container.
//!
//! A [`Game`] is plain data. It is shared as [`SharedGame`] and every field
//! mutation happens under that game's own lock; engines receive `&mut Game`
//! from the lock holder and never lock anything themselves.

pub mod data;
pub mod settings;

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{RoomId, UserId};
pub use data::{CanvasData, DrawingData, ModeData, RoundRecord, Stroke};
pub use settings::{GameMode, GameSettings, SettingsUpdate};

/// A game shared between the orchestrator and its spawned round tasks.
pub type SharedGame = Arc<Mutex<Game>>;

/// Game lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    InProgress,
    Over,
}

/// Where the current round stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Waiting out the preparation pause before the round.
    Preparing,
    /// Round running; moves are accepted and the timer is live.
    Active,
    /// Round finished, next round not yet prepared.
    Ended,
}

/// Why a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEndReason {
    TimeExpired,
    AllGuessed,
    DrawerLeft,
}

impl RoundEndReason {
    pub const ALL: [RoundEndReason; 3] = [
        RoundEndReason::TimeExpired,
        RoundEndReason::AllGuessed,
        RoundEndReason::DrawerLeft,
    ];

    /// Position in [`RoundEndReason::ALL`].
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            RoundEndReason::TimeExpired => 0,
            RoundEndReason::AllGuessed => 1,
            RoundEndReason::DrawerLeft => 2,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RoundEndReason::TimeExpired => "time_expired",
            RoundEndReason::AllGuessed => "all_guessed",
            RoundEndReason::DrawerLeft => "drawer_left",
        }
    }
}

/// A participant in a game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub id: UserId,
    pub username: String,
    pub score: u32,
    pub connected: bool,
    /// Bumped on every disconnect so a stale grace timer can tell it has
    /// been superseded.
    #[serde(skip)]
    pub disconnects: u64,
}

impl Player {
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            score: 0,
            connected: true,
            disconnects: 0,
        }
    }
}

/// Final standing of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreEntry {
    pub user_id: UserId,
    pub username: String,
    pub score: u32,
}

/// The active match for one room.
#[derive(Debug)]
pub struct Game {
    pub room_id: RoomId,
    pub mode: GameMode,
    pub mode_name: String,
    pub state: GameState,
    /// Ordered roster; turn rotation follows this order.
    pub players: Vec<Player>,
    /// Current round number, starting at 1.
    pub turn: u32,
    pub total_rounds: u32,
    pub round_duration: Duration,
    pub preparation_duration: Duration,
    pub min_players: usize,
    pub initial_player_count: usize,
    pub active_player: Option<UserId>,
    pub drawer_index: usize,
    pub last_move_at: Option<Instant>,
    pub phase: RoundPhase,
    pub data: ModeData,
}

impl Game {
    /// Build a game from room settings. Engines finish initialisation in
    /// `init_game`.
    #[must_use]
    pub fn new(room_id: RoomId, settings: &GameSettings) -> Self {
        let data = match settings.mode {
            GameMode::DrawingGuessing => ModeData::Drawing(DrawingData::default()),
            GameMode::CollaborativeCanvas => ModeData::Canvas(CanvasData::default()),
        };
        Self {
            room_id,
            mode: settings.mode,
            mode_name: settings.mode_name.clone(),
            state: GameState::InProgress,
            players: Vec::new(),
            turn: 0,
            total_rounds: settings.total_rounds,
            round_duration: settings.round_duration(),
            preparation_duration: settings.preparation_duration(),
            min_players: settings.min_players,
            initial_player_count: 0,
            active_player: None,
            drawer_index: 0,
            last_move_at: None,
            phase: RoundPhase::Preparing,
            data,
        }
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.state == GameState::InProgress
    }

    #[must_use]
    pub fn is_member(&self, user: UserId) -> bool {
        self.players.iter().any(|p| p.id == user)
    }

    #[must_use]
    pub fn player(&self, user: UserId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == user)
    }

    pub fn player_mut(&mut self, user: UserId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == user)
    }

    /// Display name for a roster member, or the generated fallback.
    #[must_use]
    pub fn username(&self, user: UserId) -> String {
        self.player(user)
            .map(|p| p.username.clone())
            .unwrap_or_else(|| user.default_display_name())
    }

    /// Move the active-player slot to the next roster entry.
    pub fn advance_rotation(&mut self) {
        if self.players.is_empty() {
            self.active_player = None;
            self.drawer_index = 0;
            return;
        }
        self.drawer_index = (self.drawer_index + 1) % self.players.len();
        self.active_player = Some(self.players[self.drawer_index].id);
    }

    /// Fill an empty active slot, e.g. after the drawer left between rounds.
    pub fn ensure_active_player(&mut self) {
        if self.active_player.is_none() {
            self.advance_rotation();
        }
    }

    /// Remove a player from the roster.
    ///
    /// Returns the removed player and whether they held the active slot.
    /// When the active player leaves, the slot is emptied and the rotation
    /// index is moved back one, so the next advance lands on whoever
    /// followed them. While the slot is empty the index points just before
    /// that follower, so removing the player at the index steps it back too.
    pub fn remove_player(&mut self, user: UserId) -> Option<(Player, bool)> {
        let index = self.players.iter().position(|p| p.id == user)?;
        let player = self.players.remove(index);
        let was_active = self.active_player == Some(user);
        let remaining = self.players.len();
        let holds_vacant_slot = self.active_player.is_none() && index == self.drawer_index;

        if remaining == 0 {
            self.drawer_index = 0;
        } else if was_active || holds_vacant_slot {
            self.drawer_index = if index == 0 { remaining - 1 } else { index - 1 };
        } else if index < self.drawer_index {
            self.drawer_index -= 1;
        }
        if was_active {
            self.active_player = None;
        }

        Some((player, was_active))
    }

    /// Current standings in roster order.
    #[must_use]
    pub fn scores(&self) -> Vec<ScoreEntry> {
        self.players
            .iter()
            .map(|p| ScoreEntry {
                user_id: p.id,
                username: p.username.clone(),
                score: p.score,
            })
            .collect()
    }

    /// Everyone tied at the highest score.
    #[must_use]
    pub fn top_scorers(&self) -> Vec<ScoreEntry> {
        let Some(best) = self.players.iter().map(|p| p.score).max() else {
            return Vec::new();
        };
        self.scores().into_iter().filter(|s| s.score == best).collect()
    }

    /// Client-facing view of the game. Never includes the secret word or
    /// round history.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        json!({
            "room_id": self.room_id,
            "mode_id": self.mode,
            "mode_name": self.mode_name,
            "state": self.state,
            "phase": self.phase,
            "players": self.players,
            "current_round": self.turn,
            "total_rounds": self.total_rounds,
            "round_duration": self.round_duration.as_secs(),
            "preparation_duration": self.preparation_duration.as_secs(),
            "active_player": self.active_player,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_with(n: usize) -> (Game, Vec<UserId>) {
        let settings = GameSettings::defaults_for(GameMode::DrawingGuessing);
        let mut game = Game::new(RoomId::new(), &settings);
        let ids: Vec<UserId> = (0..n).map(|_| UserId::new()).collect();
        game.players = ids.iter().map(|id| Player::new(*id, "p")).collect();
        game.active_player = Some(ids[0]);
        (game, ids)
    }

    #[test]
    fn test_rotation_wraps() {
        let (mut game, ids) = game_with(3);
        game.advance_rotation();
        assert_eq!(game.active_player, Some(ids[1]));
        game.advance_rotation();
        game.advance_rotation();
        assert_eq!(game.active_player, Some(ids[0]));
    }

    #[test]
    fn test_removing_active_player_hands_turn_to_follower() {
        let (mut game, ids) = game_with(4);
        game.advance_rotation(); // ids[1] active
        let (removed, was_active) = game.remove_player(ids[1]).unwrap();
        assert_eq!(removed.id, ids[1]);
        assert!(was_active);
        assert_eq!(game.active_player, None);

        game.advance_rotation();
        assert_eq!(game.active_player, Some(ids[2]));
    }

    #[test]
    fn test_removing_player_before_vacant_slot_keeps_follower_next() {
        let (mut game, ids) = game_with(4);
        game.advance_rotation(); // ids[1] active
        game.remove_player(ids[1]).unwrap();
        game.remove_player(ids[0]).unwrap();

        game.advance_rotation();
        assert_eq!(game.active_player, Some(ids[2]));
        game.advance_rotation();
        assert_eq!(game.active_player, Some(ids[3]));
    }

    #[test]
    fn test_removing_wrapped_vacant_slot_player() {
        let (mut game, ids) = game_with(3);
        // ids[0] draws and leaves; the index wraps to ids[2].
        game.remove_player(ids[0]).unwrap();
        game.remove_player(ids[2]).unwrap();

        game.advance_rotation();
        assert_eq!(game.active_player, Some(ids[1]));
    }

    #[test]
    fn test_removing_last_slot_active_player_wraps_to_first() {
        let (mut game, ids) = game_with(3);
        game.drawer_index = 2;
        game.active_player = Some(ids[2]);
        game.remove_player(ids[2]).unwrap();
        game.advance_rotation();
        assert_eq!(game.active_player, Some(ids[0]));
    }

    #[test]
    fn test_removing_earlier_player_keeps_rotation_order() {
        let (mut game, ids) = game_with(4);
        game.drawer_index = 2;
        game.active_player = Some(ids[2]);
        let (_, was_active) = game.remove_player(ids[0]).unwrap();
        assert!(!was_active);
        assert_eq!(game.active_player, Some(ids[2]));
        game.advance_rotation();
        assert_eq!(game.active_player, Some(ids[3]));
    }

    #[test]
    fn test_remove_unknown_player() {
        let (mut game, _) = game_with(2);
        assert!(game.remove_player(UserId::new()).is_none());
    }

    #[test]
    fn test_top_scorers_includes_ties() {
        let (mut game, ids) = game_with(3);
        game.players[0].score = 15;
        game.players[2].score = 15;
        let winners: Vec<UserId> = game.top_scorers().into_iter().map(|s| s.user_id).collect();
        assert_eq!(winners, vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_snapshot_hides_word() {
        let (mut game, _) = game_with(2);
        game.data.drawing_mut().unwrap().current_word = "Gitar".into();
        let snap = game.snapshot();
        assert!(!snap.to_string().contains("Gitar"));
        assert_eq!(snap["state"], "in_progress");
        assert_eq!(snap["mode_id"], "1");
    }
}
