//! Event types exchanged with clients and between server instances.
//!
//! Every message is an [`Envelope`]: a type tag plus an opaque JSON content
//! object. The content shape is owned by whichever component emits the event.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::ids::RoomId;

/// Logical event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Room control
    GameModeChange,
    GameModeChanged,
    GameSettingsUpdate,
    GameSettingsUpdated,

    // Game lifecycle
    StartGame,
    GameStarted,
    GameStartFailed,
    RoundPreparation,
    RoundStartDrawer,
    RoundStartGuesser,
    RoundEnded,
    GameOver,
    GameEnded,

    // Moves and their fan-out
    PlayerMove,
    CanvasAction,
    CanvasUpdate,
    GuessMessage,
    CorrectGuess,

    // Membership
    PlayerJoined,
    PlayerLeft,
    PlayerReconnected,
    GameStatus,
    RoomStatus,

    Error,
}

impl EventType {
    /// Wire name of the event.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventType::GameModeChange => "game_mode_change",
            EventType::GameModeChanged => "game_mode_changed",
            EventType::GameSettingsUpdate => "game_settings_update",
            EventType::GameSettingsUpdated => "game_settings_updated",
            EventType::StartGame => "start_game",
            EventType::GameStarted => "game_started",
            EventType::GameStartFailed => "game_start_failed",
            EventType::RoundPreparation => "round_preparation",
            EventType::RoundStartDrawer => "round_start_drawer",
            EventType::RoundStartGuesser => "round_start_guesser",
            EventType::RoundEnded => "round_ended",
            EventType::GameOver => "game_over",
            EventType::GameEnded => "game_ended",
            EventType::PlayerMove => "player_move",
            EventType::CanvasAction => "canvas_action",
            EventType::CanvasUpdate => "canvas_update",
            EventType::GuessMessage => "guess_message",
            EventType::CorrectGuess => "correct_guess",
            EventType::PlayerJoined => "player_joined",
            EventType::PlayerLeft => "player_left",
            EventType::PlayerReconnected => "player_reconnected",
            EventType::GameStatus => "game_status",
            EventType::RoomStatus => "room_status",
            EventType::Error => "error",
        }
    }

    /// Control events are consumed by the orchestrator instead of being
    /// relayed verbatim to clients.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            EventType::GameModeChange | EventType::GameSettingsUpdate
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason codes attached to rejections and error notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    GameAlreadyInProgress,
    InsufficientPlayers,
    NotRoomMember,
    GameInProgressNotMember,
    InvalidMessage,
    InvalidMove,
    NotYourTurn,
    GameNotFound,
    InvalidSettings,
    UnknownMode,
    Internal,
}

impl RejectReason {
    /// Wire name of the reason.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RejectReason::GameAlreadyInProgress => "game_already_in_progress",
            RejectReason::InsufficientPlayers => "insufficient_players",
            RejectReason::NotRoomMember => "not_room_member",
            RejectReason::GameInProgressNotMember => "game_in_progress_not_member",
            RejectReason::InvalidMessage => "invalid_message",
            RejectReason::InvalidMove => "invalid_move",
            RejectReason::NotYourTurn => "not_your_turn",
            RejectReason::GameNotFound => "game_not_found",
            RejectReason::InvalidSettings => "invalid_settings",
            RejectReason::UnknownMode => "unknown_mode",
            RejectReason::Internal => "internal",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed event with an opaque content payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type tag.
    #[serde(rename = "type")]
    pub event: EventType,
    /// Event-specific content.
    #[serde(default)]
    pub content: Value,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(event: EventType, content: Value) -> Self {
        Self { event, content }
    }

    /// Create an error notice for a single recipient.
    #[must_use]
    pub fn error(room_id: RoomId, reason: RejectReason, message: impl Into<String>) -> Self {
        Self::new(
            EventType::Error,
            serde_json::json!({
                "room_id": room_id,
                "reason": reason,
                "message": message.into(),
            }),
        )
    }

    /// Create a `game_start_failed` notice.
    #[must_use]
    pub fn start_failed(room_id: RoomId, reason: RejectReason, message: impl Into<String>) -> Self {
        Self::new(
            EventType::GameStartFailed,
            serde_json::json!({
                "room_id": room_id,
                "reason": reason,
                "message": message.into(),
            }),
        )
    }

    /// Read a string field from the content object.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// Read an unsigned integer field from the content object.
    ///
    /// Numeric strings are accepted too, since some producers stringify
    /// every value.
    #[must_use]
    pub fn u64_field(&self, key: &str) -> Option<u64> {
        match self.content.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
