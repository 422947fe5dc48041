//! Commands accepted by the orchestrator's inbound queue.

use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::game::{GameMode, SettingsUpdate};
use crate::{Envelope, EventType, RoomId, UserId};

/// A room-level action.
#[derive(Debug, Clone, PartialEq)]
pub enum GameCommand {
    ChangeMode(GameMode),
    UpdateSettings(SettingsUpdate),
    StartGame,
    PlayerMove(Value),
    CanvasAction(Value),
}

/// A command addressed to one room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomCommand {
    pub room_id: RoomId,
    /// Connection identity that issued the command. `None` for commands that
    /// arrive over the bus.
    pub actor: Option<UserId>,
    pub command: GameCommand,
}

impl RoomCommand {
    #[must_use]
    pub fn new(room_id: RoomId, actor: Option<UserId>, command: GameCommand) -> Self {
        Self {
            room_id,
            actor,
            command,
        }
    }

    /// Interpret an inbound envelope.
    ///
    /// A client-sent `game_started` is accepted as a start request, matching
    /// older clients.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for event types that are not commands, unknown
    /// modes and malformed settings.
    pub fn from_envelope(room_id: RoomId, actor: Option<UserId>, envelope: &Envelope) -> CoreResult<Self> {
        let command = match envelope.event {
            EventType::GameModeChange => {
                let raw = envelope
                    .content
                    .get("mode_id")
                    .or_else(|| envelope.content.get("game_mode_id"))
                    .ok_or_else(|| CoreError::invalid("mode_id is required"))?;
                let mode = GameMode::from_value(raw)
                    .ok_or_else(|| CoreError::invalid(format!("unknown game mode {raw}")))?;
                GameCommand::ChangeMode(mode)
            }
            EventType::GameSettingsUpdate => {
                GameCommand::UpdateSettings(SettingsUpdate::from_content(&envelope.content)?)
            }
            EventType::StartGame | EventType::GameStarted => GameCommand::StartGame,
            EventType::PlayerMove => GameCommand::PlayerMove(envelope.content.clone()),
            EventType::CanvasAction => GameCommand::CanvasAction(envelope.content.clone()),
            other => {
                return Err(CoreError::invalid(format!("{other} is not accepted from clients")));
            }
        };
        Ok(Self::new(room_id, actor, command))
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self.command {
            GameCommand::ChangeMode(_) => "change_mode",
            GameCommand::UpdateSettings(_) => "update_settings",
            GameCommand::StartGame => "start_game",
            GameCommand::PlayerMove(_) => "player_move",
            GameCommand::CanvasAction(_) => "canvas_action",
        }
    }
}
