//! Game-mode engines.
//!
//! An engine is the rule set for one [`GameMode`]. Engines are shared by
//! every room playing that mode and keep no per-room state of their own:
//! all state lives in the [`Game`] handed to them by the orchestrator, which
//! holds the game's lock for the duration of each call. Engine calls are
//! synchronous and only queue outgoing events.

pub mod canvas;
pub mod drawing;

use rand::seq::SliceRandom;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::game::{Game, GameMode, GameState, Player, RoundEndReason, RoundPhase, RoundRecord};
use crate::outbox::RoomOutbox;
use crate::{Envelope, EventType, UserId};

pub use canvas::CanvasEngine;
pub use drawing::DrawingEngine;

/// Words a round can be about.
pub const WORDS: [&str; 15] = [
    "Köpek",
    "Araba",
    "Bilgisayar",
    "Güneş",
    "Ayakkabı",
    "Uçak",
    "Kütüphane",
    "Kahve",
    "Telefon",
    "Gözlük",
    "Bisiklet",
    "Gitar",
    "Elma",
    "Yıldız",
    "Saat",
];

/// Used when the word list is empty.
pub const FALLBACK_WORD: &str = "Resim";

/// Pick a random word from `words`.
#[must_use]
pub fn pick_word(words: &[&str]) -> String {
    words
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_WORD)
        .to_string()
}

/// What the caller should do after a move was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Continue,
    /// The move finished the round early.
    RoundComplete(RoundEndReason),
}

/// A decoded player move.
#[derive(Debug, Clone, PartialEq)]
pub enum Move {
    /// Drawing action; the payload is relayed and recorded as-is.
    Draw(Value),
    Guess(String),
}

impl Move {
    /// Decode a move payload `{ "type": "draw" | "canvas_action" | "guess", ... }`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for non-object payloads, a missing or unknown
    /// `type`, and guesses without `text`.
    pub fn parse(data: &Value) -> CoreResult<Self> {
        let obj = data
            .as_object()
            .ok_or_else(|| CoreError::invalid("move must be an object"))?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::invalid("move is missing 'type'"))?;

        match kind {
            "draw" | "canvas_action" => Ok(Move::Draw(data.clone())),
            "guess" => obj
                .get("text")
                .and_then(Value::as_str)
                .map(|text| Move::Guess(text.to_string()))
                .ok_or_else(|| CoreError::invalid("guess is missing 'text'")),
            other => Err(CoreError::invalid(format!("unknown move type '{other}'"))),
        }
    }
}

/// Rule set for one game mode.
pub trait GameEngine: Send + Sync {
    fn mode(&self) -> GameMode;

    /// Outbox the engine notifies players through.
    fn outbox(&self) -> &RoomOutbox;

    /// Install the roster and reset the game to round 1.
    ///
    /// # Errors
    ///
    /// Fails if the game holds another mode's data.
    fn init_game(&self, game: &mut Game, players: Vec<Player>) -> CoreResult<()>;

    /// Pick the round's word, open its history entry and notify players.
    ///
    /// # Errors
    ///
    /// Fails if the game holds another mode's data.
    fn start_round(&self, game: &mut Game) -> CoreResult<()>;

    /// Validate and apply one move.
    ///
    /// # Errors
    ///
    /// Malformed payloads, moves outside an active round and moves the
    /// player is not allowed to make.
    fn process_move(&self, game: &mut Game, player: UserId, data: &Value) -> CoreResult<MoveOutcome>;

    /// Seal the round and advance the turn. Returns whether another round
    /// follows.
    ///
    /// # Errors
    ///
    /// Fails if the game holds another mode's data.
    fn end_round(&self, game: &mut Game, reason: RoundEndReason) -> CoreResult<bool>;

    /// Tell players the next round is coming.
    fn send_preparation_notifications(&self, game: &Game);

    /// End-of-game summary content.
    ///
    /// # Errors
    ///
    /// Fails if the game holds another mode's data.
    fn final_report(&self, game: &Game) -> CoreResult<Value>;

    /// Broadcast the end-of-game summary as `game_over`.
    ///
    /// # Errors
    ///
    /// Fails if the report cannot be built.
    fn send_final_report(&self, game: &Game) -> CoreResult<()> {
        let report = self.final_report(game)?;
        self.outbox()
            .broadcast(game.room_id, &Envelope::new(EventType::GameOver, report));
        Ok(())
    }
}

/// Roster reset shared by every mode: scores zeroed, round 1, first player active.
pub(crate) fn reset_roster(game: &mut Game, mut players: Vec<Player>) {
    for player in &mut players {
        player.score = 0;
        player.connected = true;
    }
    game.initial_player_count = players.len();
    game.active_player = players.first().map(|p| p.id);
    game.players = players;
    game.drawer_index = 0;
    game.turn = 1;
    game.state = GameState::InProgress;
    game.phase = RoundPhase::Preparing;
    game.last_move_at = None;
}

/// Turn advance shared by every mode. Returns whether another round follows.
pub(crate) fn advance_turn(game: &mut Game) -> bool {
    game.turn += 1;
    game.advance_rotation();
    game.phase = RoundPhase::Ended;
    if game.turn > game.total_rounds {
        game.state = GameState::Over;
        return false;
    }
    true
}

/// Rejects moves outside an active round.
pub(crate) fn ensure_accepting_moves(game: &Game) -> CoreResult<()> {
    if !game.is_in_progress() {
        return Err(CoreError::conflict("game is not in progress"));
    }
    if game.phase != RoundPhase::Active {
        return Err(CoreError::conflict("round is not active"));
    }
    Ok(())
}

/// `{ "round_N": { word, drawer_id, actions } }` in round order.
pub(crate) fn rounds_report(history: &BTreeMap<u32, RoundRecord>) -> Value {
    let rounds: serde_json::Map<String, Value> = history
        .iter()
        .map(|(round, record)| {
            (
                format!("round_{round}"),
                json!({
                    "word": record.word,
                    "drawer_id": record.drawer_id,
                    "actions": record.strokes,
                }),
            )
        })
        .collect();
    Value::Object(rounds)
}
