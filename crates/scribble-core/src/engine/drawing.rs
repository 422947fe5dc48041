//! Drawing & Guessing: one drawer per round, everyone else guesses.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::mem;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    advance_turn, ensure_accepting_moves, pick_word, reset_roster, rounds_report, GameEngine, Move,
    MoveOutcome, WORDS,
};
use crate::error::{CoreError, CoreResult};
use crate::game::{DrawingData, Game, GameMode, ModeData, Player, RoundEndReason, RoundPhase, RoundRecord, Stroke};
use crate::outbox::RoomOutbox;
use crate::{Envelope, EventType, UserId};

/// Points for a correct first guess.
pub const GUESSER_POINTS: u32 = 10;
/// Points the drawer earns per correct guess.
pub const DRAWER_POINTS: u32 = 5;

/// Guess comparison ignores surrounding whitespace and case.
#[must_use]
pub fn guess_matches(guess: &str, word: &str) -> bool {
    let guess = guess.trim();
    !guess.is_empty() && guess.to_lowercase() == word.trim().to_lowercase()
}

pub struct DrawingEngine {
    outbox: RoomOutbox,
    words: &'static [&'static str],
}

impl DrawingEngine {
    #[must_use]
    pub fn new(outbox: RoomOutbox) -> Self {
        Self::with_words(outbox, &WORDS)
    }

    #[must_use]
    pub fn with_words(outbox: RoomOutbox, words: &'static [&'static str]) -> Self {
        Self { outbox, words }
    }

    fn guess(&self, game: &mut Game, player: UserId, text: &str) -> CoreResult<MoveOutcome> {
        let Some(drawer) = game.active_player else {
            return Err(CoreError::conflict("round has no drawer"));
        };
        if drawer == player {
            return Err(CoreError::forbidden("the drawer cannot guess the word"));
        }

        let room = game.room_id;
        let username = game.username(player);
        let data = game.data.drawing_mut()?;

        if !guess_matches(text, &data.current_word) {
            self.outbox.broadcast(
                room,
                &Envelope::new(
                    EventType::GuessMessage,
                    json!({
                        "room_id": room,
                        "user_id": player,
                        "username": username,
                        "text": text,
                    }),
                ),
            );
            return Ok(MoveOutcome::Continue);
        }

        if !data.guessed.insert(player) {
            debug!(room = %room, user = %player, "Repeated correct guess ignored");
            return Ok(MoveOutcome::Continue);
        }
        // Players who left after guessing no longer count.
        let (guessed, guessers) = guess_progress(&game.players, drawer, &data.guessed);

        for p in &mut game.players {
            if p.id == player {
                p.score += GUESSER_POINTS;
            } else if p.id == drawer {
                p.score += DRAWER_POINTS;
            }
        }
        info!(room = %room, user = %player, guessed, guessers, "Correct guess");

        self.outbox.broadcast(
            room,
            &Envelope::new(
                EventType::CorrectGuess,
                json!({
                    "room_id": room,
                    "user_id": player,
                    "username": username,
                    "guessed_count": guessed,
                    "guessers": guessers,
                    "scores": game.scores(),
                }),
            ),
        );

        if guessed >= guessers {
            Ok(MoveOutcome::RoundComplete(RoundEndReason::AllGuessed))
        } else {
            Ok(MoveOutcome::Continue)
        }
    }
}

/// Correct guessers and total guessers among the seated players.
fn guess_progress(players: &[Player], drawer: UserId, guessed: &HashSet<UserId>) -> (usize, usize) {
    players
        .iter()
        .filter(|p| p.id != drawer)
        .fold((0, 0), |(hits, total), p| (hits + usize::from(guessed.contains(&p.id)), total + 1))
}

/// Whether an active drawing round has no guesser left to wait for.
pub(crate) fn all_guessed(game: &Game) -> bool {
    let (Some(drawer), Ok(data)) = (game.active_player, game.data.drawing()) else {
        return false;
    };
    if game.phase != RoundPhase::Active {
        return false;
    }
    let (guessed, guessers) = guess_progress(&game.players, drawer, &data.guessed);
    guessers > 0 && guessed >= guessers
}

impl GameEngine for DrawingEngine {
    fn mode(&self) -> GameMode {
        GameMode::DrawingGuessing
    }

    fn outbox(&self) -> &RoomOutbox {
        &self.outbox
    }

    fn init_game(&self, game: &mut Game, players: Vec<Player>) -> CoreResult<()> {
        reset_roster(game, players);
        game.data = ModeData::Drawing(DrawingData::default());
        info!(
            room = %game.room_id,
            players = game.players.len(),
            first_drawer = ?game.active_player,
            "Drawing game initialised"
        );
        Ok(())
    }

    fn start_round(&self, game: &mut Game) -> CoreResult<()> {
        game.ensure_active_player();
        let round = game.turn;
        let drawer = game.active_player;
        let word = pick_word(self.words);

        let data = game.data.drawing_mut()?;
        data.current_word = word.clone();
        data.strokes.clear();
        data.guessed.clear();
        data.history.insert(
            round,
            RoundRecord {
                word: word.clone(),
                drawer_id: drawer,
                strokes: Vec::new(),
            },
        );
        game.phase = RoundPhase::Active;
        game.last_move_at = None;

        let room = game.room_id;
        let duration = game.round_duration.as_secs();
        let word_length = word.chars().count();
        for p in &game.players {
            let event = if Some(p.id) == drawer {
                Envelope::new(
                    EventType::RoundStartDrawer,
                    json!({
                        "room_id": room,
                        "drawer_id": drawer,
                        "word": word,
                        "duration": duration,
                        "round": round,
                        "total_rounds": game.total_rounds,
                    }),
                )
            } else {
                Envelope::new(
                    EventType::RoundStartGuesser,
                    json!({
                        "room_id": room,
                        "drawer_id": drawer,
                        "hint": "_".repeat(word_length),
                        "word_length": word_length,
                        "duration": duration,
                        "round": round,
                        "total_rounds": game.total_rounds,
                    }),
                )
            };
            self.outbox.send_to(room, p.id, &event);
        }

        info!(room = %room, round, drawer = ?drawer, "Round started");
        Ok(())
    }

    fn process_move(&self, game: &mut Game, player: UserId, data: &Value) -> CoreResult<MoveOutcome> {
        ensure_accepting_moves(game)?;
        if !game.is_member(player) {
            return Err(CoreError::forbidden("not a player in this game"));
        }

        match Move::parse(data)? {
            Move::Draw(payload) => {
                if game.active_player != Some(player) {
                    return Err(CoreError::forbidden("it is not your turn to draw"));
                }
                let room = game.room_id;
                game.data.drawing_mut()?.strokes.push(Stroke {
                    player_id: player,
                    data: payload.clone(),
                });
                game.last_move_at = Some(Instant::now());
                self.outbox.broadcast_except(
                    room,
                    player,
                    &Envelope::new(
                        EventType::CanvasUpdate,
                        json!({"room_id": room, "drawer_id": player, "data": payload}),
                    ),
                );
                Ok(MoveOutcome::Continue)
            }
            Move::Guess(text) => self.guess(game, player, &text),
        }
    }

    fn end_round(&self, game: &mut Game, reason: RoundEndReason) -> CoreResult<bool> {
        let round = game.turn;
        let data = game.data.drawing_mut()?;
        let strokes = mem::take(&mut data.strokes);
        if let Some(record) = data.history.get_mut(&round) {
            record.strokes = strokes;
        }
        data.guessed.clear();
        data.current_word.clear();

        let more = advance_turn(game);
        debug!(room = %game.room_id, round, reason = reason.as_str(), more, "Round ended");
        Ok(more)
    }

    fn send_preparation_notifications(&self, game: &Game) {
        let room = game.room_id;
        let secs = game.preparation_duration.as_secs();
        for p in &game.players {
            let (role, message) = if Some(p.id) == game.active_player {
                ("drawer", format!("Drawing starts in {secs} seconds. Get ready!"))
            } else {
                ("guesser", format!("Next round starts in {secs} seconds!"))
            };
            self.outbox.send_to(
                room,
                p.id,
                &Envelope::new(
                    EventType::RoundPreparation,
                    json!({
                        "room_id": room,
                        "role": role,
                        "drawer_id": game.active_player,
                        "preparation_duration": secs,
                        "round_number": game.turn,
                        "total_rounds": game.total_rounds,
                        "message": message,
                    }),
                ),
            );
        }
    }

    fn final_report(&self, game: &Game) -> CoreResult<Value> {
        let data = game.data.drawing()?;
        Ok(json!({
            "room_id": game.room_id,
            "mode_id": game.mode,
            "rounds": rounds_report(&data.history),
            "scores": game.scores(),
            "winners": game.top_scorers(),
        }))
    }
}
