//! Collaborative Canvas: everyone draws the same word together.
//!
//! There is no guessing and no scoring. The active-player slot still rotates
//! so each round has an owner in the final report.

use serde_json::{json, Map, Value};
use std::mem;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    advance_turn, ensure_accepting_moves, pick_word, reset_roster, rounds_report, GameEngine, Move,
    MoveOutcome, WORDS,
};
use crate::error::{CoreError, CoreResult};
use crate::game::{CanvasData, Game, GameMode, ModeData, Player, RoundEndReason, RoundPhase, RoundRecord, Stroke};
use crate::outbox::RoomOutbox;
use crate::{Envelope, EventType, UserId};

pub struct CanvasEngine {
    outbox: RoomOutbox,
    words: &'static [&'static str],
}

impl CanvasEngine {
    #[must_use]
    pub fn new(outbox: RoomOutbox) -> Self {
        Self::with_words(outbox, &WORDS)
    }

    #[must_use]
    pub fn with_words(outbox: RoomOutbox, words: &'static [&'static str]) -> Self {
        Self { outbox, words }
    }
}

fn by_contributor(strokes: &[Stroke]) -> Value {
    let mut grouped: Map<String, Value> = Map::new();
    for stroke in strokes {
        let entry = grouped
            .entry(stroke.player_id.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = entry {
            list.push(stroke.data.clone());
        }
    }
    Value::Object(grouped)
}

impl GameEngine for CanvasEngine {
    fn mode(&self) -> GameMode {
        GameMode::CollaborativeCanvas
    }

    fn outbox(&self) -> &RoomOutbox {
        &self.outbox
    }

    fn init_game(&self, game: &mut Game, players: Vec<Player>) -> CoreResult<()> {
        reset_roster(game, players);
        game.data = ModeData::Canvas(CanvasData::default());
        info!(room = %game.room_id, players = game.players.len(), "Canvas game initialised");
        Ok(())
    }

    fn start_round(&self, game: &mut Game) -> CoreResult<()> {
        game.ensure_active_player();
        let round = game.turn;
        let owner = game.active_player;
        let word = pick_word(self.words);

        let data = game.data.canvas_mut()?;
        data.current_word = word.clone();
        data.strokes.clear();
        data.history.insert(
            round,
            RoundRecord {
                word: word.clone(),
                drawer_id: owner,
                strokes: Vec::new(),
            },
        );
        game.phase = RoundPhase::Active;
        game.last_move_at = None;

        let room = game.room_id;
        let duration = game.round_duration.as_secs();
        for p in &game.players {
            self.outbox.send_to(
                room,
                p.id,
                &Envelope::new(
                    EventType::RoundStartDrawer,
                    json!({
                        "room_id": room,
                        "drawer_id": p.id,
                        "round_owner": owner,
                        "word": word,
                        "duration": duration,
                        "round": round,
                        "total_rounds": game.total_rounds,
                    }),
                ),
            );
        }

        info!(room = %room, round, "Canvas round started");
        Ok(())
    }

    fn process_move(&self, game: &mut Game, player: UserId, data: &Value) -> CoreResult<MoveOutcome> {
        ensure_accepting_moves(game)?;
        if !game.is_member(player) {
            return Err(CoreError::forbidden("not a player in this game"));
        }

        match Move::parse(data)? {
            Move::Draw(payload) => {
                let room = game.room_id;
                game.data.canvas_mut()?.strokes.push(Stroke {
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
            Move::Guess(_) => Err(CoreError::invalid("there is nothing to guess in this mode")),
        }
    }

    fn end_round(&self, game: &mut Game, reason: RoundEndReason) -> CoreResult<bool> {
        let round = game.turn;
        let data = game.data.canvas_mut()?;
        let strokes = mem::take(&mut data.strokes);
        if let Some(record) = data.history.get_mut(&round) {
            record.strokes = strokes;
        }
        data.current_word.clear();

        let more = advance_turn(game);
        debug!(room = %game.room_id, round, reason = reason.as_str(), more, "Canvas round ended");
        Ok(more)
    }

    fn send_preparation_notifications(&self, game: &Game) {
        let secs = game.preparation_duration.as_secs();
        self.outbox.broadcast(
            game.room_id,
            &Envelope::new(
                EventType::RoundPreparation,
                json!({
                    "room_id": game.room_id,
                    "role": "drawer",
                    "drawer_id": game.active_player,
                    "preparation_duration": secs,
                    "round_number": game.turn,
                    "total_rounds": game.total_rounds,
                    "message": format!("Drawing starts in {secs} seconds. Get ready!"),
                }),
            ),
        );
    }

    fn final_report(&self, game: &Game) -> CoreResult<Value> {
        let data = game.data.canvas()?;
        let mut rounds = rounds_report(&data.history);
        if let Value::Object(map) = &mut rounds {
            for (round, record) in &data.history {
                if let Some(Value::Object(entry)) = map.get_mut(&format!("round_{round}")) {
                    entry.insert("contributors".into(), by_contributor(&record.strokes));
                }
            }
        }
        Ok(json!({
            "room_id": game.room_id,
            "mode_id": game.mode,
            "rounds": rounds,
        }))
    }
}
