//! Game orchestration.
//!
//! The orchestrator owns the room → game and room → settings tables and
//! drives each game through its rounds:
//!
//! ```text
//!   start_game ──▶ prepare ──sleep──▶ start_round ──▶ timer
//!                     ▲                                 │
//!                     │        round-end signal ◀───────┘ (or all guessed,
//!                     │               │                    or drawer left)
//!                     └── continue ◀──┴──▶ game over ──▶ removed
//! ```
//!
//! Table guards are only held for the map access; a game's fields are only
//! touched under its own lock, and the two are never held together. Round
//! ends from every source are funnelled through one signal listener.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{GameCommand, RoomCommand};
use crate::engine::drawing::all_guessed;
use crate::engine::{GameEngine, MoveOutcome};
use crate::error::{CoreError, ErrorKind};
use crate::game::{Game, GameMode, GameSettings, GameState, Player, RoundEndReason, RoundPhase, SettingsUpdate, SharedGame};
use crate::outbox::RoomOutbox;
use crate::registry::ConnectionRegistry;
use crate::scheduler::{RoundEndSignal, RoundScheduler};
use crate::{Envelope, EventType, RejectReason, RoomId, UserId};

/// Default time a disconnected player keeps their seat.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// A player's connection to a room went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerQuit {
    pub room_id: RoomId,
    pub user_id: UserId,
}

/// Roster standing of a connecting user.
#[derive(Debug, Clone, PartialEq)]
pub enum RosterCheck {
    /// No game is running in the room.
    NoGame,
    /// A game is running and the user is not in it.
    NotMember,
    /// The user is in the running game; carries the game snapshot.
    Member(Value),
}

/// Orchestrator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub active_games: usize,
    pub games_started: u64,
    pub games_finished: u64,
    pub rounds_ended: u64,
    pub rounds_by_reason: [(RoundEndReason, u64); 3],
}

/// Reason code for an error caused by a player's own action.
#[must_use]
pub fn reject_reason(err: &CoreError) -> RejectReason {
    match err.kind() {
        ErrorKind::Forbidden => RejectReason::NotYourTurn,
        ErrorKind::InvalidInput | ErrorKind::Conflict => RejectReason::InvalidMove,
        ErrorKind::NotFound => RejectReason::GameNotFound,
        ErrorKind::Unauthorized => RejectReason::NotRoomMember,
        ErrorKind::Internal => RejectReason::Internal,
    }
}

/// Player removal decided at the end of a grace period.
enum Departure {
    Stale,
    GameOver(Value),
    Left { round: u32, ends: Option<RoundEndReason> },
}

/// Room game orchestrator.
pub struct GameOrchestrator {
    registry: Arc<ConnectionRegistry>,
    outbox: RoomOutbox,
    scheduler: Arc<RoundScheduler>,
    engines: HashMap<GameMode, Arc<dyn GameEngine>>,
    games: DashMap<RoomId, SharedGame>,
    settings: DashMap<RoomId, GameSettings>,
    signals: mpsc::Sender<RoundEndSignal>,
    grace_period: Duration,
    games_started: AtomicU64,
    games_finished: AtomicU64,
    rounds_ended: [AtomicU64; 3],
}

impl GameOrchestrator {
    /// Create an orchestrator. `signals` must feed the receiver later given
    /// to [`GameOrchestrator::spawn_signal_listener`].
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        outbox: RoomOutbox,
        scheduler: Arc<RoundScheduler>,
        engines: Vec<Arc<dyn GameEngine>>,
        signals: mpsc::Sender<RoundEndSignal>,
        grace_period: Duration,
    ) -> Arc<Self> {
        let engines = engines.into_iter().map(|e| (e.mode(), e)).collect();
        Arc::new(Self {
            registry,
            outbox,
            scheduler,
            engines,
            games: DashMap::new(),
            settings: DashMap::new(),
            signals,
            grace_period,
            games_started: AtomicU64::new(0),
            games_finished: AtomicU64::new(0),
            rounds_ended: Default::default(),
        })
    }

    /// Drain round-end signals and player departures, one at a time.
    pub fn spawn_signal_listener(
        self: &Arc<Self>,
        mut signals: mpsc::Receiver<RoundEndSignal>,
        mut quits: mpsc::Receiver<PlayerQuit>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(signal) = signals.recv() => this.handle_round_end(signal).await,
                    Some(quit) = quits.recv() => this.handle_player_quit(quit.room_id, quit.user_id).await,
                    else => break,
                }
            }
            debug!("Signal listener stopped");
        })
    }

    /// Drain room commands from connections and the bus.
    pub fn spawn_command_loop(self: &Arc<Self>, mut inbox: mpsc::Receiver<RoomCommand>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(cmd) = inbox.recv().await {
                this.handle_command(cmd).await;
            }
            debug!("Command loop stopped");
        })
    }

    pub async fn handle_command(self: &Arc<Self>, cmd: RoomCommand) {
        debug!(room = %cmd.room_id, actor = ?cmd.actor, command = cmd.label(), "Room command");
        let RoomCommand {
            room_id,
            actor,
            command,
        } = cmd;

        match command {
            GameCommand::ChangeMode(mode) => self.change_mode(room_id, mode),
            GameCommand::UpdateSettings(update) => self.update_settings(room_id, actor, &update),
            GameCommand::StartGame => self.start_game(room_id, actor).await,
            GameCommand::PlayerMove(data) => self.player_move(room_id, actor, data).await,
            GameCommand::CanvasAction(data) => {
                self.player_move(room_id, actor, as_canvas_action(data)).await;
            }
        }
    }

    fn engine(&self, mode: GameMode) -> Option<Arc<dyn GameEngine>> {
        self.engines.get(&mode).cloned()
    }

    /// The room's running game, if any.
    #[must_use]
    pub fn game(&self, room: RoomId) -> Option<SharedGame> {
        self.games.get(&room).map(|g| Arc::clone(&g))
    }

    fn is_current(&self, room: RoomId, game: &SharedGame) -> bool {
        self.games.get(&room).is_some_and(|g| Arc::ptr_eq(&g, game))
    }

    /// Settings the next game in the room will use.
    #[must_use]
    pub fn settings(&self, room: RoomId) -> GameSettings {
        self.settings
            .get(&room)
            .map(|s| s.clone())
            .unwrap_or_else(|| GameSettings::defaults_for(GameMode::DrawingGuessing))
    }

    /// Seed a room's settings from its stored mode unless already set.
    pub fn ensure_settings(&self, room: RoomId, mode: GameMode) {
        self.settings
            .entry(room)
            .or_insert_with(|| GameSettings::defaults_for(mode));
    }

    /// Drop a room's settings unless a game is running there.
    pub fn forget_room(&self, room: RoomId) -> bool {
        if self.games.contains_key(&room) {
            return false;
        }
        self.settings.remove(&room).is_some()
    }

    fn reject(&self, room: RoomId, actor: Option<UserId>, event: &Envelope) {
        match actor {
            Some(user) => {
                self.outbox.send_to(room, user, event);
            }
            None => {
                self.outbox.broadcast(room, event);
            }
        }
    }

    fn change_mode(&self, room: RoomId, mode: GameMode) {
        let settings = {
            let mut entry = self
                .settings
                .entry(room)
                .or_insert_with(|| GameSettings::defaults_for(mode));
            entry.switch_mode(mode);
            entry.clone()
        };
        info!(room = %room, mode = %mode, "Game mode changed");
        self.outbox.broadcast(
            room,
            &Envelope::new(
                EventType::GameModeChanged,
                json!({
                    "room_id": room,
                    "game_mode_id": mode,
                    "mode_name": settings.mode_name,
                    "settings": settings,
                }),
            ),
        );
    }

    fn update_settings(&self, room: RoomId, actor: Option<UserId>, update: &SettingsUpdate) {
        let result = {
            let mut entry = self
                .settings
                .entry(room)
                .or_insert_with(|| GameSettings::defaults_for(GameMode::DrawingGuessing));
            entry.apply(update).map(|()| entry.clone())
        };

        match result {
            Ok(settings) => {
                info!(room = %room, ?update, "Game settings updated");
                self.outbox.broadcast(
                    room,
                    &Envelope::new(
                        EventType::GameSettingsUpdated,
                        json!({"room_id": room, "settings": settings}),
                    ),
                );
            }
            Err(e) => {
                warn!(room = %room, error = %e, "Rejected settings update");
                self.reject(
                    room,
                    actor,
                    &Envelope::error(room, RejectReason::InvalidSettings, e.to_string()),
                );
            }
        }
    }

    /// Start a game with everyone currently connected to the room.
    pub async fn start_game(self: &Arc<Self>, room: RoomId, actor: Option<UserId>) {
        if self.games.contains_key(&room) {
            self.reject_in_progress(room, actor);
            return;
        }

        let settings = self.settings(room);
        let Some(engine) = self.engine(settings.mode) else {
            self.reject(
                room,
                actor,
                &Envelope::start_failed(room, RejectReason::UnknownMode, "no engine for this mode"),
            );
            return;
        };

        let roster = self.registry.members(room);
        if roster.len() < settings.min_players {
            info!(room = %room, players = roster.len(), min = settings.min_players, "Not enough players to start");
            self.outbox.broadcast(
                room,
                &Envelope::start_failed(
                    room,
                    RejectReason::InsufficientPlayers,
                    format!("at least {} players are needed to start", settings.min_players),
                ),
            );
            return;
        }

        let players: Vec<Player> = roster
            .into_iter()
            .map(|identity| Player::new(identity.user_id, identity.username))
            .collect();
        let mut game = Game::new(room, &settings);
        game.total_rounds = settings.total_rounds.max(players.len() as u32);
        if let Err(e) = engine.init_game(&mut game, players) {
            warn!(room = %room, error = %e, "Game initialisation failed");
            self.reject(room, actor, &Envelope::start_failed(room, RejectReason::Internal, e.to_string()));
            return;
        }
        let summary = started_summary(&game);

        let shared: SharedGame = Arc::new(Mutex::new(game));
        match self.games.entry(room) {
            Entry::Occupied(_) => {
                self.reject_in_progress(room, actor);
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&shared));
            }
        }
        self.games_started.fetch_add(1, Ordering::Relaxed);

        info!(
            room = %room,
            mode = %settings.mode,
            players = summary["initial_player_count"].as_u64().unwrap_or_default(),
            total_rounds = summary["total_rounds"].as_u64().unwrap_or_default(),
            "Game started"
        );
        self.outbox
            .broadcast(room, &Envelope::new(EventType::GameStarted, summary));
        self.spawn_round(room, shared);
    }

    fn reject_in_progress(&self, room: RoomId, actor: Option<UserId>) {
        debug!(room = %room, "Start rejected, game already running");
        self.reject(
            room,
            actor,
            &Envelope::start_failed(
                room,
                RejectReason::GameAlreadyInProgress,
                "a game is already in progress in this room",
            ),
        );
    }

    fn spawn_round(self: &Arc<Self>, room: RoomId, game: SharedGame) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_round(room, game).await });
    }

    /// Preparation notice, preparation wait, round start and timer.
    async fn run_round(&self, room: RoomId, game: SharedGame) {
        let (engine, preparation) = {
            let mut g = game.lock().await;
            if !g.is_in_progress() {
                return;
            }
            let Some(engine) = self.engine(g.mode) else {
                warn!(room = %room, mode = %g.mode, "No engine for running game");
                return;
            };
            g.phase = RoundPhase::Preparing;
            g.ensure_active_player();
            engine.send_preparation_notifications(&g);
            (engine, g.preparation_duration)
        };

        tokio::time::sleep(preparation).await;

        if !self.is_current(room, &game) {
            debug!(room = %room, "Game ended during preparation");
            return;
        }
        let (round, duration) = {
            let mut g = game.lock().await;
            if !g.is_in_progress() || g.phase != RoundPhase::Preparing {
                return;
            }
            if let Err(e) = engine.start_round(&mut g) {
                warn!(room = %room, error = %e, "Failed to start round");
                return;
            }
            (g.turn, g.round_duration)
        };

        self.scheduler.start(room, round, duration).await;
    }

    /// End the current round and either prepare the next one or finish the
    /// game. Signals for a round that is no longer running are ignored.
    pub async fn handle_round_end(self: &Arc<Self>, signal: RoundEndSignal) {
        let RoundEndSignal {
            room_id: room,
            round,
            reason,
        } = signal;

        self.scheduler.stop_round(room, round).await;

        let Some(game) = self.game(room) else {
            debug!(room = %room, round, reason = reason.as_str(), "Round end for room without game");
            return;
        };

        let finished = {
            let mut g = game.lock().await;
            if !g.is_in_progress() || g.phase != RoundPhase::Active || g.turn != round {
                debug!(room = %room, round, current = g.turn, reason = reason.as_str(), "Stale round end ignored");
                return;
            }
            let Some(engine) = self.engine(g.mode) else {
                return;
            };

            let word = g.data.current_word().to_string();
            let more = match engine.end_round(&mut g, reason) {
                Ok(more) => more,
                Err(e) => {
                    warn!(room = %room, round, error = %e, "Failed to end round");
                    return;
                }
            };
            self.rounds_ended[reason.index()].fetch_add(1, Ordering::Relaxed);
            info!(room = %room, round, reason = reason.as_str(), more, "Round ended");

            self.outbox.broadcast(
                room,
                &Envelope::new(
                    EventType::RoundEnded,
                    json!({
                        "room_id": room,
                        "reason": reason,
                        "round": round,
                        "word": word,
                        "game": g.snapshot(),
                    }),
                ),
            );

            if more {
                None
            } else {
                if let Err(e) = engine.send_final_report(&g) {
                    warn!(room = %room, error = %e, "Failed to send final report");
                }
                Some(json!({
                    "room_id": room,
                    "reason": "completed",
                    "scores": g.scores(),
                    "winners": g.top_scorers(),
                }))
            }
        };

        match finished {
            None => self.spawn_round(room, game),
            Some(summary) => self.finish_game(room, &game, summary),
        }
    }

    fn finish_game(&self, room: RoomId, game: &SharedGame, summary: Value) {
        if self.games.remove_if(&room, |_, g| Arc::ptr_eq(g, game)).is_some() {
            self.games_finished.fetch_add(1, Ordering::Relaxed);
        }
        info!(room = %room, reason = summary["reason"].as_str().unwrap_or_default(), "Game over");
        self.outbox
            .broadcast(room, &Envelope::new(EventType::GameEnded, summary));
    }

    /// Queue a round end, or handle it here if the queue is full.
    async fn signal_round_end(self: &Arc<Self>, signal: RoundEndSignal) {
        match self.signals.try_send(signal) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(signal)) => {
                debug!(room = %signal.room_id, "Signal queue full, ending round inline");
                self.handle_round_end(signal).await;
            }
            Err(mpsc::error::TrySendError::Closed(signal)) => {
                warn!(room = %signal.room_id, "Signal listener gone, ending round inline");
                self.handle_round_end(signal).await;
            }
        }
    }

    async fn player_move(self: &Arc<Self>, room: RoomId, actor: Option<UserId>, data: Value) {
        let Some(player) = actor else {
            warn!(room = %room, "Move without a connected player ignored");
            return;
        };

        let Some(game) = self.game(room) else {
            self.outbox.send_to(
                room,
                player,
                &Envelope::error(room, RejectReason::GameNotFound, "no game is running in this room"),
            );
            return;
        };

        let result = {
            let mut g = game.lock().await;
            match self.engine(g.mode) {
                Some(engine) => engine
                    .process_move(&mut g, player, &data)
                    .map(|outcome| (outcome, g.turn)),
                None => Err(CoreError::internal("no engine for running game")),
            }
        };

        match result {
            Ok((MoveOutcome::Continue, _)) => {}
            Ok((MoveOutcome::RoundComplete(reason), round)) => {
                self.signal_round_end(RoundEndSignal {
                    room_id: room,
                    round,
                    reason,
                })
                .await;
            }
            Err(e) => {
                warn!(room = %room, user = %player, error = %e, "Move rejected");
                self.outbox.send_to(
                    room,
                    player,
                    &Envelope::error(room, reject_reason(&e), e.to_string()),
                );
            }
        }
    }

    /// A player's connection went away. Their seat is kept for the grace
    /// period before they are removed from the game.
    pub async fn handle_player_quit(self: &Arc<Self>, room: RoomId, user: UserId) {
        let Some(game) = self.game(room) else {
            return;
        };

        let epoch = {
            let mut g = game.lock().await;
            if !g.is_in_progress() {
                return;
            }
            let Some(player) = g.player_mut(user) else {
                return;
            };
            player.connected = false;
            player.disconnects += 1;
            player.disconnects
        };

        info!(room = %room, user = %user, grace_secs = self.grace_period.as_secs(), "Player disconnected, seat held");
        let this = Arc::clone(self);
        tokio::spawn(async move { this.expire_grace(room, user, game, epoch).await });
    }

    async fn expire_grace(self: Arc<Self>, room: RoomId, user: UserId, game: SharedGame, epoch: u64) {
        tokio::time::sleep(self.grace_period).await;

        if self.registry.is_connected(room, user) {
            let mut g = game.lock().await;
            if let Some(p) = g.player_mut(user) {
                p.connected = true;
            }
            debug!(room = %room, user = %user, "Player back within grace period");
            return;
        }
        if !self.is_current(room, &game) {
            return;
        }

        let departure = {
            let mut g = game.lock().await;
            let current = g.is_in_progress()
                && g
                    .player(user)
                    .is_some_and(|p| p.disconnects == epoch && !p.connected);
            match current.then(|| g.remove_player(user)).flatten() {
                None => Departure::Stale,
                Some((player, was_active)) => {
                    let remaining = g.players.len();
                    info!(room = %room, user = %user, remaining, was_active, "Player removed after grace period");

                    if remaining < g.min_players {
                        g.state = GameState::Over;
                        Departure::GameOver(json!({
                            "room_id": room,
                            "reason": RejectReason::InsufficientPlayers,
                            "message": format!("{} left and too few players remain", player.username),
                            "scores": g.scores(),
                            "winners": g.top_scorers(),
                        }))
                    } else {
                        self.outbox.broadcast(
                            room,
                            &Envelope::new(
                                EventType::PlayerLeft,
                                json!({
                                    "room_id": room,
                                    "user_id": user,
                                    "username": player.username,
                                    "remaining": remaining,
                                    "was_active": was_active,
                                }),
                            ),
                        );
                        let ends = if was_active && g.phase == RoundPhase::Active {
                            Some(RoundEndReason::DrawerLeft)
                        } else if all_guessed(&g) {
                            Some(RoundEndReason::AllGuessed)
                        } else {
                            None
                        };
                        Departure::Left { round: g.turn, ends }
                    }
                }
            }
        };

        match departure {
            Departure::Stale => {}
            Departure::GameOver(summary) => {
                self.scheduler.stop(room).await;
                self.finish_game(room, &game, summary);
            }
            Departure::Left {
                round,
                ends: Some(reason),
            } => {
                self.signal_round_end(RoundEndSignal {
                    room_id: room,
                    round,
                    reason,
                })
                .await;
            }
            Departure::Left { ends: None, .. } => {}
        }
    }

    /// Where a connecting user stands in the room's game. A roster member
    /// is marked connected again.
    pub async fn check_roster(&self, room: RoomId, user: UserId) -> RosterCheck {
        let Some(game) = self.game(room) else {
            return RosterCheck::NoGame;
        };
        let mut g = game.lock().await;
        if !g.is_in_progress() {
            return RosterCheck::NoGame;
        }
        match g.player_mut(user) {
            Some(player) => {
                player.connected = true;
                RosterCheck::Member(g.snapshot())
            }
            None => RosterCheck::NotMember,
        }
    }

    #[must_use]
    pub fn active_games(&self) -> usize {
        self.games.len()
    }

    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        let by_reason = RoundEndReason::ALL.map(|r| (r, self.rounds_ended[r.index()].load(Ordering::Relaxed)));
        OrchestratorStats {
            active_games: self.games.len(),
            games_started: self.games_started.load(Ordering::Relaxed),
            games_finished: self.games_finished.load(Ordering::Relaxed),
            rounds_ended: by_reason.iter().map(|(_, n)| n).sum(),
            rounds_by_reason: by_reason,
        }
    }
}

fn started_summary(game: &Game) -> Value {
    json!({
        "room_id": game.room_id,
        "mode_id": game.mode,
        "mode_name": game.mode_name,
        "players": game.players,
        "total_rounds": game.total_rounds,
        "round_duration": game.round_duration.as_secs(),
        "preparation_duration": game.preparation_duration.as_secs(),
        "initial_player_count": game.initial_player_count,
        "min_players": game.min_players,
        "current_round": game.turn,
    })
}

/// `canvas_action` events may omit the move type.
fn as_canvas_action(mut data: Value) -> Value {
    match &mut data {
        Value::Object(obj) => {
            obj.entry("type")
                .or_insert_with(|| Value::String("canvas_action".into()));
            data
        }
        _ => json!({"type": "canvas_action", "data": data}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CanvasEngine, DrawingEngine};
    use crate::scheduler::DEFAULT_STOP_TIMEOUT;
    use crate::test_support::{event_types, TestRoom};

    struct Harness {
        room: TestRoom,
        orchestrator: Arc<GameOrchestrator>,
        quits: mpsc::Sender<PlayerQuit>,
    }

    fn harness(players: usize) -> Harness {
        let room = TestRoom::new(players);
        let (signal_tx, signal_rx) = mpsc::channel(5);
        let (quit_tx, quit_rx) = mpsc::channel(16);
        let scheduler = Arc::new(RoundScheduler::new(signal_tx.clone(), DEFAULT_STOP_TIMEOUT));
        let engines: Vec<Arc<dyn GameEngine>> = vec![
            Arc::new(DrawingEngine::with_words(room.outbox.clone(), &["Elma"])),
            Arc::new(CanvasEngine::with_words(room.outbox.clone(), &["Elma"])),
        ];
        let orchestrator = GameOrchestrator::new(
            room.registry.clone(),
            room.outbox.clone(),
            scheduler,
            engines,
            signal_tx,
            DEFAULT_GRACE_PERIOD,
        );
        orchestrator.spawn_signal_listener(signal_rx, quit_rx);
        Harness {
            room,
            orchestrator,
            quits: quit_tx,
        }
    }

    fn cmd(h: &Harness, actor: usize, command: GameCommand) -> RoomCommand {
        RoomCommand::new(h.room.room, Some(h.room.users[actor]), command)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_broadcasts_summary_with_raised_rounds() {
        let mut h = harness(3);
        h.orchestrator.handle_command(cmd(&h, 0, GameCommand::StartGame)).await;

        let seen = h.room.drain(1).await;
        assert_eq!(event_types(&seen), vec![EventType::GameStarted]);
        assert_eq!(seen[0].u64_field("total_rounds"), Some(3));
        assert_eq!(seen[0].u64_field("current_round"), Some(1));
        assert_eq!(h.orchestrator.stats().games_started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let mut h = harness(2);
        h.orchestrator.handle_command(cmd(&h, 0, GameCommand::StartGame)).await;
        let first = h.orchestrator.game(h.room.room).unwrap();
        h.room.drain_all().await;

        h.orchestrator.handle_command(cmd(&h, 1, GameCommand::StartGame)).await;
        let seen = h.room.drain(1).await;
        assert_eq!(event_types(&seen), vec![EventType::GameStartFailed]);
        assert_eq!(seen[0].str_field("reason"), Some("game_already_in_progress"));
        assert!(h.room.drain(0).await.is_empty());
        assert!(Arc::ptr_eq(&first, &h.orchestrator.game(h.room.room).unwrap()));
        assert_eq!(h.orchestrator.active_games(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_players() {
        let mut h = harness(1);
        h.orchestrator.handle_command(cmd(&h, 0, GameCommand::StartGame)).await;
        let seen = h.room.drain(0).await;
        assert_eq!(event_types(&seen), vec![EventType::GameStartFailed]);
        assert_eq!(seen[0].str_field("reason"), Some("insufficient_players"));
        assert!(h.orchestrator.game(h.room.room).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_change_and_settings() {
        let mut h = harness(2);
        h.orchestrator
            .handle_command(cmd(&h, 0, GameCommand::ChangeMode(GameMode::CollaborativeCanvas)))
            .await;
        let seen = h.room.drain(1).await;
        assert_eq!(event_types(&seen), vec![EventType::GameModeChanged]);
        assert_eq!(seen[0].str_field("game_mode_id"), Some("2"));

        let update = SettingsUpdate {
            total_rounds: Some(4),
            ..SettingsUpdate::default()
        };
        h.orchestrator
            .handle_command(cmd(&h, 0, GameCommand::UpdateSettings(update)))
            .await;
        let settings = h.orchestrator.settings(h.room.room);
        assert_eq!(settings.mode, GameMode::CollaborativeCanvas);
        assert_eq!(settings.total_rounds, 4);
        assert_eq!(event_types(&h.room.drain(1).await), vec![EventType::GameSettingsUpdated]);

        let bad = SettingsUpdate {
            min_players: Some(50),
            ..SettingsUpdate::default()
        };
        h.orchestrator
            .handle_command(cmd(&h, 0, GameCommand::UpdateSettings(bad)))
            .await;
        let seen = h.room.drain(0).await;
        assert_eq!(seen.last().unwrap().str_field("reason"), Some("invalid_settings"));
        assert!(h.room.drain(1).await.is_empty());
        assert_eq!(h.orchestrator.settings(h.room.room).min_players, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_without_game_gets_error() {
        let mut h = harness(2);
        h.orchestrator
            .handle_command(cmd(&h, 1, GameCommand::PlayerMove(json!({"type": "guess", "text": "x"}))))
            .await;
        let seen = h.room.drain(1).await;
        assert_eq!(seen[0].str_field("reason"), Some("game_not_found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_move_only_reaches_mover() {
        let mut h = harness(2);
        h.orchestrator.handle_command(cmd(&h, 0, GameCommand::StartGame)).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        h.room.drain_all().await;

        // Player 1 is a guesser and may not draw.
        h.orchestrator
            .handle_command(cmd(&h, 1, GameCommand::CanvasAction(json!({"x": 1}))))
            .await;
        let seen = h.room.drain(1).await;
        assert_eq!(event_types(&seen), vec![EventType::Error]);
        assert_eq!(seen[0].str_field("reason"), Some("not_your_turn"));
        assert!(h.room.drain(0).await.is_empty());
        assert!(h.orchestrator.game(h.room.room).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_without_connection_identity_is_dropped() {
        let mut h = harness(2);
        h.orchestrator.handle_command(cmd(&h, 0, GameCommand::StartGame)).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        h.room.drain_all().await;

        // The payload names the drawer, but only the connection decides who acts.
        let drawer = h.room.users[0].to_string();
        h.orchestrator
            .handle_command(RoomCommand::new(
                h.room.room,
                None,
                GameCommand::PlayerMove(json!({"type": "draw", "player_id": drawer, "x": 1})),
            ))
            .await;

        assert!(h.room.drain_all().await.iter().all(Vec::is_empty));
        let game = h.orchestrator.game(h.room.room).unwrap();
        assert!(game.lock().await.data.drawing().unwrap().strokes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_round_end_is_ignored() {
        let mut h = harness(2);
        h.orchestrator.handle_command(cmd(&h, 0, GameCommand::StartGame)).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        h.room.drain_all().await;

        let room = h.room.room;
        let signal = |round| RoundEndSignal {
            room_id: room,
            round,
            reason: RoundEndReason::AllGuessed,
        };
        h.orchestrator.handle_round_end(signal(1)).await;
        h.orchestrator.handle_round_end(signal(1)).await;

        let game = h.orchestrator.game(room).unwrap();
        assert_eq!(game.lock().await.turn, 2);
        let ended: Vec<_> = h
            .room
            .drain(0)
            .await
            .into_iter()
            .filter(|e| e.event == EventType::RoundEnded)
            .collect();
        assert_eq!(ended.len(), 1);
        let stats = h.orchestrator.stats();
        assert_eq!(stats.rounds_ended, 1);
        assert_eq!(stats.rounds_by_reason[RoundEndReason::AllGuessed.index()], (RoundEndReason::AllGuessed, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_without_game_is_noop() {
        let h = harness(2);
        h.quits
            .send(PlayerQuit {
                room_id: h.room.room,
                user_id: h.room.users[0],
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.orchestrator.active_games(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_check() {
        let h = harness(2);
        let room = h.room.room;
        assert_eq!(h.orchestrator.check_roster(room, h.room.users[0]).await, RosterCheck::NoGame);

        h.orchestrator.handle_command(cmd(&h, 0, GameCommand::StartGame)).await;
        assert_eq!(h.orchestrator.check_roster(room, UserId::new()).await, RosterCheck::NotMember);
        match h.orchestrator.check_roster(room, h.room.users[1]).await {
            RosterCheck::Member(snapshot) => assert_eq!(snapshot["total_rounds"], 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_room_keeps_running_game_settings() {
        let h = harness(2);
        let room = h.room.room;
        h.orchestrator.ensure_settings(room, GameMode::CollaborativeCanvas);
        h.orchestrator.ensure_settings(room, GameMode::DrawingGuessing);
        assert_eq!(h.orchestrator.settings(room).mode, GameMode::CollaborativeCanvas);

        h.orchestrator.handle_command(cmd(&h, 0, GameCommand::StartGame)).await;
        assert!(!h.orchestrator.forget_room(room));
    }

    #[test]
    fn test_canvas_action_type_defaults() {
        assert_eq!(as_canvas_action(json!({"x": 1}))["type"], "canvas_action");
        assert_eq!(as_canvas_action(json!({"type": "draw"}))["type"], "draw");
        assert_eq!(as_canvas_action(json!([1, 2]))["data"], json!([1, 2]));
    }

    #[test]
    fn test_reject_reasons() {
        assert_eq!(reject_reason(&CoreError::forbidden("x")), RejectReason::NotYourTurn);
        assert_eq!(reject_reason(&CoreError::invalid("x")), RejectReason::InvalidMove);
        assert_eq!(reject_reason(&CoreError::not_found("x")), RejectReason::GameNotFound);
    }
}
