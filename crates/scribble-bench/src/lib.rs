//! Shared fixtures for the Scribble benchmarks.

use scribble_core::{
    ConnectionHandle, ConnectionRegistry, DrawingEngine, Game, GameEngine, GameMode, GameSettings, Identity,
    Outbound, Player, RoomId, RoomOutbox, UserId,
};
use std::sync::Arc;

/// Words used by benchmark games, so rounds never depend on randomness.
pub const BENCH_WORDS: &[&str] = &["Saat"];

/// A room with `players` registered connections.
pub struct SeatedRoom {
    pub room: RoomId,
    pub registry: Arc<ConnectionRegistry>,
    pub outbox: RoomOutbox,
    pub users: Vec<UserId>,
    pub conns: Vec<ConnectionHandle>,
    /// Kept alive so sends are queued rather than reported closed.
    pub outs: Vec<Outbound>,
}

impl SeatedRoom {
    #[must_use]
    pub fn new(players: usize, capacity: usize) -> Self {
        let room = RoomId::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let mut users = Vec::with_capacity(players);
        let mut conns = Vec::with_capacity(players);
        let mut outs = Vec::with_capacity(players);
        for i in 0..players {
            let user = UserId::new();
            let (conn, out) = ConnectionHandle::new(room, Identity::new(user, format!("bench-{i}")), capacity);
            registry.register(conn.clone());
            users.push(user);
            conns.push(conn);
            outs.push(out);
        }
        Self {
            room,
            outbox: RoomOutbox::local(registry.clone()),
            registry,
            users,
            conns,
            outs,
        }
    }

    #[must_use]
    pub fn players(&self) -> Vec<Player> {
        self.users
            .iter()
            .enumerate()
            .map(|(i, id)| Player::new(*id, format!("bench-{i}")))
            .collect()
    }
}

/// A drawing game with its first round running. The first user draws.
pub struct RunningGame {
    pub seats: SeatedRoom,
    pub engine: DrawingEngine,
    pub game: Game,
}

impl RunningGame {
    /// # Panics
    ///
    /// Panics if the engine rejects the fixture, which is a bug in the
    /// benchmark setup.
    #[must_use]
    pub fn new(players: usize, capacity: usize) -> Self {
        let seats = SeatedRoom::new(players, capacity);
        let engine = DrawingEngine::with_words(seats.outbox.clone(), BENCH_WORDS);
        let settings = GameSettings::defaults_for(GameMode::DrawingGuessing);
        let mut game = Game::new(seats.room, &settings);
        engine
            .init_game(&mut game, seats.players())
            .expect("fixture game initialises");
        engine.start_round(&mut game).expect("fixture round starts");
        Self { seats, engine, game }
    }
}
