//! # scribble-core
//!
//! Room, connection and game orchestration for the Scribble drawing game.
//!
//! This crate provides the building blocks a server instance is made of:
//!
//! - **ConnectionRegistry** - live connections grouped by room, non-blocking sends
//! - **RoomBridge** - mirrors room events across instances over a pub/sub bus
//! - **GameEngine** - per-mode rules ([`DrawingEngine`], [`CanvasEngine`])
//! - **RoundScheduler** - one cancelable round timer per room
//! - **GameOrchestrator** - game start, round transitions, departures
//! - **ConnectionLifecycle** - admission, inbound messages, teardown
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  commands  ┌──────────────┐  &mut Game  ┌────────────┐
//! │ Lifecycle  │───────────▶│ Orchestrator │────────────▶│   Engine   │
//! └────────────┘            └──────────────┘             └────────────┘
//!       │                     ▲          ▲                      │
//!       │ register            │ signals  │ control              │ events
//!       ▼                     │          │                      ▼
//! ┌────────────┐      ┌───────────┐  ┌────────┐  relay   ┌────────────┐
//! │  Registry  │◀─────│ Scheduler │  │ Bridge │◀────────│   Outbox   │
//! └────────────┘      └───────────┘  └────────┘          └────────────┘
//!       ▲                                  │                    │
//!       └──────────── remote events ───────┘◀──── local ────────┘
//! ```

pub mod bridge;
pub mod bus;
pub mod command;
pub mod connection;
pub mod engine;
pub mod error;
pub mod game;
pub mod lifecycle;
pub mod orchestrator;
pub mod outbox;
pub mod registry;
pub mod repository;
pub mod room;
pub mod runtime;
pub mod scheduler;

pub use scribble_protocol::{
    codec, BusFrame, Envelope, EventType, FrameKind, InstanceId, ProtocolError, RejectReason, RoomId,
    UserId,
};

pub use bridge::{BridgeError, RelayHandle, RoomBridge};
pub use bus::{BusError, LocalBus, PubSub, Subscription};
pub use command::{GameCommand, RoomCommand};
pub use connection::{ConnectionHandle, ConnectionId, Identity, Outbound, SendOutcome};
pub use engine::{CanvasEngine, DrawingEngine, GameEngine, MoveOutcome};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use game::{Game, GameMode, GameSettings, Player, RoundEndReason, SharedGame};
pub use lifecycle::{ConnectionLifecycle, Rejection};
pub use orchestrator::{GameOrchestrator, OrchestratorStats, PlayerQuit, RosterCheck};
pub use outbox::RoomOutbox;
pub use registry::{ConnectionRegistry, RegistryStats};
pub use repository::{InMemoryRoomRepository, RoomRepository};
pub use room::{NewRoom, Room, RoomListing, RoomStatus};
pub use runtime::{Runtime, RuntimeConfig};
pub use scheduler::{RoundEndSignal, RoundScheduler};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::connection::{ConnectionHandle, Identity, Outbound};
    use crate::game::Player;
    use crate::outbox::RoomOutbox;
    use crate::registry::ConnectionRegistry;
    use crate::{codec, Envelope, EventType, RoomId, UserId};

    /// A room with `n` connected users, named `player-0`, `player-1`, ...
    pub struct TestRoom {
        pub room: RoomId,
        pub registry: Arc<ConnectionRegistry>,
        pub outbox: RoomOutbox,
        pub users: Vec<UserId>,
        pub conns: Vec<ConnectionHandle>,
        pub outs: Vec<Outbound>,
    }

    impl TestRoom {
        pub fn new(n: usize) -> Self {
            let room = RoomId::new();
            let registry = Arc::new(ConnectionRegistry::new());
            let mut users = Vec::new();
            let mut conns = Vec::new();
            let mut outs = Vec::new();
            for i in 0..n {
                let user = UserId::new();
                let (conn, out) = ConnectionHandle::new(room, Identity::new(user, format!("player-{i}")), 64);
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

        pub fn players(&self) -> Vec<Player> {
            self.users
                .iter()
                .enumerate()
                .map(|(i, id)| Player::new(*id, format!("player-{i}")))
                .collect()
        }

        /// Everything queued for user `i` so far.
        pub async fn drain(&mut self, i: usize) -> Vec<Envelope> {
            let mut events = Vec::new();
            while let Ok(Some(bytes)) = tokio::time::timeout(Duration::ZERO, self.outs[i].next()).await {
                events.push(codec::decode_envelope(&bytes).expect("valid envelope"));
            }
            events
        }

        pub async fn drain_all(&mut self) -> Vec<Vec<Envelope>> {
            let mut all = Vec::new();
            for i in 0..self.outs.len() {
                all.push(self.drain(i).await);
            }
            all
        }
    }

    pub fn event_types(events: &[Envelope]) -> Vec<EventType> {
        events.iter().map(|e| e.event).collect()
    }
}
