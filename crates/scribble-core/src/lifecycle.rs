//! Connection admission, inbound message handling and teardown.
//!
//! The transport layer accepts a socket, calls [`ConnectionLifecycle::connect`]
//! and, if admitted, pumps the returned [`Outbound`] to the socket while
//! feeding inbound text to [`ConnectionLifecycle::handle_text`]. When the
//! socket ends, for any reason, it calls [`ConnectionLifecycle::disconnect`].

use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::RoomBridge;
use crate::command::RoomCommand;
use crate::connection::{ConnectionHandle, Identity, Outbound, SendOutcome};
use crate::orchestrator::{GameOrchestrator, PlayerQuit, RosterCheck};
use crate::outbox::RoomOutbox;
use crate::registry::ConnectionRegistry;
use crate::repository::RoomRepository;
use crate::{codec, Envelope, EventType, RejectReason, RoomId};

/// Why a connection was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {message}")]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    #[must_use]
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// Error notice sent to the client before the socket is closed.
    #[must_use]
    pub fn envelope(&self, room: RoomId) -> Envelope {
        Envelope::error(room, self.reason, self.message.clone())
    }
}

/// Connection lifecycle manager.
pub struct ConnectionLifecycle {
    repository: Arc<dyn RoomRepository>,
    registry: Arc<ConnectionRegistry>,
    bridge: Arc<RoomBridge>,
    outbox: RoomOutbox,
    orchestrator: Arc<GameOrchestrator>,
    commands: mpsc::Sender<RoomCommand>,
    quits: mpsc::Sender<PlayerQuit>,
    send_buffer: usize,
}

impl ConnectionLifecycle {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        repository: Arc<dyn RoomRepository>,
        registry: Arc<ConnectionRegistry>,
        bridge: Arc<RoomBridge>,
        outbox: RoomOutbox,
        orchestrator: Arc<GameOrchestrator>,
        commands: mpsc::Sender<RoomCommand>,
        quits: mpsc::Sender<PlayerQuit>,
        send_buffer: usize,
    ) -> Self {
        Self {
            repository,
            registry,
            bridge,
            outbox,
            orchestrator,
            commands,
            quits,
            send_buffer,
        }
    }

    /// Admit a connection to a room.
    ///
    /// Room members are admitted while no game runs; during a game only
    /// players on its roster get back in, and they receive the game state
    /// first.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] for non-members, for outsiders while a game
    /// is running and when the repository fails.
    pub async fn connect(&self, room: RoomId, identity: Identity) -> Result<(ConnectionHandle, Outbound), Rejection> {
        let user = identity.user_id;

        match self.repository.is_room_member(room, user).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(room = %room, user = %user, "Connection refused, not a room member");
                return Err(Rejection::new(
                    RejectReason::NotRoomMember,
                    "join the room before connecting",
                ));
            }
            Err(e) => {
                warn!(room = %room, user = %user, error = %e, "Membership check failed");
                return Err(Rejection::new(RejectReason::Internal, e.to_string()));
            }
        }
        if let Ok(stored) = self.repository.get_room(room).await {
            self.orchestrator.ensure_settings(room, stored.game_mode_id);
        }

        let roster = self.orchestrator.check_roster(room, user).await;
        if roster == RosterCheck::NotMember {
            debug!(room = %room, user = %user, "Connection refused, game in progress");
            return Err(Rejection::new(
                RejectReason::GameInProgressNotMember,
                "a game is in progress and you are not playing in it",
            ));
        }

        let username = identity.username.clone();
        let (conn, outbound) = ConnectionHandle::new(room, identity, self.send_buffer);

        // Queued before registration so it precedes any room broadcast.
        let greeting = match &roster {
            RosterCheck::Member(snapshot) => Envelope::new(
                EventType::GameStatus,
                json!({"room_id": room, "game": snapshot}),
            ),
            _ => self.waiting_status(room, &conn),
        };
        if let Ok(payload) = codec::encode_envelope(&greeting) {
            if conn.try_send(payload) != SendOutcome::Queued {
                warn!(connection = %conn.id(), "Could not queue greeting");
            }
        }

        let registration = self.registry.register(conn.clone());
        if let Some(old) = &registration.evicted {
            info!(room = %room, user = %user, old = %old.id(), "Replaced previous connection");
        }
        if let Err(e) = self.bridge.subscribe(room).await {
            warn!(room = %room, error = %e, "Room subscription failed, serving local connections only");
        }

        if matches!(roster, RosterCheck::Member(_)) {
            info!(room = %room, user = %user, "Player reconnected");
            self.outbox.broadcast(
                room,
                &Envelope::new(
                    EventType::PlayerReconnected,
                    json!({
                        "room_id": room,
                        "user_id": user,
                        "username": username,
                        "message": format!("{username} is back"),
                    }),
                ),
            );
        } else {
            info!(room = %room, user = %user, connection = %conn.id(), "Connection admitted");
        }

        Ok((conn, outbound))
    }

    fn waiting_status(&self, room: RoomId, conn: &ConnectionHandle) -> Envelope {
        let mut players: Vec<_> = self
            .registry
            .members(room)
            .into_iter()
            .filter(|p| p.user_id != conn.user_id())
            .map(|p| json!({"user_id": p.user_id, "username": p.username}))
            .collect();
        players.push(json!({"user_id": conn.user_id(), "username": conn.identity().username}));

        Envelope::new(
            EventType::RoomStatus,
            json!({
                "room_id": room,
                "state": "waiting",
                "settings": self.orchestrator.settings(room),
                "players": players,
            }),
        )
    }

    /// Handle one inbound text frame from a connection.
    pub async fn handle_text(&self, conn: &ConnectionHandle, text: &str) {
        let room = conn.room_id();
        let envelope = match codec::decode_envelope(text.as_bytes()) {
            Ok(env) => env,
            Err(e) => {
                debug!(connection = %conn.id(), error = %e, "Undecodable message");
                self.notify(conn, RejectReason::InvalidMessage, e.to_string());
                return;
            }
        };

        match RoomCommand::from_envelope(room, Some(conn.user_id()), &envelope) {
            Ok(cmd) => {
                if self.commands.send(cmd).await.is_err() {
                    warn!(room = %room, "Orchestrator inbox closed");
                }
            }
            Err(e) => {
                let reason = match envelope.event {
                    EventType::GameModeChange => RejectReason::UnknownMode,
                    EventType::GameSettingsUpdate => RejectReason::InvalidSettings,
                    _ => RejectReason::InvalidMessage,
                };
                debug!(connection = %conn.id(), event = %envelope.event, error = %e, "Rejected message");
                self.notify(conn, reason, e.to_string());
            }
        }
    }

    fn notify(&self, conn: &ConnectionHandle, reason: RejectReason, message: String) {
        if let Ok(payload) = codec::encode_envelope(&Envelope::error(conn.room_id(), reason, message)) {
            conn.try_send(payload);
        }
    }

    /// Tear down a connection after its transport ended.
    pub async fn disconnect(&self, conn: &ConnectionHandle) {
        conn.close();
        let room = conn.room_id();
        let outcome = self.registry.unregister(conn);
        if !outcome.removed {
            // Already replaced by a newer connection for the same user.
            return;
        }

        let quit = PlayerQuit {
            room_id: room,
            user_id: conn.user_id(),
        };
        if let Err(e) = self.quits.try_send(quit) {
            let quit = match e {
                mpsc::error::TrySendError::Full(q) | mpsc::error::TrySendError::Closed(q) => q,
            };
            debug!(room = %room, "Quit queue unavailable, handling inline");
            self.orchestrator
                .handle_player_quit(quit.room_id, quit.user_id)
                .await;
        }

        if outcome.room_emptied {
            self.bridge.release(room);
            self.orchestrator.forget_room(room);
        }
        info!(room = %room, user = %conn.user_id(), connection = %conn.id(), "Connection closed");
    }
}
