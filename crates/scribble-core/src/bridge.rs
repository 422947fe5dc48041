//! Bridge between process-local rooms and their pub/sub topics.
//!
//! While a room has local connections, the bridge holds one subscription to
//! `room:{id}`. Incoming frames are dispatched by kind:
//!
//! - relay frames from other instances are delivered to local connections;
//!   our own relays are ignored since they were delivered before publishing,
//! - announcements are handled by every instance: control events go to the
//!   orchestrator, membership events are delivered locally (a `player_left`
//!   also closes that user's local connection).
//!
//! Outgoing relays are queued without blocking and published by a single
//! background task, so callers holding a game lock never wait on the bus.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::bus::{BusError, PubSub};
use crate::command::RoomCommand;
use crate::registry::ConnectionRegistry;
use crate::{codec, BusFrame, Envelope, EventType, FrameKind, InstanceId, ProtocolError, RoomId, UserId};

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Non-blocking handle for mirroring local broadcasts to other instances.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    instance: InstanceId,
    tx: mpsc::Sender<BusFrame>,
}

impl RelayHandle {
    /// Queue a relay of `event`. Dropped with a warning if the queue is full.
    pub fn relay(&self, room: RoomId, except: Option<UserId>, event: &Envelope) {
        let mut frame = BusFrame::relay(self.instance, room, event.clone());
        frame.except = except;
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(frame) {
            warn!(room = %room, event = %event.event, "Relay queue full, event not mirrored");
        }
    }
}

/// Room pub/sub bridge.
pub struct RoomBridge {
    instance: InstanceId,
    bus: Arc<dyn PubSub>,
    registry: Arc<ConnectionRegistry>,
    commands: mpsc::Sender<RoomCommand>,
    subscriptions: DashMap<RoomId, JoinHandle<()>>,
    relay: RelayHandle,
}

impl RoomBridge {
    /// Create the bridge and start its publisher task.
    #[must_use]
    pub fn spawn(
        instance: InstanceId,
        bus: Arc<dyn PubSub>,
        registry: Arc<ConnectionRegistry>,
        commands: mpsc::Sender<RoomCommand>,
        relay_capacity: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(relay_capacity.max(1));
        tokio::spawn(publish_relays(bus.clone(), rx));

        Arc::new(Self {
            instance,
            bus,
            registry,
            commands,
            subscriptions: DashMap::new(),
            relay: RelayHandle { instance, tx },
        })
    }

    #[must_use]
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    #[must_use]
    pub fn relay_handle(&self) -> RelayHandle {
        self.relay.clone()
    }

    #[must_use]
    pub fn is_subscribed(&self, room: RoomId) -> bool {
        self.subscriptions.contains_key(&room)
    }

    /// Number of rooms with an open subscription.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Open the room's subscription if it is not already open.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus refuses the subscription.
    pub async fn subscribe(self: &Arc<Self>, room: RoomId) -> Result<(), BridgeError> {
        if self.subscriptions.contains_key(&room) {
            return Ok(());
        }

        let mut subscription = self.bus.subscribe(&room.topic()).await?;

        match self.subscriptions.entry(room) {
            Entry::Occupied(_) => {
                trace!(room = %room, "Subscription raced, keeping existing one");
            }
            Entry::Vacant(slot) => {
                let bridge = Arc::clone(self);
                let task = tokio::spawn(async move {
                    while let Some(payload) = subscription.recv().await {
                        bridge.dispatch(room, payload).await;
                    }
                    debug!(room = %room, "Room subscription ended");
                });
                slot.insert(task);
                info!(room = %room, topic = %room.topic(), "Room subscription opened");
            }
        }
        Ok(())
    }

    /// Close the room's subscription if the room has no local connections.
    ///
    /// Returns `true` if a subscription was closed.
    pub fn release(&self, room: RoomId) -> bool {
        let removed = self
            .subscriptions
            .remove_if(&room, |_, _| self.registry.room_size(room) == 0);
        match removed {
            Some((_, task)) => {
                task.abort();
                info!(room = %room, "Room subscription closed");
                true
            }
            None => false,
        }
    }

    /// Publish an announcement that every instance, this one included, handles.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded or published.
    pub async fn announce(&self, room: RoomId, event: Envelope) -> Result<usize, BridgeError> {
        let frame = BusFrame::announce(self.instance, room, event);
        let payload = codec::encode_frame(&frame)?;
        let reached = self.bus.publish(&frame.topic(), payload).await?;
        debug!(room = %room, event = %frame.event.event, reached, "Announced");
        Ok(reached)
    }

    async fn dispatch(&self, room: RoomId, payload: Bytes) {
        let frame = match codec::decode_frame(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room = %room, error = %e, "Undecodable bus frame");
                return;
            }
        };
        if frame.room_id != room {
            warn!(room = %room, frame_room = %frame.room_id, "Frame on wrong topic");
            return;
        }

        match frame.kind {
            FrameKind::Relay if frame.is_from(self.instance) => {
                trace!(room = %room, "Ignoring own relay");
            }
            FrameKind::Relay => self.deliver_local(&frame),
            FrameKind::Announce => self.handle_announcement(frame).await,
        }
    }

    async fn handle_announcement(&self, frame: BusFrame) {
        let room = frame.room_id;

        if frame.event.event.is_control() {
            match RoomCommand::from_envelope(room, None, &frame.event) {
                Ok(cmd) => {
                    if self.commands.send(cmd).await.is_err() {
                        warn!(room = %room, "Orchestrator inbox closed");
                    }
                }
                Err(e) => warn!(room = %room, error = %e, "Invalid control announcement"),
            }
            return;
        }

        if frame.event.event == EventType::PlayerLeft {
            if let Some(user) = frame
                .event
                .str_field("user_id")
                .and_then(|s| s.parse::<UserId>().ok())
            {
                self.registry.close_user(room, user);
            }
        }

        self.deliver_local(&frame);
    }

    fn deliver_local(&self, frame: &BusFrame) {
        let payload = match codec::encode_envelope(&frame.event) {
            Ok(p) => p,
            Err(e) => {
                warn!(room = %frame.room_id, error = %e, "Failed to encode relayed event");
                return;
            }
        };
        let delivered = match frame.except {
            Some(user) => self.registry.broadcast_except(frame.room_id, user, payload),
            None => self.registry.broadcast(frame.room_id, payload),
        };
        trace!(room = %frame.room_id, event = %frame.event.event, delivered, "Delivered bus event");
    }
}

async fn publish_relays(bus: Arc<dyn PubSub>, mut rx: mpsc::Receiver<BusFrame>) {
    while let Some(frame) = rx.recv().await {
        let payload = match codec::encode_frame(&frame) {
            Ok(p) => p,
            Err(e) => {
                warn!(room = %frame.room_id, error = %e, "Failed to encode relay frame");
                continue;
            }
        };
        if let Err(e) = bus.publish(&frame.topic(), payload).await {
            warn!(room = %frame.room_id, error = %e, "Relay publish failed");
        }
    }
}
