//! Outgoing events for a room.
//!
//! Encodes an envelope once, delivers it to local connections and, for
//! room-wide events, queues a relay so other instances deliver it to theirs.
//! Nothing here awaits, so it is safe to call while holding a game lock.

use std::sync::Arc;
use tracing::warn;

use crate::bridge::RelayHandle;
use crate::registry::ConnectionRegistry;
use crate::{codec, Envelope, RoomId, UserId};

/// Room event sender used by engines and the orchestrator.
#[derive(Debug, Clone)]
pub struct RoomOutbox {
    registry: Arc<ConnectionRegistry>,
    relay: Option<RelayHandle>,
}

impl RoomOutbox {
    /// Outbox that only reaches this instance's connections.
    #[must_use]
    pub fn local(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            relay: None,
        }
    }

    /// Outbox that also mirrors room-wide events over the bus.
    #[must_use]
    pub fn relayed(registry: Arc<ConnectionRegistry>, relay: RelayHandle) -> Self {
        Self {
            registry,
            relay: Some(relay),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send to one user.
    ///
    /// Direct sends are not relayed: a user holds at most one live
    /// connection per room, and it belongs to whichever instance accepted it.
    pub fn send_to(&self, room: RoomId, user: UserId, event: &Envelope) -> bool {
        match codec::encode_envelope(event) {
            Ok(payload) => self.registry.send(room, user, payload),
            Err(e) => {
                warn!(room = %room, event = %event.event, error = %e, "Failed to encode event");
                false
            }
        }
    }

    /// Send to everyone in the room.
    pub fn broadcast(&self, room: RoomId, event: &Envelope) -> usize {
        self.fan_out(room, None, event)
    }

    /// Send to everyone in the room except `excluded`.
    pub fn broadcast_except(&self, room: RoomId, excluded: UserId, event: &Envelope) -> usize {
        self.fan_out(room, Some(excluded), event)
    }

    fn fan_out(&self, room: RoomId, excluded: Option<UserId>, event: &Envelope) -> usize {
        let payload = match codec::encode_envelope(event) {
            Ok(p) => p,
            Err(e) => {
                warn!(room = %room, event = %event.event, error = %e, "Failed to encode event");
                return 0;
            }
        };
        let delivered = match excluded {
            Some(user) => self.registry.broadcast_except(room, user, payload),
            None => self.registry.broadcast(room, payload),
        };
        if let Some(relay) = &self.relay {
            relay.relay(room, excluded, event);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionHandle, Identity};
    use crate::EventType;

    #[tokio::test]
    async fn test_direct_and_room_sends() {
        let registry = Arc::new(ConnectionRegistry::new());
        let outbox = RoomOutbox::local(registry.clone());
        let room = RoomId::new();
        let (a, b) = (UserId::new(), UserId::new());
        let (ca, mut out_a) = ConnectionHandle::new(room, Identity::anonymous(a), 8);
        let (cb, mut out_b) = ConnectionHandle::new(room, Identity::anonymous(b), 8);
        registry.register(ca);
        registry.register(cb);

        let hello = Envelope::new(EventType::RoomStatus, serde_json::json!({"n": 1}));
        assert!(outbox.send_to(room, a, &hello));
        assert_eq!(outbox.broadcast_except(room, a, &hello), 1);
        assert_eq!(outbox.broadcast(room, &hello), 2);

        let decode = |b: bytes::Bytes| codec::decode_envelope(&b).unwrap();
        assert_eq!(decode(out_a.next().await.unwrap()), hello);
        assert_eq!(decode(out_a.next().await.unwrap()), hello);
        assert_eq!(decode(out_b.next().await.unwrap()), hello);
        assert_eq!(decode(out_b.next().await.unwrap()), hello);
    }

    #[test]
    fn test_send_to_absent_user() {
        let outbox = RoomOutbox::local(Arc::new(ConnectionRegistry::new()));
        let env = Envelope::new(EventType::RoomStatus, serde_json::Value::Null);
        assert!(!outbox.send_to(RoomId::new(), UserId::new(), &env));
    }
}
