//! Frames carried on the cross-instance pub/sub bus.
//!
//! Each room has one topic. A frame wraps the event with enough routing
//! metadata for a receiving instance to decide whether to relay it, apply it
//! as a control event, or drop it as an echo of its own broadcast.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::Envelope;
use crate::ids::{InstanceId, RoomId, UserId};

/// Current bus protocol version.
pub const BUS_VERSION: Version = Version { major: 1, minor: 0 };

/// Bus protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Incremented on incompatible frame layout changes.
    pub major: u8,
    /// Incremented on additive changes.
    pub minor: u8,
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Frames are understood across minor revisions of the same major.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        BUS_VERSION
    }
}

/// How a receiving instance treats a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Mirror of a broadcast already delivered on the origin instance.
    /// Receivers deliver it to their own connections; the origin ignores it.
    Relay,
    /// Room announcement from outside the game loop (room membership
    /// changes, mode and settings control). Every instance handles it,
    /// the origin included.
    Announce,
}

/// One event published to a room topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusFrame {
    /// Protocol version of the publisher.
    #[serde(default)]
    pub version: Version,
    pub kind: FrameKind,
    /// Instance that published the frame.
    pub origin: InstanceId,
    /// Room the event belongs to.
    pub room_id: RoomId,
    /// User excluded from local delivery, for "everyone but the actor" events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<UserId>,
    /// The event itself.
    pub event: Envelope,
}

impl BusFrame {
    /// Create a relay frame addressed to every member of the room.
    #[must_use]
    pub fn relay(origin: InstanceId, room_id: RoomId, event: Envelope) -> Self {
        Self {
            version: BUS_VERSION,
            kind: FrameKind::Relay,
            origin,
            room_id,
            except: None,
            event,
        }
    }

    /// Create an announcement frame.
    #[must_use]
    pub fn announce(origin: InstanceId, room_id: RoomId, event: Envelope) -> Self {
        Self {
            kind: FrameKind::Announce,
            ..Self::relay(origin, room_id, event)
        }
    }

    /// Whether the receiving instance published this frame itself.
    #[must_use]
    pub fn is_from(&self, instance: InstanceId) -> bool {
        self.origin == instance
    }

    /// Exclude one user from delivery.
    #[must_use]
    pub fn excluding(mut self, user: UserId) -> Self {
        self.except = Some(user);
        self
    }

    /// Topic this frame is published on.
    #[must_use]
    pub fn topic(&self) -> String {
        self.room_id.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    #[test]
    fn test_version_compatibility() {
        let v1_0 = Version::new(1, 0);
        let v1_3 = Version::new(1, 3);
        let v2_0 = Version::new(2, 0);

        assert!(v1_0.is_compatible_with(&v1_3));
        assert!(!v1_0.is_compatible_with(&v2_0));
        assert_eq!(v1_3.to_string(), "1.3");
    }

    #[test]
    fn test_frame_topic_follows_room() {
        let room = RoomId::new();
        let origin = InstanceId::new();
        let frame = BusFrame::announce(
            origin,
            room,
            Envelope::new(EventType::PlayerJoined, serde_json::Value::Null),
        );
        assert_eq!(frame.topic(), room.topic());
        assert_eq!(frame.kind, FrameKind::Announce);
        assert!(frame.is_from(origin));
        assert!(!frame.is_from(InstanceId::new()));
        assert!(frame.except.is_none());

        let user = UserId::new();
        assert_eq!(frame.excluding(user).except, Some(user));
    }
}
