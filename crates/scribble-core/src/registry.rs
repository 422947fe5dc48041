//! Connection registry.
//!
//! Maps `(room, user)` to the live connection for that pair. All sends are
//! non-blocking: a full outbound queue drops the payload for that recipient
//! and the caller moves on.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

use crate::connection::{ConnectionHandle, Identity, SendOutcome};
use crate::{RoomId, UserId};

#[derive(Debug, Default)]
struct RoomConnections {
    members: HashMap<UserId, ConnectionHandle>,
}

/// Outcome of [`ConnectionRegistry::register`].
#[derive(Debug)]
pub struct Registration {
    /// Previous connection for the same user, already closed.
    pub evicted: Option<ConnectionHandle>,
    /// Whether the room had no connections before this one.
    pub first_in_room: bool,
}

/// Outcome of [`ConnectionRegistry::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unregistration {
    /// The connection was the registered one for its user and is now gone.
    /// `false` for connections that were already evicted.
    pub removed: bool,
    /// The room has no connections left.
    pub room_emptied: bool,
}

/// Registry of live connections, grouped by room.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    rooms: DashMap<RoomId, RoomConnections>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a connection, evicting any previous one for the same user.
    pub fn register(&self, conn: ConnectionHandle) -> Registration {
        let room = conn.room_id();
        let user = conn.user_id();

        let (evicted, first_in_room) = {
            let mut entry = self.rooms.entry(room).or_default();
            let first = entry.members.is_empty();
            (entry.members.insert(user, conn.clone()), first)
        };

        if let Some(old) = &evicted {
            old.close();
            debug!(room = %room, user = %user, old = %old.id(), new = %conn.id(), "Evicted previous connection");
        }
        debug!(room = %room, user = %user, connection = %conn.id(), "Connection registered");

        Registration {
            evicted,
            first_in_room,
        }
    }

    /// Remove a connection if it is still the registered one for its user.
    pub fn unregister(&self, conn: &ConnectionHandle) -> Unregistration {
        let room = conn.room_id();
        let user = conn.user_id();

        let (removed, empty) = match self.rooms.get_mut(&room) {
            Some(mut entry) => {
                let current = entry.members.get(&user).is_some_and(|c| c.id() == conn.id());
                if current {
                    entry.members.remove(&user);
                }
                (current, entry.members.is_empty())
            }
            None => (false, true),
        };

        let room_emptied = removed
            && empty
            && self
                .rooms
                .remove_if(&room, |_, r| r.members.is_empty())
                .is_some();

        if removed {
            debug!(room = %room, user = %user, connection = %conn.id(), room_emptied, "Connection unregistered");
        }

        Unregistration {
            removed,
            room_emptied,
        }
    }

    /// Send to one user. Returns `true` if the payload was queued.
    pub fn send(&self, room: RoomId, user: UserId, payload: Bytes) -> bool {
        let conn = self
            .rooms
            .get(&room)
            .and_then(|r| r.members.get(&user).cloned());
        match conn {
            Some(conn) => self.deliver(&conn, payload),
            None => {
                trace!(room = %room, user = %user, "Send to absent user");
                false
            }
        }
    }

    /// Send to every connection in the room. Returns the number queued.
    pub fn broadcast(&self, room: RoomId, payload: Bytes) -> usize {
        self.fan_out(room, None, payload)
    }

    /// Send to every connection in the room except `excluded`.
    pub fn broadcast_except(&self, room: RoomId, excluded: UserId, payload: Bytes) -> usize {
        self.fan_out(room, Some(excluded), payload)
    }

    fn fan_out(&self, room: RoomId, excluded: Option<UserId>, payload: Bytes) -> usize {
        let targets: Vec<ConnectionHandle> = match self.rooms.get(&room) {
            Some(r) => r
                .members
                .iter()
                .filter(|(user, _)| Some(**user) != excluded)
                .map(|(_, conn)| conn.clone())
                .collect(),
            None => return 0,
        };

        let count = targets
            .iter()
            .filter(|conn| self.deliver(conn, payload.clone()))
            .count();
        trace!(room = %room, recipients = count, "Broadcast");
        count
    }

    fn deliver(&self, conn: &ConnectionHandle, payload: Bytes) -> bool {
        match conn.try_send(payload) {
            SendOutcome::Queued => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            SendOutcome::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    room = %conn.room_id(),
                    user = %conn.user_id(),
                    connection = %conn.id(),
                    "Outbound queue full, message dropped"
                );
                false
            }
            SendOutcome::Closed => {
                trace!(connection = %conn.id(), "Send to closed connection");
                false
            }
        }
    }

    /// Close a user's connection in a room. Unregistration follows from the
    /// transport side.
    pub fn close_user(&self, room: RoomId, user: UserId) -> bool {
        let conn = self
            .rooms
            .get(&room)
            .and_then(|r| r.members.get(&user).cloned());
        match conn {
            Some(conn) => {
                conn.close();
                debug!(room = %room, user = %user, connection = %conn.id(), "Connection closed by server");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_connected(&self, room: RoomId, user: UserId) -> bool {
        self.rooms
            .get(&room)
            .is_some_and(|r| r.members.contains_key(&user))
    }

    /// Number of connections in a room.
    #[must_use]
    pub fn room_size(&self, room: RoomId) -> usize {
        self.rooms.get(&room).map(|r| r.members.len()).unwrap_or(0)
    }

    /// Connected identities in connection order, oldest first.
    #[must_use]
    pub fn members(&self, room: RoomId) -> Vec<Identity> {
        let mut conns: Vec<ConnectionHandle> = self
            .rooms
            .get(&room)
            .map(|r| r.members.values().cloned().collect())
            .unwrap_or_default();
        conns.sort_by_key(ConnectionHandle::id);
        conns.iter().map(|c| c.identity().clone()).collect()
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            connection_count: self.rooms.iter().map(|r| r.members.len()).sum(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub room_count: usize,
    pub connection_count: usize,
    /// Payloads queued since start.
    pub delivered: u64,
    /// Payloads dropped on full queues since start.
    pub dropped: u64,
}
