//! Live connection handles.
//!
//! A [`ConnectionHandle`] is the core's side of one transport session: a
//! bounded outbound queue plus a `done` signal. The transport side drains the
//! matching [`Outbound`] and stops as soon as `done` fires, whether or not
//! the queue is empty.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::{RoomId, UserId};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier. Increases with connection age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Authenticated identity attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }

    /// Identity with the generated fallback name.
    #[must_use]
    pub fn anonymous(user_id: UserId) -> Self {
        Self::new(user_id, user_id.default_display_name())
    }
}

/// Result of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queue full; the payload was dropped.
    Dropped,
    /// Transport side already gone.
    Closed,
}

/// Core-side handle to one connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    room_id: RoomId,
    identity: Arc<Identity>,
    sender: mpsc::Sender<Bytes>,
    done: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// Create a connection with an outbound queue of `capacity` payloads.
    #[must_use]
    pub fn new(room_id: RoomId, identity: Identity, capacity: usize) -> (Self, Outbound) {
        let (sender, rx) = mpsc::channel(capacity.max(1));
        let (done, done_rx) = watch::channel(false);
        let handle = Self {
            id: ConnectionId::next(),
            room_id,
            identity: Arc::new(identity),
            sender,
            done: Arc::new(done),
        };
        (handle, Outbound { rx, done: done_rx })
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queue a payload without waiting.
    pub fn try_send(&self, payload: Bytes) -> SendOutcome {
        match self.sender.try_send(payload) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Signal the transport side to terminate.
    pub fn close(&self) {
        self.done.send_replace(true);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.done.borrow() || self.sender.is_closed()
    }
}

/// Transport-side end of a connection.
#[derive(Debug)]
pub struct Outbound {
    rx: mpsc::Receiver<Bytes>,
    done: watch::Receiver<bool>,
}

impl Outbound {
    /// Next payload to write, or `None` once the connection is closed.
    pub async fn next(&mut self) -> Option<Bytes> {
        if *self.done.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.done.wait_for(|closed| *closed) => None,
            msg = self.rx.recv() => msg,
        }
    }

    /// Resolves once the connection has been closed from the core side.
    pub async fn closed(&mut self) {
        let _ = self.done.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize) -> (ConnectionHandle, Outbound) {
        ConnectionHandle::new(RoomId::new(), Identity::anonymous(UserId::new()), capacity)
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (conn, mut out) = handle(4);
        assert_eq!(conn.try_send(Bytes::from_static(b"a")), SendOutcome::Queued);
        assert_eq!(out.next().await.unwrap(), Bytes::from_static(b"a"));
    }

    #[test]
    fn test_full_queue_drops() {
        let (conn, _out) = handle(1);
        assert_eq!(conn.try_send(Bytes::from_static(b"1")), SendOutcome::Queued);
        assert_eq!(conn.try_send(Bytes::from_static(b"2")), SendOutcome::Dropped);
    }

    #[test]
    fn test_send_after_transport_gone() {
        let (conn, out) = handle(1);
        drop(out);
        assert_eq!(conn.try_send(Bytes::from_static(b"x")), SendOutcome::Closed);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_stops_outbound_even_with_queued_payloads() {
        let (conn, mut out) = handle(4);
        conn.try_send(Bytes::from_static(b"pending"));
        conn.close();
        assert!(out.next().await.is_none());
        assert!(conn.is_closed());
    }

    #[test]
    fn test_ids_increase() {
        let (a, _) = handle(1);
        let (b, _) = handle(1);
        assert!(b.id() > a.id());
    }
}
