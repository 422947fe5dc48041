//! Round timers.
//!
//! At most one timer is live per room. Starting or stopping a timer first
//! retires the previous one: its task is cancelled and joined, waiting at
//! most `stop_timeout` before moving on. A timer that runs out emits one
//! [`RoundEndSignal`]; a cancelled timer emits nothing.

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::game::RoundEndReason;
use crate::RoomId;

/// Default bound on waiting for a retiring timer task.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// Request to end a round, from a timer, a move or a departure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundEndSignal {
    pub room_id: RoomId,
    /// Round the signal refers to; stale signals are ignored by the handler.
    pub round: u32,
    pub reason: RoundEndReason,
}

#[derive(Debug)]
struct TimerHandle {
    round: u32,
    cancel: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// Per-room cancelable round countdowns.
#[derive(Debug)]
pub struct RoundScheduler {
    timers: DashMap<RoomId, TimerHandle>,
    signals: mpsc::Sender<RoundEndSignal>,
    stop_timeout: Duration,
}

impl RoundScheduler {
    #[must_use]
    pub fn new(signals: mpsc::Sender<RoundEndSignal>, stop_timeout: Duration) -> Self {
        Self {
            timers: DashMap::new(),
            signals,
            stop_timeout,
        }
    }

    /// Start the timer for `round`, retiring any earlier timer for the room.
    ///
    /// Returns `false` without starting anything if a timer for a later
    /// round is already live.
    pub async fn start(&self, room: RoomId, round: u32, duration: Duration) -> bool {
        if self.timers.get(&room).is_some_and(|t| t.round > round) {
            debug!(room = %room, round, "Timer for a later round already running");
            return false;
        }
        self.stop(room).await;

        let (cancel, cancel_rx) = oneshot::channel();
        let join = tokio::spawn(countdown(
            RoundEndSignal {
                room_id: room,
                round,
                reason: RoundEndReason::TimeExpired,
            },
            duration,
            self.signals.clone(),
            cancel_rx,
        ));

        // A concurrent start for the same room may have slipped in.
        if let Some(previous) = self.timers.insert(room, TimerHandle { round, cancel, join }) {
            self.retire(room, previous).await;
        }
        debug!(room = %room, round, secs = duration.as_secs(), "Round timer started");
        true
    }

    /// Stop the room's timer. Returns `true` if one was live.
    pub async fn stop(&self, room: RoomId) -> bool {
        match self.timers.remove(&room) {
            Some((_, handle)) => {
                self.retire(room, handle).await;
                true
            }
            None => false,
        }
    }

    /// Stop the room's timer only if it belongs to `round` or earlier.
    pub async fn stop_round(&self, room: RoomId, round: u32) -> bool {
        match self.timers.remove_if(&room, |_, t| t.round <= round) {
            Some((_, handle)) => {
                self.retire(room, handle).await;
                true
            }
            None => false,
        }
    }

    async fn retire(&self, room: RoomId, handle: TimerHandle) {
        let _ = handle.cancel.send(());
        match tokio::time::timeout(self.stop_timeout, handle.join).await {
            Ok(_) => trace!(room = %room, round = handle.round, "Round timer retired"),
            Err(_) => warn!(
                room = %room,
                round = handle.round,
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "Round timer did not exit in time"
            ),
        }
    }

    /// Whether a timer task for the room has not finished yet.
    #[must_use]
    pub fn is_running(&self, room: RoomId) -> bool {
        self.timers.get(&room).is_some_and(|t| !t.join.is_finished())
    }

    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}

async fn countdown(
    signal: RoundEndSignal,
    duration: Duration,
    signals: mpsc::Sender<RoundEndSignal>,
    mut cancel: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = &mut cancel => {
            trace!(room = %signal.room_id, round = signal.round, "Round timer cancelled");
            return;
        }
    }

    // The signal queue may be full; cancellation still wins while waiting.
    tokio::select! {
        sent = signals.send(signal) => {
            if sent.is_err() {
                debug!(room = %signal.room_id, "Round-end listener gone");
            }
        }
        _ = cancel => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (RoundScheduler, mpsc::Receiver<RoundEndSignal>) {
        let (tx, rx) = mpsc::channel(5);
        (RoundScheduler::new(tx, DEFAULT_STOP_TIMEOUT), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_emits_one_signal() {
        let (scheduler, mut rx) = scheduler();
        let room = RoomId::new();
        assert!(scheduler.start(room, 1, Duration::from_secs(60)).await);
        assert!(scheduler.is_running(room));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let signal = rx.recv().await.unwrap();
        assert_eq!(
            signal,
            RoundEndSignal {
                room_id: room,
                round: 1,
                reason: RoundEndReason::TimeExpired
            }
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        assert!(!scheduler.is_running(room));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_suppresses_signal() {
        let (scheduler, mut rx) = scheduler();
        let room = RoomId::new();
        scheduler.start(room, 1, Duration::from_secs(10)).await;
        assert!(scheduler.stop(room).await);
        assert!(!scheduler.stop(room).await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.timer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_retires_previous_timer() {
        let (scheduler, mut rx) = scheduler();
        let room = RoomId::new();
        scheduler.start(room, 1, Duration::from_secs(5)).await;
        scheduler.start(room, 2, Duration::from_secs(10)).await;
        assert_eq!(scheduler.timer_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.recv().await.unwrap().round, 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_start_does_not_replace_later_round() {
        let (scheduler, mut rx) = scheduler();
        let room = RoomId::new();
        scheduler.start(room, 3, Duration::from_secs(10)).await;
        assert!(!scheduler.start(room, 2, Duration::from_secs(1)).await);
        assert!(!scheduler.stop_round(room, 2).await);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rx.recv().await.unwrap().round, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rooms_have_independent_timers() {
        let (scheduler, mut rx) = scheduler();
        let (a, b) = (RoomId::new(), RoomId::new());
        scheduler.start(a, 1, Duration::from_secs(5)).await;
        scheduler.start(b, 1, Duration::from_secs(5)).await;
        scheduler.stop(a).await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(rx.recv().await.unwrap().room_id, b);
        assert!(rx.try_recv().is_err());
    }
}
