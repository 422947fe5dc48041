//! Wiring of the core components for one server instance.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bridge::RoomBridge;
use crate::bus::PubSub;
use crate::engine::{CanvasEngine, DrawingEngine, GameEngine};
use crate::lifecycle::ConnectionLifecycle;
use crate::orchestrator::{GameOrchestrator, DEFAULT_GRACE_PERIOD};
use crate::outbox::RoomOutbox;
use crate::registry::ConnectionRegistry;
use crate::repository::RoomRepository;
use crate::scheduler::{RoundScheduler, DEFAULT_STOP_TIMEOUT};
use crate::InstanceId;

/// Core tuning knobs.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Outbound queue length per connection.
    pub send_buffer: usize,
    /// How long a disconnected player keeps their seat.
    pub grace_period: Duration,
    /// Bound on waiting for a retiring round timer.
    pub timer_stop_timeout: Duration,
    /// Round-end signal queue length.
    pub signal_capacity: usize,
    /// Room command queue length.
    pub inbox_capacity: usize,
    /// Queue of events waiting to be mirrored on the bus.
    pub relay_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            send_buffer: 256,
            grace_period: DEFAULT_GRACE_PERIOD,
            timer_stop_timeout: DEFAULT_STOP_TIMEOUT,
            signal_capacity: 5,
            inbox_capacity: 1024,
            relay_capacity: 1024,
        }
    }
}

/// Running core for one instance.
pub struct Runtime {
    pub instance: InstanceId,
    pub registry: Arc<ConnectionRegistry>,
    pub bridge: Arc<RoomBridge>,
    pub orchestrator: Arc<GameOrchestrator>,
    pub lifecycle: Arc<ConnectionLifecycle>,
    pub repository: Arc<dyn RoomRepository>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Build every component and start the background tasks.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn start(config: RuntimeConfig, bus: Arc<dyn PubSub>, repository: Arc<dyn RoomRepository>) -> Self {
        let instance = InstanceId::new();
        let registry = Arc::new(ConnectionRegistry::new());

        let (command_tx, command_rx) = mpsc::channel(config.inbox_capacity.max(1));
        let (signal_tx, signal_rx) = mpsc::channel(config.signal_capacity.max(1));
        let (quit_tx, quit_rx) = mpsc::channel(config.inbox_capacity.max(1));

        let bridge = RoomBridge::spawn(
            instance,
            bus,
            registry.clone(),
            command_tx.clone(),
            config.relay_capacity,
        );
        let outbox = RoomOutbox::relayed(registry.clone(), bridge.relay_handle());

        let engines: Vec<Arc<dyn GameEngine>> = vec![
            Arc::new(DrawingEngine::new(outbox.clone())),
            Arc::new(CanvasEngine::new(outbox.clone())),
        ];
        let scheduler = Arc::new(RoundScheduler::new(signal_tx.clone(), config.timer_stop_timeout));
        let orchestrator = GameOrchestrator::new(
            registry.clone(),
            outbox.clone(),
            scheduler,
            engines,
            signal_tx,
            config.grace_period,
        );

        let tasks = vec![
            orchestrator.spawn_signal_listener(signal_rx, quit_rx),
            orchestrator.spawn_command_loop(command_rx),
        ];

        let lifecycle = Arc::new(ConnectionLifecycle::new(
            repository.clone(),
            registry.clone(),
            bridge.clone(),
            outbox,
            orchestrator.clone(),
            command_tx,
            quit_tx,
            config.send_buffer,
        ));

        info!(instance = %instance, grace_secs = config.grace_period.as_secs(), "Core runtime started");

        Self {
            instance,
            registry,
            bridge,
            orchestrator,
            lifecycle,
            repository,
            tasks,
        }
    }

    /// Stop the background tasks.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
        info!(instance = %self.instance, "Core runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::repository::InMemoryRoomRepository;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let bus: Arc<dyn PubSub> = Arc::new(LocalBus::new());
        let rt = Runtime::start(
            RuntimeConfig::default(),
            bus,
            Arc::new(InMemoryRoomRepository::new()),
        );
        assert_eq!(rt.orchestrator.active_games(), 0);
        assert_eq!(rt.registry.stats().connection_count, 0);
        assert_eq!(rt.bridge.instance(), rt.instance);
        rt.shutdown();
    }
}
