//! Metrics collection and export for Scribble.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use scribble_core::{OrchestratorStats, RegistryStats};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "scribble_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "scribble_connections_active";
    pub const MESSAGES_TOTAL: &str = "scribble_messages_total";
    pub const MESSAGES_BYTES: &str = "scribble_messages_bytes";
    pub const MESSAGES_DROPPED: &str = "scribble_messages_dropped_total";
    pub const ROOMS_ACTIVE: &str = "scribble_rooms_active";
    pub const GAMES_ACTIVE: &str = "scribble_games_active";
    pub const GAMES_STARTED: &str = "scribble_games_started_total";
    pub const GAMES_FINISHED: &str = "scribble_games_finished_total";
    pub const ROUNDS_ENDED: &str = "scribble_rounds_ended_total";
    pub const ERRORS_TOTAL: &str = "scribble_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_counter!(
        names::MESSAGES_DROPPED,
        "Outbound messages dropped on full connection queues"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one local connection");
    metrics::describe_gauge!(names::GAMES_ACTIVE, "Games currently running");
    metrics::describe_counter!(names::GAMES_STARTED, "Games started since server start");
    metrics::describe_counter!(names::GAMES_FINISHED, "Games finished since server start");
    metrics::describe_counter!(names::ROUNDS_ENDED, "Rounds ended, by reason");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Publish the core's counters.
pub fn record_core_stats(registry: &RegistryStats, games: &OrchestratorStats) {
    gauge!(names::ROOMS_ACTIVE).set(registry.room_count as f64);
    counter!(names::MESSAGES_DROPPED).absolute(registry.dropped);
    gauge!(names::GAMES_ACTIVE).set(games.active_games as f64);
    counter!(names::GAMES_STARTED).absolute(games.games_started);
    counter!(names::GAMES_FINISHED).absolute(games.games_finished);
    for (reason, count) in games.rounds_by_reason {
        counter!(names::ROUNDS_ENDED, "reason" => reason.as_str()).absolute(count);
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribble_core::RoundEndReason;

    #[test]
    fn test_metrics_guard() {
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_record_core_stats_without_recorder() {
        let registry = RegistryStats {
            room_count: 2,
            connection_count: 5,
            delivered: 40,
            dropped: 1,
        };
        let games = OrchestratorStats {
            active_games: 1,
            games_started: 3,
            games_finished: 2,
            rounds_ended: 7,
            rounds_by_reason: [
                (RoundEndReason::TimeExpired, 4),
                (RoundEndReason::AllGuessed, 2),
                (RoundEndReason::DrawerLeft, 1),
            ],
        };
        record_core_stats(&registry, &games);
    }
}
