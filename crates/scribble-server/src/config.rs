//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (SCRIBBLE_HOST, SCRIBBLE_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use scribble_core::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Game timing and queue sizes.
    #[serde(default)]
    pub game: GameConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path prefix for the WebSocket endpoint; the room id is appended.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Outbound queue length per connection.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Time allowed without a pong before the connection is dropped.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_ms: u64,

    /// Time allowed for one socket write.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Game configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Seconds a disconnected player keeps their seat.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Bound on waiting for a cancelled round timer to finish.
    #[serde(default = "default_timer_stop_timeout")]
    pub timer_stop_timeout_ms: u64,

    /// Round-end signal queue length.
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,

    /// Inbound command queue length.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("SCRIBBLE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("SCRIBBLE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_send_buffer() -> usize {
    256
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_ping_interval() -> u64 {
    54_000 // 54 seconds
}

fn default_pong_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_grace_period() -> u64 {
    30
}

fn default_timer_stop_timeout() -> u64 {
    500
}

fn default_signal_capacity() -> usize {
    5
}

fn default_inbox_capacity() -> usize {
    1024
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            game: GameConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            send_buffer: default_send_buffer(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            pong_timeout_ms: default_pong_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
            timer_stop_timeout_ms: default_timer_stop_timeout(),
            signal_capacity: default_signal_capacity(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl HeartbeatConfig {
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "scribble.toml",
            "/etc/scribble/scribble.toml",
            "~/.config/scribble/scribble.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    /// Route pattern for the WebSocket endpoint.
    #[must_use]
    pub fn ws_route(&self) -> String {
        format!("{}/:room_id", self.transport.websocket_path.trim_end_matches('/'))
    }

    /// Core settings derived from this configuration.
    #[must_use]
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            send_buffer: self.limits.send_buffer,
            grace_period: Duration::from_secs(self.game.grace_period_secs),
            timer_stop_timeout: Duration::from_millis(self.game.timer_stop_timeout_ms),
            signal_capacity: self.game.signal_capacity,
            inbox_capacity: self.game.inbox_capacity,
            ..RuntimeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.send_buffer, 256);
        assert_eq!(config.heartbeat.ping_interval(), Duration::from_secs(54));
        assert_eq!(config.game.grace_period_secs, 30);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [transport]
            websocket_path = "/play/"

            [game]
            grace_period_secs = 10
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.ws_route(), "/play/:room_id");
        assert_eq!(config.game.inbox_capacity, 1024);

        let runtime = config.runtime();
        assert_eq!(runtime.grace_period, Duration::from_secs(10));
        assert_eq!(runtime.timer_stop_timeout, Duration::from_millis(500));
        assert_eq!(runtime.signal_capacity, 5);
    }
}
