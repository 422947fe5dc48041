//! Connection handlers for Scribble server.
//!
//! This module wires the HTTP routes and runs the per-socket read and write
//! pumps around the core's connection lifecycle.

use crate::config::{Config, HeartbeatConfig};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::rooms::{self, caller, ApiError};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use scribble_core::{
    ConnectionHandle, Identity, InMemoryRoomRepository, LocalBus, Outbound, PubSub, RoomId, RoomRepository, Runtime,
};
use scribble_protocol::codec;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, error, info, warn};

/// How often core counters are copied into the metrics registry.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// The game core.
    pub runtime: Runtime,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with an in-process bus and room store.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        let bus: Arc<dyn PubSub> = Arc::new(LocalBus::new());
        let repository: Arc<dyn RoomRepository> = Arc::new(InMemoryRoomRepository::new());
        let runtime = Runtime::start(config.runtime(), bus, repository);
        Arc::new(Self { runtime, config })
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_route = state.config.ws_route();
    Router::new()
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/:room_id/join", post(rooms::join_room))
        .route("/rooms/:room_id/leave", post(rooms::leave_room))
        .route("/rooms/:room_id/mode", put(rooms::update_mode))
        .route(&ws_route, get(ws_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = AppState::new(config.clone());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        spawn_stats_sampler(state.clone());
    }

    let app = router(state.clone());

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Scribble server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.ws_route());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.runtime.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

fn spawn_stats_sampler(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        loop {
            ticker.tick().await;
            metrics::record_core_stats(
                &state.runtime.registry.stats(),
                &state.runtime.orchestrator.stats(),
            );
        }
    })
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let identity = caller(&headers)?;
    let max = state.config.limits.max_message_size;
    Ok(ws
        .max_message_size(max)
        .on_upgrade(move |socket| handle_websocket(socket, state, room_id, identity)))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, room: RoomId, identity: Identity) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let user = identity.user_id;
    let (mut sender, receiver) = socket.split();

    let (conn, outbound) = match state.runtime.lifecycle.connect(room, identity).await {
        Ok(pair) => pair,
        Err(rejection) => {
            info!(room = %room, user = %user, reason = rejection.reason.as_str(), "Connection rejected");
            if let Some(text) = codec::encode_envelope(&rejection.envelope(room))
                .ok()
                .and_then(|payload| String::from_utf8(payload.to_vec()).ok())
            {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    debug!(room = %room, user = %user, connection = %conn.id(), "WebSocket connected");

    let heartbeat = state.config.heartbeat.clone();
    let mut send_task = pusher_loop(outbound, sender, heartbeat.clone());
    let mut recv_task = reader_loop(
        receiver,
        state.clone(),
        conn.clone(),
        heartbeat.pong_timeout(),
    );

    // Whichever side ends first takes the other down with it.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.runtime.lifecycle.disconnect(&conn).await;
    debug!(room = %room, user = %user, connection = %conn.id(), "WebSocket disconnected");
}

/// Drain the connection's outbound queue into the socket and keep it alive
/// with pings.
fn pusher_loop(
    mut outbound: Outbound,
    mut sender: SplitSink<WebSocket, Message>,
    heartbeat: HeartbeatConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = heartbeat.ping_interval();
        let mut ping = interval_at(Instant::now() + period, period);
        loop {
            let message = tokio::select! {
                payload = outbound.next() => match payload {
                    Some(payload) => match String::from_utf8(payload.to_vec()) {
                        Ok(text) => {
                            metrics::record_message(text.len(), "outbound");
                            Message::Text(text)
                        }
                        Err(_) => {
                            warn!("Dropping non-UTF-8 outbound payload");
                            continue;
                        }
                    },
                    None => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = ping.tick() => Message::Ping(Vec::new()),
            };

            match timeout(heartbeat.write_timeout(), sender.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(error = %e, "WebSocket write failed");
                    break;
                }
                Err(_) => {
                    warn!("WebSocket write timed out");
                    metrics::record_error("write_timeout");
                    break;
                }
            }
        }
    })
}

/// Feed inbound text frames to the lifecycle until the peer goes away,
/// sends an oversized frame or misses the pong deadline.
fn reader_loop(
    mut receiver: SplitStream<WebSocket>,
    state: Arc<AppState>,
    conn: ConnectionHandle,
    pong_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let max = state.config.limits.max_message_size;
        loop {
            let msg = match timeout(pong_timeout, receiver.next()).await {
                Err(_) => {
                    info!(connection = %conn.id(), "Pong deadline missed");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!(connection = %conn.id(), error = %e, "WebSocket error");
                    metrics::record_error("websocket");
                    break;
                }
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                Message::Text(text) => {
                    if text.len() > max {
                        warn!(connection = %conn.id(), size = text.len(), max, "Inbound message too large");
                        metrics::record_error("message_too_large");
                        break;
                    }
                    metrics::record_message(text.len(), "inbound");
                    state.runtime.lifecycle.handle_text(&conn, &text).await;
                }
                Message::Binary(data) => {
                    debug!(connection = %conn.id(), size = data.len(), "Ignoring binary frame");
                }
                // Pongs only need to reset the deadline; pings are answered by axum.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => {
                    debug!(connection = %conn.id(), "Received close frame");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_router_builds_with_default_config() {
        let state = AppState::new(Config::default());
        let _app = router(state.clone());
        assert_eq!(state.config.ws_route(), "/ws/:room_id");
        state.runtime.shutdown();
    }

    #[tokio::test]
    async fn test_health() {
        let response = health_handler().await.into_response();
        assert!(response.status().is_success());
    }
}
