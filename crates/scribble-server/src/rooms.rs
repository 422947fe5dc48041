//! Room lobby endpoints.
//!
//! The caller is identified by the `X-User-Id` header, set by the gateway
//! after authentication. Membership changes are announced on the room topic
//! so every instance serving the room sees them.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use scribble_core::{CoreError, ErrorKind, GameMode, Identity, NewRoom, Room, RoomId, RoomListing, UserId};
use scribble_protocol::{Envelope, EventType};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::handlers::AppState;
use crate::metrics;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USERNAME_HEADER: &str = "x-username";

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, kind.as_str(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            metrics::record_error("http");
        }
        let body = Json(json!({
            "error": self.kind,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

/// Identity of the caller, read from the gateway headers.
///
/// # Errors
///
/// `401` without a user header, `400` when it is not a UUID.
pub fn caller(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let raw = headers.get(USER_ID_HEADER).ok_or_else(|| {
        ApiError::new(
            StatusCode::UNAUTHORIZED,
            ErrorKind::Unauthorized.as_str(),
            "missing X-User-Id header",
        )
    })?;
    let user: UserId = raw
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                ErrorKind::InvalidInput.as_str(),
                "X-User-Id must be a UUID",
            )
        })?;

    let username = headers
        .get(USERNAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|name| !name.is_empty());
    Ok(match username {
        Some(name) => Identity::new(user, name),
        None => Identity::anonymous(user),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub room_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode_id: GameMode,
}

/// `GET /rooms`
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<RoomListing>>, ApiError> {
    let who = caller(&headers)?;
    let rooms = state.runtime.repository.visible_rooms(who.user_id).await?;
    Ok(Json(rooms))
}

/// `POST /rooms`
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<NewRoom>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let who = caller(&headers)?;
    let room = state.runtime.repository.create_room(who.user_id, request).await?;
    debug!(room = %room.id, user = %who.user_id, "Room created over HTTP");
    Ok((StatusCode::CREATED, Json(room)))
}

/// `POST /rooms/:room_id/join`
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    headers: HeaderMap,
    body: Option<Json<JoinRequest>>,
) -> Result<Json<Room>, ApiError> {
    let who = caller(&headers)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let room = state
        .runtime
        .repository
        .join_room(room_id, who.user_id, request.room_code.as_deref())
        .await?;

    announce(
        &state,
        room_id,
        Envelope::new(
            EventType::PlayerJoined,
            json!({
                "room_id": room_id,
                "user_id": who.user_id,
                "username": who.username,
                "current_players": room.current_players,
            }),
        ),
    )
    .await;
    Ok(Json(room))
}

/// `POST /rooms/:room_id/leave`
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let who = caller(&headers)?;
    let room = state.runtime.repository.leave_room(room_id, who.user_id).await?;

    announce(
        &state,
        room_id,
        Envelope::new(
            EventType::PlayerLeft,
            json!({
                "room_id": room_id,
                "user_id": who.user_id,
                "username": who.username,
            }),
        ),
    )
    .await;
    Ok(Json(json!({
        "room_id": room_id,
        "deleted": room.is_none(),
        "room": room,
    })))
}

/// `PUT /rooms/:room_id/mode`
pub async fn update_mode(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    headers: HeaderMap,
    Json(request): Json<ModeRequest>,
) -> Result<Json<Room>, ApiError> {
    let who = caller(&headers)?;
    let room = state
        .runtime
        .repository
        .update_game_mode(room_id, who.user_id, request.mode_id)
        .await?;

    announce(
        &state,
        room_id,
        Envelope::new(
            EventType::GameModeChange,
            json!({"room_id": room_id, "mode_id": request.mode_id}),
        ),
    )
    .await;
    Ok(Json(room))
}

/// The repository change already happened, so a failed announcement is
/// logged rather than reported to the caller.
async fn announce(state: &AppState, room: RoomId, event: Envelope) {
    let kind = event.event;
    if let Err(e) = state.runtime.bridge.announce(room, event).await {
        warn!(room = %room, event = %kind, error = %e, "Failed to announce room change");
        metrics::record_error("announce");
    }
}
