use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::db::{Message, MessageRepository, Room, RoomKind, RoomRepository, User, UserRepository};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct StartDirectRequest {
    pub recipient_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommunityRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ParticipantSummary {
    pub id: i64,
    pub username: String,
    pub full_name: String,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    #[serde(flatten)]
    pub room: Room,
    pub participants: Vec<ParticipantSummary>,
    pub unread_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct GetMessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub before: Option<i64>, // Message id cursor for pagination
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message: String,
    pub read_count: usize,
}

async fn room_response(
    state: &AppState,
    room: Room,
    viewer: &User,
) -> Result<RoomResponse, AppError> {
    let participants = RoomRepository::participants(&state.db, room.id)
        .await?
        .into_iter()
        .map(|u| ParticipantSummary {
            id: u.id,
            username: u.username,
            full_name: u.full_name,
        })
        .collect();
    let unread_count = MessageRepository::unread_count(&state.db, room.id, viewer.id).await?;

    Ok(RoomResponse {
        room,
        participants,
        unread_count,
    })
}

async fn require_participant(state: &AppState, user: &User, room_id: i64) -> Result<(), AppError> {
    if RoomRepository::is_participant(&state.db, user.id, room_id).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden("You are not a member of this chat room".to_string()))
    }
}

/// POST /api/chat/start-direct/ (requires auth)
pub async fn start_direct(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<StartDirectRequest>,
) -> Result<Json<RoomResponse>, AppError> {
    let recipient = UserRepository::get_by_id(&state.db, req.recipient_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::NotFound("Recipient not found".to_string()))?;

    if !UserRepository::has_accepted_connection(&state.db, user.id, recipient.id).await? {
        return Err(AppError::Forbidden(
            "An accepted connection is required to start a chat".to_string(),
        ));
    }

    let room =
        RoomRepository::find_or_create_direct_room(&state.db, user.id, recipient.id).await?;
    tracing::info!(
        room_id = room.id,
        user_id = user.id,
        recipient_id = recipient.id,
        "direct room ready"
    );

    Ok(Json(room_response(&state, room, &user).await?))
}

/// GET /api/chat/community/ (requires auth)
pub async fn list_community(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<RoomResponse>>, AppError> {
    let rooms = RoomRepository::list_by_kind(&state.db, RoomKind::Community).await?;

    let mut response = Vec::with_capacity(rooms.len());
    for room in rooms {
        response.push(room_response(&state, room, &user).await?);
    }
    Ok(Json(response))
}

/// POST /api/chat/community/ (requires auth)
pub async fn create_community(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateCommunityRequest>,
) -> Result<(StatusCode, Json<RoomResponse>), AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("A name is required for a community chat".to_string()));
    }

    let room = RoomRepository::create_community_room(&state.db, name, user.id).await?;
    tracing::info!(room_id = room.id, user_id = user.id, "community room created");

    Ok((StatusCode::CREATED, Json(room_response(&state, room, &user).await?)))
}

/// GET /api/chat/rooms/ (requires auth)
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<RoomResponse>>, AppError> {
    let rooms = RoomRepository::list_for_user(&state.db, user.id).await?;

    let mut response = Vec::with_capacity(rooms.len());
    for room in rooms {
        response.push(room_response(&state, room, &user).await?);
    }
    Ok(Json(response))
}

/// GET /api/chat/:room_id/messages/ (requires auth)
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(room_id): Path<i64>,
    Query(query): Query<GetMessagesQuery>,
) -> Result<Json<Vec<Message>>, AppError> {
    require_participant(&state, &user, room_id).await?;

    let limit = query.limit.clamp(1, 100);
    let messages = MessageRepository::get_page(&state.db, room_id, query.before, limit).await?;

    Ok(Json(messages))
}

/// POST /api/chat/:room_id/mark-read/ (requires auth)
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(room_id): Path<i64>,
) -> Result<Json<MarkReadResponse>, AppError> {
    require_participant(&state, &user, room_id).await?;

    let receipts = state.dispatcher.mark_room_read(&user, room_id).await?;

    Ok(Json(MarkReadResponse {
        message: format!("Marked {} messages as read", receipts.len()),
        read_count: receipts.len(),
    }))
}

/// GET /api/chat/unread-counts/ (requires auth)
pub async fn unread_counts(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<BTreeMap<i64, i64>>, AppError> {
    let counts = MessageRepository::unread_counts_for_user(&state.db, user.id).await?;
    Ok(Json(counts.into_iter().collect()))
}
