use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::db::{
    Notification, NotificationFilter, NotificationRepository, NotificationSettings,
    NotificationStats, NotificationType, SettingsUpdate, User,
};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub kind: Option<NotificationType>,
    pub is_read: Option<bool>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub notifications: Vec<Notification>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub is_read: bool,
}

#[derive(Debug, Serialize)]
pub struct MarkAllResponse {
    pub updated: u64,
}

fn not_found() -> AppError {
    AppError::NotFound("Notification not found".to_string())
}

/// GET /api/notifications/ (requires auth)
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let filter = NotificationFilter {
        kind: query.kind,
        is_read: query.is_read,
    };

    let (notifications, total) =
        NotificationRepository::list(&state.db, user.id, &filter, page, page_size).await?;

    Ok(Json(ListResponse {
        notifications,
        page,
        page_size,
        total,
    }))
}

/// GET /api/notifications/:id/ (requires auth)
pub async fn detail(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<Notification>, AppError> {
    NotificationRepository::get(&state.db, id, user.id)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

/// PATCH /api/notifications/:id/ (requires auth)
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<Notification>, AppError> {
    NotificationRepository::set_read(&state.db, id, user.id, req.is_read)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

/// DELETE /api/notifications/:id/ (requires auth)
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if NotificationRepository::delete(&state.db, id, user.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

/// POST /api/notifications/mark-all-read/ (requires auth)
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<MarkAllResponse>, AppError> {
    let updated = NotificationRepository::mark_all_read(&state.db, user.id).await?;
    Ok(Json(MarkAllResponse { updated }))
}

/// GET /api/notifications/stats/ (requires auth)
pub async fn stats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<NotificationStats>, AppError> {
    Ok(Json(NotificationRepository::stats(&state.db, user.id).await?))
}

/// GET /api/notifications/settings/ (requires auth)
pub async fn get_settings(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<NotificationSettings>, AppError> {
    Ok(Json(NotificationRepository::settings(&state.db, user.id).await?))
}

/// PUT /api/notifications/settings/ (requires auth)
pub async fn update_settings(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<NotificationSettings>, AppError> {
    let settings = NotificationRepository::update_settings(&state.db, user.id, &update).await?;
    tracing::debug!(user_id = user.id, "notification settings updated");
    Ok(Json(settings))
}
