//! # Notification Handlers

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
};
use uuid::Uuid;

use crate::auth::{UserHeader, UserId};
use crate::error::{ApiError, not_found};
use crate::handlers::types::{
    NotificationView, NotificationsQuery, UnreadCountResponse, UpdatedCountResponse,
};
use crate::server::AppState;

/// List the caller's notifications, newest first
#[utoipa::path(
    get,
    path = "/notifications",
    params(NotificationsQuery, UserHeader),
    responses(
        (status = 200, description = "Notifications", body = [NotificationView]),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError)
    ),
    tag = "notifications"
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    query: Result<Query<NotificationsQuery>, QueryRejection>,
) -> Result<Json<Vec<NotificationView>>, ApiError> {
    let Query(query) = query?;
    let notifications = state
        .notifications
        .get_notifications(user_id, query.unread_only)
        .await?
        .into_iter()
        .map(NotificationView::from)
        .collect();
    Ok(Json(notifications))
}

#[utoipa::path(
    get,
    path = "/notifications/unread-count",
    params(UserHeader),
    responses(
        (status = 200, description = "Unread notification count", body = UnreadCountResponse),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError)
    ),
    tag = "notifications"
)]
pub async fn unread_count(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let count = state.notifications.get_unread_count(user_id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

#[utoipa::path(
    post,
    path = "/notifications/{id}/read",
    params(
        ("id" = Uuid, Path, description = "Notification ID"),
        UserHeader
    ),
    responses(
        (status = 204, description = "Marked as read"),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError),
        (status = 404, description = "No such notification for this user", body = ApiError)
    ),
    tag = "notifications"
)]
pub async fn mark_read(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.notifications.mark_as_read(user_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Notification not found"))
    }
}

#[utoipa::path(
    post,
    path = "/notifications/read-all",
    params(UserHeader),
    responses(
        (status = 200, description = "Notifications marked as read", body = UpdatedCountResponse),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError)
    ),
    tag = "notifications"
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<UpdatedCountResponse>, ApiError> {
    let updated = state.notifications.mark_all_as_read(user_id).await?;
    Ok(Json(UpdatedCountResponse { updated }))
}

#[utoipa::path(
    delete,
    path = "/notifications/{id}",
    params(
        ("id" = Uuid, Path, description = "Notification ID"),
        UserHeader
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 401, description = "Missing or invalid X-User-Id", body = ApiError),
        (status = 404, description = "No such notification for this user", body = ApiError)
    ),
    tag = "notifications"
)]
pub async fn delete_notification(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.notifications.delete(user_id, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Notification not found"))
    }
}
