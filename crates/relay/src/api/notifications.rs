use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use reelcircle_common::types::Notification;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, ApiState};
use crate::{auth::middleware::AuthenticatedUser, store::notifications::DEFAULT_NOTIFICATION_PAGE};

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/v1/notifications", get(list_notifications))
        .route("/v1/notifications/read-all", put(mark_all_read))
        .route("/v1/notifications/{id}", put(mark_read).delete(delete_notification))
}

#[derive(Debug, Default, Deserialize)]
struct ListNotificationsQuery {
    #[serde(default)]
    unread_only: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct NotificationsEnvelope {
    pub(crate) items: Vec<Notification>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct NotificationEnvelope {
    pub(crate) notification: Notification,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MarkAllReadEnvelope {
    pub(crate) updated: u64,
}

async fn list_notifications(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<NotificationsEnvelope>, ApiError> {
    let items = state
        .store
        .list_notifications(user.user_id, query.unread_only, DEFAULT_NOTIFICATION_PAGE)
        .await?;
    Ok(Json(NotificationsEnvelope { items }))
}

async fn mark_read(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<NotificationEnvelope>, ApiError> {
    let notification = state.store.mark_notification_read(notification_id, user.user_id).await?;
    Ok(Json(NotificationEnvelope { notification }))
}

async fn mark_all_read(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<MarkAllReadEnvelope>, ApiError> {
    let updated = state.store.mark_all_notifications_read(user.user_id).await?;
    Ok(Json(MarkAllReadEnvelope { updated }))
}

async fn delete_notification(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_notification(notification_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
