use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use lifeline_types::api::{Claims, InboxItem};
use lifeline_types::models::DeliveryStatus;

use crate::{AppState, error_body};

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// The caller's alert inbox, most recent first, with delivery status.
pub async fn inbox(
    State(state): State<AppState>,
    Query(query): Query<InboxQuery>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    let db = state.db.clone();
    let recipient = claims.sub.to_string();
    let limit = query.limit.min(200);

    let rows = match tokio::task::spawn_blocking(move || db.inbox_for(&recipient, limit)).await {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            error!("Inbox query failed: {:#}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                error_body("Your inbox is temporarily unavailable."),
            )
                .into_response();
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let items: Vec<InboxItem> = rows
        .into_iter()
        .filter_map(|(row, status)| {
            let alert = match row.into_alert() {
                Ok(alert) => alert,
                Err(e) => {
                    warn!("Skipping corrupt alert row in inbox: {}", e);
                    return None;
                }
            };
            let status = DeliveryStatus::parse(&status)?;
            Some(InboxItem {
                alert_id: alert.id,
                kind: alert.kind,
                payload: alert.payload,
                created_at: alert.created_at,
                status,
            })
        })
        .collect();

    Json(items).into_response()
}

/// Acknowledge an alert. Idempotent: re-reading an already-read alert, or
/// one that was never addressed to the caller, changes nothing.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    let db = state.db.clone();
    let id = alert_id.to_string();
    let recipient = claims.sub.to_string();

    match tokio::task::spawn_blocking(move || db.mark_read(&id, &recipient)).await {
        Ok(Ok(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => {
            error!("mark_read failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                error_body("We could not record your request. Please try again."),
            )
                .into_response()
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
