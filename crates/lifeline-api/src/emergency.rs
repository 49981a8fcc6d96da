use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use lifeline_types::api::{Claims, RaiseEmergencyRequest, RaiseEmergencyResponse};

use crate::AppState;

/// The emergency button. Escalation and recipient policy live in the
/// dispatcher; this handler only shapes the response.
pub async fn raise_emergency(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RaiseEmergencyRequest>,
) -> impl IntoResponse {
    let outcome = match state
        .dispatcher
        .raise_emergency(claims.sub, req.message, req.location)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return crate::dispatch_error_response(e).into_response(),
    };

    let recipients: Vec<Uuid> = outcome.matches.iter().map(|m| m.provider_id).collect();
    let notice = if recipients.is_empty() {
        Some(
            "No providers are currently available nearby. Your alert has been recorded \
             and providers will see it as they come online."
                .to_string(),
        )
    } else {
        None
    };

    info!(
        "User {} raised emergency {} ({} recipients, {} live)",
        claims.sub,
        outcome.alert.id,
        recipients.len(),
        outcome.delivered_live
    );

    (
        StatusCode::CREATED,
        Json(RaiseEmergencyResponse {
            alert_id: outcome.alert.id,
            recipient_count: recipients.len(),
            recipients,
            notice,
        }),
    )
        .into_response()
}
