use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use lifeline_types::api::{Claims, UpdateLocationRequest};
use lifeline_types::models::Coordinate;

use crate::{AppState, error_body};

/// Record the caller's last-known location. Emergencies without an explicit
/// override fall back to this.
pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateLocationRequest>,
) -> impl IntoResponse {
    let coord = Coordinate { lat: req.lat, lon: req.lon };
    if lifeline_geo::validate(coord).is_err() {
        return (
            StatusCode::BAD_REQUEST,
            error_body("That location looks invalid. Please re-enter it."),
        )
            .into_response();
    }

    let db = state.db.clone();
    let id = claims.sub.to_string();
    match tokio::task::spawn_blocking(move || db.set_user_location(&id, req.lat, req.lon)).await {
        Ok(Ok(true)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Ok(false)) => (StatusCode::NOT_FOUND, error_body("Account not found.")).into_response(),
        Ok(Err(e)) => {
            error!("Location update failed: {:#}", e);
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
