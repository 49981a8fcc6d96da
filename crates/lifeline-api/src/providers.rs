use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};

use lifeline_types::api::{Claims, NearbyProvider, NearbyQuery, NearbyResponse};
use lifeline_types::models::Coordinate;

use crate::{AppState, error_body};

/// Nearest active providers of one role, ranked by distance.
pub async fn nearby(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
    Extension(_claims): Extension<Claims>,
) -> impl IntoResponse {
    if !query.role.is_provider() {
        return (
            StatusCode::BAD_REQUEST,
            error_body("Choose a provider role: doctor or pharmacy."),
        )
            .into_response();
    }

    let db = state.db.clone();
    let role = query.role;
    let rows = match tokio::task::spawn_blocking(move || db.list_active_providers(role.as_str()))
        .await
    {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            error!("Provider listing failed: {:#}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                error_body("Provider search is temporarily unavailable."),
            )
                .into_response();
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("Provider search is temporarily unavailable."),
            )
                .into_response();
        }
    };

    let candidates: Vec<_> = rows
        .into_iter()
        .filter_map(|row| match row.into_summary() {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Skipping corrupt provider row: {}", e);
                None
            }
        })
        .collect();

    let origin = Coordinate { lat: query.lat, lon: query.lon };
    let matches = match lifeline_geo::find_nearby(origin, query.radius_km, &candidates) {
        Ok(matches) => matches,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                error_body("That location looks invalid. Please re-enter it."),
            )
                .into_response();
        }
    };

    let providers = matches
        .into_iter()
        .map(|m| NearbyProvider {
            provider_id: m.provider_id,
            // Meter precision is plenty for a provider list.
            distance_km: (m.distance_km * 1000.0).round() / 1000.0,
        })
        .collect();

    Json(NearbyResponse { providers }).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AvailabilityRequest {
    pub available: bool,
}

/// Providers toggle whether they receive dispatches.
pub async fn set_availability(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AvailabilityRequest>,
) -> impl IntoResponse {
    if !claims.role.is_provider() {
        return (
            StatusCode::FORBIDDEN,
            error_body("Only providers can set availability."),
        )
            .into_response();
    }

    let db = state.db.clone();
    let id = claims.sub.to_string();
    match tokio::task::spawn_blocking(move || db.set_provider_available(&id, req.available)).await {
        Ok(Ok(true)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Ok(false)) => {
            (StatusCode::NOT_FOUND, error_body("Provider profile not found.")).into_response()
        }
        Ok(Err(e)) => {
            error!("Availability update failed: {:#}", e);
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
