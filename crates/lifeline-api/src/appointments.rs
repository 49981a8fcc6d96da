use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use lifeline_types::api::{
    AppointmentResponse, Claims, CreateAppointmentRequest, TransitionRequest,
};
use lifeline_types::models::{Appointment, Role};

use crate::{AppState, error_body};

fn to_response(appointment: Appointment) -> AppointmentResponse {
    AppointmentResponse {
        id: appointment.id,
        patient_id: appointment.patient_id,
        provider_id: appointment.provider_id,
        scheduled_at: appointment.scheduled_at,
        mode: appointment.mode,
        status: appointment.status,
        created_at: appointment.created_at,
    }
}

/// Book a pending appointment. Creation is not a lifecycle edge, so no
/// alert is raised until the provider acts on it.
pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateAppointmentRequest>,
) -> impl IntoResponse {
    if claims.role != Role::Patient {
        return (
            StatusCode::FORBIDDEN,
            error_body("Only patients can book appointments."),
        )
            .into_response();
    }

    let id = Uuid::new_v4();
    let db = state.db.clone();
    let appointment_id = id.to_string();
    let patient_id = claims.sub.to_string();
    let provider_id = req.provider_id.to_string();
    let scheduled_at = req.scheduled_at;
    let mode = req.mode;

    let created = tokio::task::spawn_blocking(move || {
        db.create_appointment(&appointment_id, &patient_id, &provider_id, scheduled_at, mode.as_str())
    })
    .await;

    match created {
        Ok(Ok(())) => (
            StatusCode::CREATED,
            Json(to_response(Appointment {
                id,
                patient_id: claims.sub,
                provider_id: req.provider_id,
                scheduled_at: req.scheduled_at,
                mode: req.mode,
                status: lifeline_types::models::AppointmentStatus::Pending,
                created_at: chrono::Utc::now(),
            })),
        )
            .into_response(),
        Ok(Err(e)) => {
            error!("Appointment create failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                error_body("We could not book that appointment. Please try again."),
            )
                .into_response()
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Drive a lifecycle transition. The notifier validates the edge, persists
/// it, alerts both parties, and manages the reminder timer.
pub async fn transition(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TransitionRequest>,
) -> impl IntoResponse {
    match state
        .notifier
        .on_status_change(claims.sub, appointment_id, req.status)
        .await
    {
        Ok(appointment) => Json(to_response(appointment)).into_response(),
        Err(e) => crate::dispatch_error_response(e).into_response(),
    }
}
