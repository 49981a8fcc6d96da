use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AlertKind, AppointmentMode, AppointmentStatus, Coordinate, DeliveryStatus, Role,
};

// -- JWT Claims --

/// Claims shared between the REST middleware and the gateway identify
/// handshake. Tokens are issued by the platform's auth service; this
/// service only verifies and trusts them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

// -- Emergencies --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaiseEmergencyRequest {
    pub message: String,
    /// Overrides the caller's last-known location when present.
    pub location: Option<Coordinate>,
}

#[derive(Debug, Serialize)]
pub struct RaiseEmergencyResponse {
    pub alert_id: Uuid,
    pub recipient_count: usize,
    pub recipients: Vec<Uuid>,
    /// Set when no provider was reachable; the alert is still recorded.
    pub notice: Option<String>,
}

// -- Providers --

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
    pub role: Role,
}

fn default_radius_km() -> f64 {
    10.0
}

#[derive(Debug, Serialize)]
pub struct NearbyResponse {
    pub providers: Vec<NearbyProvider>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyProvider {
    pub provider_id: Uuid,
    pub distance_km: f64,
}

// -- Appointments --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAppointmentRequest {
    pub provider_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub mode: AppointmentMode,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Serialize)]
pub struct AppointmentResponse {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub mode: AppointmentMode,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

// -- Alert inbox --

#[derive(Debug, Serialize)]
pub struct InboxItem {
    pub alert_id: Uuid,
    pub kind: AlertKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

// -- Profile --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateLocationRequest {
    pub lat: f64,
    pub lon: f64,
}

// -- Errors --

/// Human-readable error body. Internal error kinds never cross this
/// boundary verbatim.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
