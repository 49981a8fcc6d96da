use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use lifeline_types::models::{
    Alert, AlertKind, Appointment, AppointmentMode, AppointmentStatus, Coordinate,
    ProviderSummary, Role, User,
};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub role: String,
    pub active: bool,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub user_id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub rating: f64,
    pub service_radius_km: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AppointmentRow {
    pub id: String,
    pub patient_id: String,
    pub provider_id: String,
    pub scheduled_at: String,
    pub mode: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct AlertRow {
    pub id: String,
    pub origin_user_id: String,
    pub kind: String,
    pub payload: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct RecipientRow {
    pub alert_id: String,
    pub recipient_id: String,
    pub status: String,
}

/// SQLite stores timestamps as TEXT; rows written by this service are
/// RFC 3339, but `datetime('now')` defaults produce "YYYY-MM-DD HH:MM:SS".
/// Accept both.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("unparseable timestamp '{s}'"))
}

fn location_from(lat: Option<f64>, lon: Option<f64>) -> Option<Coordinate> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => Some(Coordinate { lat, lon }),
        _ => None,
    }
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id.parse::<Uuid>().context("corrupt user id")?,
            role: Role::parse(&self.role).ok_or_else(|| anyhow!("unknown role '{}'", self.role))?,
            active: self.active,
            location: location_from(self.lat, self.lon),
            created_at: parse_timestamp(&self.created_at)?,
            username: self.username,
        })
    }
}

impl ProviderRow {
    pub fn into_summary(self) -> Result<ProviderSummary> {
        Ok(ProviderSummary {
            id: self.user_id.parse::<Uuid>().context("corrupt provider id")?,
            location: location_from(self.lat, self.lon),
            rating: self.rating,
            service_radius_km: self.service_radius_km,
        })
    }
}

impl AppointmentRow {
    pub fn into_appointment(self) -> Result<Appointment> {
        Ok(Appointment {
            id: self.id.parse::<Uuid>().context("corrupt appointment id")?,
            patient_id: self.patient_id.parse::<Uuid>().context("corrupt patient id")?,
            provider_id: self.provider_id.parse::<Uuid>().context("corrupt provider id")?,
            scheduled_at: parse_timestamp(&self.scheduled_at)?,
            mode: AppointmentMode::parse(&self.mode)
                .ok_or_else(|| anyhow!("unknown mode '{}'", self.mode))?,
            status: AppointmentStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("unknown status '{}'", self.status))?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl AlertRow {
    pub fn into_alert(self) -> Result<Alert> {
        Ok(Alert {
            id: self.id.parse::<Uuid>().context("corrupt alert id")?,
            origin_user_id: self
                .origin_user_id
                .parse::<Uuid>()
                .context("corrupt origin user id")?,
            kind: AlertKind::parse(&self.kind)
                .ok_or_else(|| anyhow!("unknown alert kind '{}'", self.kind))?,
            payload: serde_json::from_str(&self.payload).context("corrupt alert payload")?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

