use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Doctor,
    Pharmacy,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Pharmacy => "pharmacy",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "patient" => Some(Role::Patient),
            "doctor" => Some(Role::Doctor),
            "pharmacy" => Some(Role::Pharmacy),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Roles that can appear as emergency/alert recipients via geo lookup.
    pub fn is_provider(&self) -> bool {
        matches!(self, Role::Doctor | Role::Pharmacy)
    }
}

/// A point in degrees. Validation happens at the boundary (lifeline-geo),
/// not at every read site.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub active: bool,
    /// Last-known location, updated by the client. Absent until first report.
    pub location: Option<Coordinate>,
    pub created_at: DateTime<Utc>,
}

/// Directory view of a provider, as consumed by the geo matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub id: Uuid,
    pub location: Option<Coordinate>,
    pub rating: f64,
    /// Providers that declare a service radius are not matched beyond it.
    pub service_radius_km: Option<f64>,
}

// -- Alerts --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Emergency,
    AppointmentReminder,
    StatusChange,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Emergency => "emergency",
            AlertKind::AppointmentReminder => "appointment_reminder",
            AlertKind::StatusChange => "status_change",
        }
    }

    pub fn parse(s: &str) -> Option<AlertKind> {
        match s {
            "emergency" => Some(AlertKind::Emergency),
            "appointment_reminder" => Some(AlertKind::AppointmentReminder),
            "status_change" => Some(AlertKind::StatusChange),
            _ => None,
        }
    }
}

/// Per-recipient delivery state. Transitions are monotonic:
/// pending -> delivered -> read, with pending -> read allowed as a forward
/// jump (a client can read from the REST inbox without ever connecting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<DeliveryStatus> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "delivered" => Some(DeliveryStatus::Delivered),
            "read" => Some(DeliveryStatus::Read),
            _ => None,
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Delivered => 1,
            DeliveryStatus::Read => 2,
        }
    }
}

/// One persisted notification event. The recipient list is computed at
/// creation time and recorded immutably alongside; per-recipient delivery
/// status is the only mutable field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub origin_user_id: Uuid,
    pub kind: AlertKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// Typed alert payloads. The dispatcher serializes these into Alert.payload;
// the gateway parses them back when turning a stored alert into a wire event.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyPayload {
    pub message: String,
    pub location: Coordinate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub appointment_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangePayload {
    pub appointment_id: Uuid,
    pub old_status: AppointmentStatus,
    pub new_status: AppointmentStatus,
    pub body: String,
}

// -- Appointments --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentMode {
    Clinic,
    Home,
    Online,
}

impl AppointmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentMode::Clinic => "clinic",
            AppointmentMode::Home => "home",
            AppointmentMode::Online => "online",
        }
    }

    pub fn parse(s: &str) -> Option<AppointmentMode> {
        match s {
            "clinic" => Some(AppointmentMode::Clinic),
            "home" => Some(AppointmentMode::Home),
            "online" => Some(AppointmentMode::Online),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Rejected,
    NoShow,
    Rescheduled,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid appointment transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Rescheduled => "rescheduled",
        }
    }

    pub fn parse(s: &str) -> Option<AppointmentStatus> {
        match s {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "rejected" => Some(AppointmentStatus::Rejected),
            "no_show" => Some(AppointmentStatus::NoShow),
            "rescheduled" => Some(AppointmentStatus::Rescheduled),
            _ => None,
        }
    }

    /// Appointment lifecycle:
    /// pending -> confirmed | rejected | cancelled
    /// confirmed -> completed | cancelled | no_show | rescheduled
    /// rescheduled -> pending (re-enters the cycle)
    /// everything else is terminal.
    pub fn can_transition(&self, to: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match self {
            Pending => matches!(to, Confirmed | Rejected | Cancelled),
            Confirmed => matches!(to, Completed | Cancelled | NoShow | Rescheduled),
            Rescheduled => matches!(to, Pending),
            Completed | Cancelled | Rejected | NoShow => false,
        }
    }

    pub fn transition(&self, to: AppointmentStatus) -> Result<AppointmentStatus, InvalidTransition> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: *self, to })
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub mode: AppointmentMode,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            AppointmentStatus::Pending,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Rejected,
            AppointmentStatus::NoShow,
            AppointmentStatus::Rescheduled,
        ] {
            assert_eq!(AppointmentStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(AppointmentStatus::parse("paused"), None);
    }

    #[test]
    fn test_transitions_from_pending() {
        let pending = AppointmentStatus::Pending;
        assert!(pending.can_transition(AppointmentStatus::Confirmed));
        assert!(pending.can_transition(AppointmentStatus::Rejected));
        assert!(pending.can_transition(AppointmentStatus::Cancelled));
        assert!(!pending.can_transition(AppointmentStatus::Completed));
        assert!(!pending.can_transition(AppointmentStatus::NoShow));
    }

    #[test]
    fn test_rescheduled_reenters_pending() {
        let r = AppointmentStatus::Rescheduled;
        assert!(r.can_transition(AppointmentStatus::Pending));
        assert!(!r.can_transition(AppointmentStatus::Confirmed));
    }

    #[test]
    fn test_terminal_states() {
        use AppointmentStatus::*;
        for terminal in [Completed, Cancelled, Rejected, NoShow] {
            for to in [Pending, Confirmed, Completed, Cancelled, Rejected, NoShow, Rescheduled] {
                assert!(!terminal.can_transition(to), "{terminal:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn test_transition_error_carries_edge() {
        let err = AppointmentStatus::Completed
            .transition(AppointmentStatus::Pending)
            .unwrap_err();
        assert_eq!(err.from, AppointmentStatus::Completed);
        assert_eq!(err.to, AppointmentStatus::Pending);
    }

    #[test]
    fn test_delivery_status_rank_is_monotonic() {
        assert!(DeliveryStatus::Pending.rank() < DeliveryStatus::Delivered.rank());
        assert!(DeliveryStatus::Delivered.rank() < DeliveryStatus::Read.rank());
    }
}
