use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Alert, AlertKind, Coordinate, EmergencyPayload, ReminderPayload, Role, StatusChangePayload,
};

/// Events sent over the WebSocket gateway. Wire names are fixed — clients
/// match on the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready { user_id: Uuid, role: Role },

    /// Generic notification (status changes and anything non-urgent)
    #[serde(rename = "notification")]
    Notification {
        alert_id: Uuid,
        #[serde(rename = "type")]
        kind: String,
        body: String,
    },

    /// Appointment reminder firing at its scheduled instant
    #[serde(rename = "appointment_reminder")]
    AppointmentReminder {
        alert_id: Uuid,
        appointment_id: Uuid,
        scheduled_at: chrono::DateTime<chrono::Utc>,
        message: String,
    },

    /// Emergency broadcast to matched providers
    #[serde(rename = "emergency_alert")]
    EmergencyAlert {
        alert_id: Uuid,
        origin_user_id: Uuid,
        message: String,
        location: Coordinate,
    },

    /// Video call signaling, relayed between the two parties
    #[serde(rename = "video_call:start")]
    VideoCallStart {
        from_user_id: Uuid,
        call_id: Uuid,
        offer: String,
    },

    #[serde(rename = "video_call:accept")]
    VideoCallAccept {
        from_user_id: Uuid,
        call_id: Uuid,
        answer: String,
    },

    #[serde(rename = "video_call:end")]
    VideoCallEnd { from_user_id: Uuid, call_id: Uuid },
}

impl GatewayEvent {
    /// Reconstruct the wire event for a stored alert (inbox replay and
    /// live publish share this). Fails on a corrupt payload; callers log
    /// and skip rather than drop the connection.
    pub fn from_alert(alert: &Alert) -> Result<GatewayEvent, serde_json::Error> {
        match alert.kind {
            AlertKind::Emergency => {
                let p: EmergencyPayload = serde_json::from_value(alert.payload.clone())?;
                Ok(GatewayEvent::EmergencyAlert {
                    alert_id: alert.id,
                    origin_user_id: alert.origin_user_id,
                    message: p.message,
                    location: p.location,
                })
            }
            AlertKind::AppointmentReminder => {
                let p: ReminderPayload = serde_json::from_value(alert.payload.clone())?;
                Ok(GatewayEvent::AppointmentReminder {
                    alert_id: alert.id,
                    appointment_id: p.appointment_id,
                    scheduled_at: p.scheduled_at,
                    message: p.message,
                })
            }
            AlertKind::StatusChange => {
                let p: StatusChangePayload = serde_json::from_value(alert.payload.clone())?;
                Ok(GatewayEvent::Notification {
                    alert_id: alert.id,
                    kind: alert.kind.as_str().to_string(),
                    body: p.body,
                })
            }
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, GatewayEvent::EmergencyAlert { .. })
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    #[serde(rename = "identify")]
    Identify { token: String },

    /// Acknowledge an alert as read
    #[serde(rename = "mark_read")]
    MarkRead { alert_id: Uuid },

    #[serde(rename = "video_call:start")]
    VideoCallStart {
        target_user_id: Uuid,
        call_id: Uuid,
        offer: String,
    },

    #[serde(rename = "video_call:accept")]
    VideoCallAccept {
        target_user_id: Uuid,
        call_id: Uuid,
        answer: String,
    },

    #[serde(rename = "video_call:end")]
    VideoCallEnd { target_user_id: Uuid, call_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_wire_names_are_stable() {
        let ev = GatewayEvent::EmergencyAlert {
            alert_id: Uuid::nil(),
            origin_user_id: Uuid::nil(),
            message: "help".into(),
            location: Coordinate { lat: 12.9716, lon: 77.5946 },
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "emergency_alert");
        assert_eq!(json["data"]["message"], "help");
        assert!(json["data"]["location"]["lat"].is_f64());

        let ev = GatewayEvent::Notification {
            alert_id: Uuid::nil(),
            kind: "status_change".into(),
            body: "confirmed".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["data"]["type"], "status_change");
        assert_eq!(json["data"]["body"], "confirmed");
    }

    #[test]
    fn test_video_call_wire_names() {
        let ev = GatewayEvent::VideoCallStart {
            from_user_id: Uuid::nil(),
            call_id: Uuid::nil(),
            offer: "sdp".into(),
        };
        assert_eq!(serde_json::to_value(&ev).unwrap()["type"], "video_call:start");

        let cmd: GatewayCommand = serde_json::from_value(serde_json::json!({
            "type": "video_call:end",
            "data": { "target_user_id": Uuid::nil(), "call_id": Uuid::nil() }
        }))
        .unwrap();
        assert!(matches!(cmd, GatewayCommand::VideoCallEnd { .. }));
    }

    #[test]
    fn test_from_alert_round_trip() {
        let payload = EmergencyPayload {
            message: "chest pain".into(),
            location: Coordinate { lat: 12.9716, lon: 77.5946 },
        };
        let alert = Alert {
            id: Uuid::new_v4(),
            origin_user_id: Uuid::new_v4(),
            kind: AlertKind::Emergency,
            payload: serde_json::to_value(&payload).unwrap(),
            created_at: Utc::now(),
        };
        match GatewayEvent::from_alert(&alert).unwrap() {
            GatewayEvent::EmergencyAlert { alert_id, message, .. } => {
                assert_eq!(alert_id, alert.id);
                assert_eq!(message, "chest pain");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_from_alert_rejects_corrupt_payload() {
        let alert = Alert {
            id: Uuid::new_v4(),
            origin_user_id: Uuid::new_v4(),
            kind: AlertKind::Emergency,
            payload: serde_json::json!({ "nonsense": true }),
            created_at: Utc::now(),
        };
        assert!(GatewayEvent::from_alert(&alert).is_err());
    }
}
