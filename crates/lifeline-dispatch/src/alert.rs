use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use lifeline_db::Database;
use lifeline_gateway::registry::Registry;
use lifeline_geo::ProviderMatch;
use lifeline_types::events::GatewayEvent;
use lifeline_types::models::{
    Alert, AlertKind, Coordinate, EmergencyPayload, ProviderSummary, Role, User,
};

use crate::DispatchError;
use crate::policy::DispatchPolicy;

/// Outcome of an emergency dispatch, returned to the API layer.
#[derive(Debug)]
pub struct EmergencyOutcome {
    pub alert: Alert,
    pub matches: Vec<ProviderMatch>,
    /// How many recipients had at least one live connection at publish time.
    pub delivered_live: usize,
    pub final_radius_km: f64,
    pub escalations: u32,
}

/// Creates alert records and fans them out. Persist first, publish second:
/// a persistence failure aborts the call, while an unreachable recipient is
/// just a pending inbox row.
#[derive(Clone)]
pub struct AlertDispatcher {
    db: Arc<Database>,
    registry: Registry,
    policy: DispatchPolicy,
}

impl AlertDispatcher {
    pub fn new(db: Arc<Database>, registry: Registry, policy: DispatchPolicy) -> Self {
        Self { db, registry, policy }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Raise an emergency for `origin_user_id`. The search radius escalates
    /// until at least `min_recipients` doctors are found or attempts run
    /// out; the alert is recorded with whatever was found, possibly nobody.
    pub async fn raise_emergency(
        &self,
        origin_user_id: Uuid,
        message: String,
        location_override: Option<Coordinate>,
    ) -> Result<EmergencyOutcome, DispatchError> {
        let origin = self.load_user(origin_user_id).await?;
        let location = location_override
            .or(origin.location)
            .ok_or(DispatchError::MissingLocation)?;
        lifeline_geo::validate(location)?;

        let candidates = self.doctor_candidates(origin_user_id).await?;

        let mut radius = self.policy.initial_radius_km;
        let mut escalations = 0u32;
        let mut matches = lifeline_geo::find_nearby(location, radius, &candidates)?;
        while matches.len() < self.policy.min_recipients
            && escalations + 1 < self.policy.max_attempts
        {
            escalations += 1;
            radius *= self.policy.escalation_factor;
            info!(
                "Emergency search for {} found {} recipient(s), widening to {} km",
                origin_user_id,
                matches.len(),
                radius
            );
            matches = lifeline_geo::find_nearby(location, radius, &candidates)?;
        }

        let recipients: Vec<Uuid> = matches.iter().map(|m| m.provider_id).collect();
        if recipients.is_empty() {
            warn!(
                "Emergency from {} found no providers within {} km; recording for retry",
                origin_user_id, radius
            );
        }

        let payload = EmergencyPayload { message, location };
        let (alert, delivered_live) = self
            .dispatch(
                origin_user_id,
                AlertKind::Emergency,
                serde_json::to_value(&payload).map_err(|e| DispatchError::Storage(e.into()))?,
                &recipients,
            )
            .await?;

        info!(
            "Emergency alert {} dispatched to {} recipient(s) ({} live) at {} km",
            alert.id,
            recipients.len(),
            delivered_live,
            radius
        );

        Ok(EmergencyOutcome { alert, matches, delivered_live, final_radius_km: radius, escalations })
    }

    /// Persist an alert with its fixed recipient list, then push it to every
    /// recipient's live connections. Returns the alert and how many
    /// recipients were reachable live; the rest wait in the inbox.
    pub async fn dispatch(
        &self,
        origin_user_id: Uuid,
        kind: AlertKind,
        payload: serde_json::Value,
        recipients: &[Uuid],
    ) -> Result<(Alert, usize), DispatchError> {
        let alert = Alert {
            id: Uuid::new_v4(),
            origin_user_id,
            kind,
            payload,
            created_at: Utc::now(),
        };

        self.persist_alert(&alert, recipients).await?;

        let mut delivered_live = 0;
        match GatewayEvent::from_alert(&alert) {
            Ok(event) => {
                for recipient in recipients {
                    if self.registry.send_to_user(*recipient, event.clone()).await {
                        delivered_live += 1;
                    }
                }
            }
            Err(e) => warn!("Alert {} not publishable: {}", alert.id, e),
        }

        Ok((alert, delivered_live))
    }

    async fn persist_alert(&self, alert: &Alert, recipients: &[Uuid]) -> Result<(), DispatchError> {
        let db = self.db.clone();
        let id = alert.id.to_string();
        let origin = alert.origin_user_id.to_string();
        let kind = alert.kind.as_str();
        let payload = alert.payload.to_string();
        let created_at = alert.created_at;
        let recipient_ids: Vec<String> = recipients.iter().map(|r| r.to_string()).collect();

        tokio::task::spawn_blocking(move || {
            db.create_alert(&id, &origin, kind, &payload, created_at, &recipient_ids)
        })
        .await
        .map_err(|e| DispatchError::Storage(e.into()))?
        .map_err(DispatchError::Storage)
    }

    async fn load_user(&self, user_id: Uuid) -> Result<User, DispatchError> {
        let db = self.db.clone();
        let id = user_id.to_string();
        let row = tokio::task::spawn_blocking(move || db.get_user_by_id(&id))
            .await
            .map_err(|e| DispatchError::Storage(e.into()))?
            .map_err(DispatchError::Storage)?
            .ok_or(DispatchError::UnknownUser(user_id))?;
        row.into_user().map_err(DispatchError::Storage)
    }

    /// Active, available, verified doctors — minus the origin user, who
    /// should not be paged about their own emergency.
    async fn doctor_candidates(
        &self,
        origin_user_id: Uuid,
    ) -> Result<Vec<ProviderSummary>, DispatchError> {
        let db = self.db.clone();
        let rows = tokio::task::spawn_blocking(move || {
            db.list_active_providers(Role::Doctor.as_str())
        })
        .await
        .map_err(|e| DispatchError::Storage(e.into()))?
        .map_err(DispatchError::Storage)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_summary() {
                Ok(summary) if summary.id != origin_user_id => candidates.push(summary),
                Ok(_) => {}
                Err(e) => warn!("Skipping corrupt provider row: {}", e),
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ORIGIN, seed_doctor_at_km, seed_patient_at, seed_user, test_db};
    use lifeline_geo::GeoError;

    fn dispatcher(db: &Arc<Database>) -> (AlertDispatcher, Registry) {
        let registry = Registry::new();
        let d = AlertDispatcher::new(db.clone(), registry.clone(), DispatchPolicy::default());
        (d, registry)
    }

    #[tokio::test]
    async fn test_two_doctors_escalates_and_records_both() {
        let db = test_db();
        let patient = seed_patient_at(&db, ORIGIN);
        let near = seed_doctor_at_km(&db, 3.0, 4.0);
        let far = seed_doctor_at_km(&db, 7.0, 4.0);
        let (dispatcher, _registry) = dispatcher(&db);

        let outcome = dispatcher
            .raise_emergency(patient, "chest pain".into(), None)
            .await
            .unwrap();

        // 2 < min_recipients, so the search widened through every tier but
        // still dispatched with both, nearest first.
        assert_eq!(outcome.escalations, 2);
        assert_eq!(outcome.final_radius_km, 40.0);
        let ids: Vec<Uuid> = outcome.matches.iter().map(|m| m.provider_id).collect();
        assert_eq!(ids, vec![near, far]);

        let recipients = db.alert_recipients(&outcome.alert.id.to_string()).unwrap();
        assert_eq!(recipients.len(), 2);
        assert!(recipients.iter().all(|r| r.status == "pending"));
    }

    #[tokio::test]
    async fn test_escalation_stops_once_enough_found() {
        let db = test_db();
        let patient = seed_patient_at(&db, ORIGIN);
        // 1 doctor within 10 km, 4 within 20 km, 11 candidates total.
        for km in [5.0, 14.0, 16.0, 18.0, 25.0, 30.0, 35.0, 45.0, 50.0, 55.0, 60.0] {
            seed_doctor_at_km(&db, km, 4.0);
        }
        let (dispatcher, _registry) = dispatcher(&db);

        let outcome = dispatcher
            .raise_emergency(patient, "help".into(), None)
            .await
            .unwrap();

        assert_eq!(outcome.escalations, 1);
        assert_eq!(outcome.final_radius_km, 20.0);
        assert_eq!(outcome.matches.len(), 4);
        for pair in outcome.matches.windows(2) {
            assert!(pair[0].distance_km <= pair[1].distance_km);
        }
    }

    #[tokio::test]
    async fn test_no_providers_is_recorded_not_an_error() {
        let db = test_db();
        let patient = seed_patient_at(&db, ORIGIN);
        let (dispatcher, _registry) = dispatcher(&db);

        let outcome = dispatcher
            .raise_emergency(patient, "help".into(), None)
            .await
            .unwrap();

        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.delivered_live, 0);
        // Auditable: the alert row exists with an empty recipient list.
        let stored = db.get_alert(&outcome.alert.id.to_string()).unwrap();
        assert!(stored.is_some());
        assert!(db.alert_recipients(&outcome.alert.id.to_string()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_location_rejected() {
        let db = test_db();
        let patient = seed_user(&db, lifeline_types::models::Role::Patient);
        let (dispatcher, _registry) = dispatcher(&db);

        let err = dispatcher
            .raise_emergency(patient, "help".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingLocation));
    }

    #[tokio::test]
    async fn test_invalid_override_rejected_before_lookup() {
        let db = test_db();
        let patient = seed_patient_at(&db, ORIGIN);
        let (dispatcher, _registry) = dispatcher(&db);

        let err = dispatcher
            .raise_emergency(
                patient,
                "help".into(),
                Some(Coordinate { lat: 95.0, lon: 0.0 }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Geo(GeoError::InvalidCoordinate { .. })));
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let db = test_db();
        let (dispatcher, _registry) = dispatcher(&db);
        let ghost = Uuid::new_v4();
        let err = dispatcher
            .raise_emergency(ghost, "help".into(), Some(ORIGIN))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownUser(id) if id == ghost));
    }

    #[tokio::test]
    async fn test_live_recipient_receives_push() {
        let db = test_db();
        let patient = seed_patient_at(&db, ORIGIN);
        let doctor = seed_doctor_at_km(&db, 3.0, 4.0);
        let (dispatcher, registry) = dispatcher(&db);

        let (_conn, mut rx) = registry.register(doctor).await;

        let outcome = dispatcher
            .raise_emergency(patient, "chest pain".into(), None)
            .await
            .unwrap();
        assert_eq!(outcome.delivered_live, 1);

        match rx.recv().await.unwrap() {
            GatewayEvent::EmergencyAlert { alert_id, origin_user_id, message, .. } => {
                assert_eq!(alert_id, outcome.alert.id);
                assert_eq!(origin_user_id, patient);
                assert_eq!(message, "chest pain");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // The delivered CAS belongs to the socket write path, not the
        // dispatcher; the row stays pending here.
        let recipients = db.alert_recipients(&outcome.alert.id.to_string()).unwrap();
        assert_eq!(recipients[0].status, "pending");
    }

    #[tokio::test]
    async fn test_origin_doctor_not_self_paged() {
        let db = test_db();
        let doctor = seed_doctor_at_km(&db, 0.0, 4.0);
        let other = seed_doctor_at_km(&db, 2.0, 4.0);
        let (dispatcher, _registry) = dispatcher(&db);

        let outcome = dispatcher
            .raise_emergency(doctor, "help".into(), Some(ORIGIN))
            .await
            .unwrap();
        let ids: Vec<Uuid> = outcome.matches.iter().map(|m| m.provider_id).collect();
        assert_eq!(ids, vec![other]);
    }
}
