use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lifeline_db::Database;
use lifeline_types::models::{
    AlertKind, Appointment, AppointmentStatus, ReminderPayload, StatusChangePayload,
};

use crate::DispatchError;
use crate::alert::AlertDispatcher;

struct ReminderEntry {
    handle: JoinHandle<()>,
}

/// Raises status-change alerts on appointment lifecycle edges and manages
/// one-shot reminder timers, cancellable by appointment id.
#[derive(Clone)]
pub struct AppointmentNotifier {
    dispatcher: AlertDispatcher,
    db: Arc<Database>,
    reminders: Arc<Mutex<HashMap<Uuid, ReminderEntry>>>,
}

impl AppointmentNotifier {
    pub fn new(dispatcher: AlertDispatcher, db: Arc<Database>) -> Self {
        Self {
            dispatcher,
            db,
            reminders: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Apply a status transition on behalf of `actor_user_id` and raise
    /// exactly one status_change alert to the two parties. Confirmation
    /// schedules the reminder; cancellation paths tear it down.
    pub async fn on_status_change(
        &self,
        actor_user_id: Uuid,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, DispatchError> {
        let appointment = self.load_appointment(appointment_id).await?;
        let old_status = appointment.status;
        old_status.transition(new_status)?;

        let updated = {
            let db = self.db.clone();
            let id = appointment_id.to_string();
            tokio::task::spawn_blocking(move || {
                db.update_appointment_status(&id, old_status.as_str(), new_status.as_str())
            })
            .await
            .map_err(|e| DispatchError::Storage(e.into()))?
            .map_err(DispatchError::Storage)?
        };
        if !updated {
            // A concurrent transition got there first.
            return Err(DispatchError::Conflict(appointment_id));
        }

        let payload = StatusChangePayload {
            appointment_id,
            old_status,
            new_status,
            body: format!(
                "Appointment on {} is now {}",
                appointment.scheduled_at.format("%Y-%m-%d %H:%M UTC"),
                new_status.as_str()
            ),
        };
        let recipients = [appointment.patient_id, appointment.provider_id];
        self.dispatcher
            .dispatch(
                actor_user_id,
                AlertKind::StatusChange,
                serde_json::to_value(&payload).map_err(|e| DispatchError::Storage(e.into()))?,
                &recipients,
            )
            .await?;

        match new_status {
            AppointmentStatus::Confirmed => {
                let lead = self.dispatcher.policy().reminder_lead;
                let when = appointment.scheduled_at - lead;
                self.schedule_reminder_for(&appointment, when).await;
            }
            AppointmentStatus::Cancelled
            | AppointmentStatus::Rejected
            | AppointmentStatus::Rescheduled => {
                self.cancel_reminder(appointment_id).await;
            }
            _ => {}
        }

        Ok(Appointment { status: new_status, ..appointment })
    }

    /// Register a one-shot reminder for an appointment. Replaces any
    /// reminder already scheduled for the same appointment.
    pub async fn schedule_reminder(
        &self,
        appointment_id: Uuid,
        when: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let appointment = self.load_appointment(appointment_id).await?;
        self.schedule_reminder_for(&appointment, when).await;
        Ok(())
    }

    async fn schedule_reminder_for(&self, appointment: &Appointment, when: DateTime<Utc>) {
        self.cancel_reminder(appointment.id).await;

        let notifier = self.clone();
        let appointment = appointment.clone();
        let appointment_id = appointment.id;

        // Insert under the same lock the task claims its slot through, so a
        // reminder due in the past cannot fire before it is registered.
        let mut reminders = self.reminders.lock().await;
        let handle = tokio::spawn(async move {
            let now = Utc::now();
            if when > now {
                let delay = (when - now).to_std().unwrap_or_default();
                tokio::time::sleep(delay).await;
            }

            // Claim the slot. A cancel that lands after this point finds
            // nothing to remove: already-fired wins and the alert stands.
            if notifier.reminders.lock().await.remove(&appointment_id).is_none() {
                return;
            }
            notifier.fire_reminder(appointment).await;
        });
        reminders.insert(appointment_id, ReminderEntry { handle });
        debug!("Reminder for {} scheduled at {}", appointment_id, when);
    }

    /// Cancel a pending reminder. Idempotent: cancelling twice, or after the
    /// reminder fired, is a no-op.
    pub async fn cancel_reminder(&self, appointment_id: Uuid) {
        if let Some(entry) = self.reminders.lock().await.remove(&appointment_id) {
            entry.handle.abort();
            debug!("Cancelled reminder for {}", appointment_id);
        }
    }

    pub async fn has_pending_reminder(&self, appointment_id: Uuid) -> bool {
        self.reminders.lock().await.contains_key(&appointment_id)
    }

    async fn fire_reminder(&self, appointment: Appointment) {
        // The timer map already gates ordinary cancellations; this catches
        // an appointment whose status changed without going through us.
        match self.load_appointment(appointment.id).await {
            Ok(current) if current.status == AppointmentStatus::Confirmed => {}
            Ok(current) => {
                info!(
                    "Skipping reminder for {}: status is {}",
                    appointment.id,
                    current.status.as_str()
                );
                return;
            }
            Err(e) => {
                warn!("Skipping reminder for {}: {}", appointment.id, e);
                return;
            }
        }

        let payload = ReminderPayload {
            appointment_id: appointment.id,
            scheduled_at: appointment.scheduled_at,
            message: format!(
                "Upcoming appointment at {}",
                appointment.scheduled_at.format("%Y-%m-%d %H:%M UTC")
            ),
        };
        let payload = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                warn!("Reminder payload for {} failed to serialize: {}", appointment.id, e);
                return;
            }
        };

        let recipients = [appointment.patient_id, appointment.provider_id];
        match self
            .dispatcher
            .dispatch(appointment.provider_id, AlertKind::AppointmentReminder, payload, &recipients)
            .await
        {
            Ok((alert, _)) => info!("Reminder alert {} raised for {}", alert.id, appointment.id),
            Err(e) => warn!("Reminder for {} failed: {}", appointment.id, e),
        }
    }

    async fn load_appointment(&self, appointment_id: Uuid) -> Result<Appointment, DispatchError> {
        let db = self.db.clone();
        let id = appointment_id.to_string();
        let row = tokio::task::spawn_blocking(move || db.get_appointment(&id))
            .await
            .map_err(|e| DispatchError::Storage(e.into()))?
            .map_err(DispatchError::Storage)?
            .ok_or(DispatchError::UnknownAppointment(appointment_id))?;
        row.into_appointment().map_err(DispatchError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertDispatcher;
    use crate::policy::DispatchPolicy;
    use crate::testutil::{seed_user, test_db};
    use chrono::Duration;
    use lifeline_gateway::registry::Registry;
    use lifeline_types::models::Role;

    struct Fixture {
        db: Arc<Database>,
        notifier: AppointmentNotifier,
        patient: Uuid,
        doctor: Uuid,
        appointment_id: Uuid,
    }

    fn fixture_with(scheduled_in: Duration) -> Fixture {
        let db = test_db();
        let dispatcher =
            AlertDispatcher::new(db.clone(), Registry::new(), DispatchPolicy::default());
        let notifier = AppointmentNotifier::new(dispatcher, db.clone());

        let patient = seed_user(&db, Role::Patient);
        let doctor = seed_user(&db, Role::Doctor);
        let appointment_id = Uuid::new_v4();
        db.create_appointment(
            &appointment_id.to_string(),
            &patient.to_string(),
            &doctor.to_string(),
            Utc::now() + scheduled_in,
            "online",
        )
        .unwrap();

        Fixture { db, notifier, patient, doctor, appointment_id }
    }

    fn confirm_directly(fx: &Fixture) {
        assert!(
            fx.db
                .update_appointment_status(&fx.appointment_id.to_string(), "pending", "confirmed")
                .unwrap()
        );
    }

    fn inbox_len(fx: &Fixture, user: Uuid) -> usize {
        fx.db.inbox_for(&user.to_string(), 50).unwrap().len()
    }

    async fn wait_for_inbox(fx: &Fixture, user: Uuid, expected: usize) {
        for _ in 0..100 {
            if inbox_len(fx, user) >= expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("inbox for {user} never reached {expected} entries");
    }

    #[tokio::test]
    async fn test_status_change_alerts_exactly_the_two_parties() {
        let fx = fixture_with(Duration::days(2));
        let third_party = seed_user(&fx.db, Role::Doctor);

        let updated = fx
            .notifier
            .on_status_change(fx.doctor, fx.appointment_id, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(updated.status, AppointmentStatus::Confirmed);

        assert_eq!(inbox_len(&fx, fx.patient), 1);
        assert_eq!(inbox_len(&fx, fx.doctor), 1);
        assert_eq!(inbox_len(&fx, third_party), 0);

        let row = fx.db.get_appointment(&fx.appointment_id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "confirmed");

        // Confirmation scheduled the reminder (scheduled_at - 24h lead).
        assert!(fx.notifier.has_pending_reminder(fx.appointment_id).await);
    }

    #[tokio::test]
    async fn test_invalid_transition_raises_no_alert() {
        let fx = fixture_with(Duration::days(2));

        let err = fx
            .notifier
            .on_status_change(fx.patient, fx.appointment_id, AppointmentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition(_)));

        assert_eq!(inbox_len(&fx, fx.patient), 0);
        assert_eq!(inbox_len(&fx, fx.doctor), 0);
    }

    #[tokio::test]
    async fn test_unknown_appointment() {
        let fx = fixture_with(Duration::days(2));
        let ghost = Uuid::new_v4();
        let err = fx
            .notifier
            .on_status_change(fx.patient, ghost, AppointmentStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownAppointment(id) if id == ghost));
    }

    #[tokio::test]
    async fn test_reminder_fires_for_confirmed_appointment() {
        let fx = fixture_with(Duration::hours(1));
        confirm_directly(&fx);

        fx.notifier
            .schedule_reminder(fx.appointment_id, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        wait_for_inbox(&fx, fx.patient, 1).await;
        wait_for_inbox(&fx, fx.doctor, 1).await;
        assert!(!fx.notifier.has_pending_reminder(fx.appointment_id).await);

        let (alert_row, status) =
            fx.db.inbox_for(&fx.patient.to_string(), 50).unwrap().remove(0);
        assert_eq!(alert_row.kind, "appointment_reminder");
        assert_eq!(status, "pending");
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let fx = fixture_with(Duration::days(2));
        confirm_directly(&fx);

        fx.notifier
            .schedule_reminder(fx.appointment_id, Utc::now() + Duration::seconds(60))
            .await
            .unwrap();
        assert!(fx.notifier.has_pending_reminder(fx.appointment_id).await);

        fx.notifier.cancel_reminder(fx.appointment_id).await;
        fx.notifier.cancel_reminder(fx.appointment_id).await;
        assert!(!fx.notifier.has_pending_reminder(fx.appointment_id).await);

        // Cancelling a reminder that never existed is also a no-op.
        fx.notifier.cancel_reminder(Uuid::new_v4()).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(inbox_len(&fx, fx.patient), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_fire_is_noop() {
        let fx = fixture_with(Duration::hours(1));
        confirm_directly(&fx);

        fx.notifier
            .schedule_reminder(fx.appointment_id, Utc::now())
            .await
            .unwrap();
        wait_for_inbox(&fx, fx.patient, 1).await;

        // The alert fired; cancelling now neither errors nor retracts it.
        fx.notifier.cancel_reminder(fx.appointment_id).await;
        assert_eq!(inbox_len(&fx, fx.patient), 1);
    }

    #[tokio::test]
    async fn test_cancelled_appointment_never_reminds() {
        let fx = fixture_with(Duration::days(1) + Duration::hours(1));

        fx.notifier
            .on_status_change(fx.doctor, fx.appointment_id, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        assert!(fx.notifier.has_pending_reminder(fx.appointment_id).await);

        fx.notifier
            .on_status_change(fx.patient, fx.appointment_id, AppointmentStatus::Cancelled)
            .await
            .unwrap();
        assert!(!fx.notifier.has_pending_reminder(fx.appointment_id).await);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // Two status_change alerts, zero reminders.
        let inbox = fx.db.inbox_for(&fx.patient.to_string(), 50).unwrap();
        assert_eq!(inbox.len(), 2);
        assert!(inbox.iter().all(|(row, _)| row.kind == "status_change"));
    }

    #[tokio::test]
    async fn test_rescheduling_replaces_the_timer() {
        let fx = fixture_with(Duration::days(2));
        confirm_directly(&fx);

        fx.notifier
            .schedule_reminder(fx.appointment_id, Utc::now() + Duration::seconds(120))
            .await
            .unwrap();
        // Second schedule for the same appointment supersedes the first.
        fx.notifier
            .schedule_reminder(fx.appointment_id, Utc::now() + Duration::seconds(240))
            .await
            .unwrap();
        assert!(fx.notifier.has_pending_reminder(fx.appointment_id).await);

        fx.notifier.cancel_reminder(fx.appointment_id).await;
        assert!(!fx.notifier.has_pending_reminder(fx.appointment_id).await);
    }
}
