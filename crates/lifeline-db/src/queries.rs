use crate::Database;
use crate::models::{AlertRow, AppointmentRow, ProviderRow, RecipientRow, UserRow};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, role: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, username, role, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn set_user_location(&self, id: &str, lat: f64, lon: f64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE users SET lat = ?2, lon = ?3 WHERE id = ?1",
                rusqlite::params![id, lat, lon],
            )?;
            Ok(n > 0)
        })
    }

    /// Soft-deactivation; users are never hard-deleted.
    pub fn set_user_active(&self, id: &str, active: bool) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE users SET active = ?2 WHERE id = ?1",
                rusqlite::params![id, active],
            )?;
            Ok(n > 0)
        })
    }

    // -- Providers --

    pub fn upsert_provider(
        &self,
        user_id: &str,
        specialty: Option<&str>,
        service_radius_km: Option<f64>,
        rating: f64,
        verified: bool,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO providers (user_id, specialty, service_radius_km, rating, verified)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                    specialty = excluded.specialty,
                    service_radius_km = excluded.service_radius_km,
                    rating = excluded.rating,
                    verified = excluded.verified",
                rusqlite::params![user_id, specialty, service_radius_km, rating, verified],
            )?;
            Ok(())
        })
    }

    pub fn set_provider_available(&self, user_id: &str, available: bool) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE providers SET available = ?2 WHERE user_id = ?1",
                rusqlite::params![user_id, available],
            )?;
            Ok(n > 0)
        })
    }

    /// Dispatch candidates: active + available + verified providers of one
    /// role, with their last-known location and rating.
    pub fn list_active_providers(&self, role: &str) -> Result<Vec<ProviderRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.user_id, u.lat, u.lon, p.rating, p.service_radius_km
                 FROM providers p
                 JOIN users u ON u.id = p.user_id
                 WHERE u.role = ?1 AND u.active = 1 AND p.available = 1 AND p.verified = 1",
            )?;

            let rows = stmt
                .query_map([role], |row| {
                    Ok(ProviderRow {
                        user_id: row.get(0)?,
                        lat: row.get(1)?,
                        lon: row.get(2)?,
                        rating: row.get(3)?,
                        service_radius_km: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Appointments --

    pub fn create_appointment(
        &self,
        id: &str,
        patient_id: &str,
        provider_id: &str,
        scheduled_at: DateTime<Utc>,
        mode: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO appointments (id, patient_id, provider_id, scheduled_at, mode, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
                rusqlite::params![id, patient_id, provider_id, scheduled_at.to_rfc3339(), mode, now],
            )?;
            Ok(())
        })
    }

    pub fn get_appointment(&self, id: &str) -> Result<Option<AppointmentRow>> {
        self.with_conn(|conn| query_appointment(conn, id))
    }

    /// Compare-and-set status transition. Returns false when the stored
    /// status no longer matches `from` (a concurrent transition won).
    pub fn update_appointment_status(&self, id: &str, from: &str, to: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE appointments SET status = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = ?2",
                rusqlite::params![id, from, to, Utc::now().to_rfc3339()],
            )?;
            Ok(n > 0)
        })
    }

    // -- Alerts --

    /// Insert the alert and its full recipient list in one transaction.
    /// The recipient list is immutable after this point.
    pub fn create_alert(
        &self,
        id: &str,
        origin_user_id: &str,
        kind: &str,
        payload: &str,
        created_at: DateTime<Utc>,
        recipient_ids: &[String],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO alerts (id, origin_user_id, kind, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, origin_user_id, kind, payload, created_at.to_rfc3339()],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO alert_recipients (alert_id, recipient_id, status)
                     VALUES (?1, ?2, 'pending')",
                )?;
                for recipient in recipient_ids {
                    stmt.execute(rusqlite::params![id, recipient])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<AlertRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, origin_user_id, kind, payload, created_at FROM alerts WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], map_alert_row).optional()?;
            Ok(row)
        })
    }

    pub fn alert_recipients(&self, alert_id: &str) -> Result<Vec<RecipientRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT alert_id, recipient_id, status FROM alert_recipients WHERE alert_id = ?1
                 ORDER BY recipient_id",
            )?;
            let rows = stmt
                .query_map([alert_id], map_recipient_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Undelivered alerts for a recipient, most recent first. This is the
    /// replay set a freshly subscribed connection receives.
    pub fn pending_alerts_for(&self, recipient_id: &str) -> Result<Vec<AlertRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.origin_user_id, a.kind, a.payload, a.created_at
                 FROM alerts a
                 JOIN alert_recipients r ON r.alert_id = a.id
                 WHERE r.recipient_id = ?1 AND r.status = 'pending'
                 ORDER BY a.created_at DESC",
            )?;
            let rows = stmt
                .query_map([recipient_id], map_alert_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Full inbox for a recipient regardless of status, most recent first.
    pub fn inbox_for(&self, recipient_id: &str, limit: u32) -> Result<Vec<(AlertRow, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.origin_user_id, a.kind, a.payload, a.created_at, r.status
                 FROM alerts a
                 JOIN alert_recipients r ON r.alert_id = a.id
                 WHERE r.recipient_id = ?1
                 ORDER BY a.created_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![recipient_id, limit], |row| {
                    Ok((
                        AlertRow {
                            id: row.get(0)?,
                            origin_user_id: row.get(1)?,
                            kind: row.get(2)?,
                            payload: row.get(3)?,
                            created_at: row.get(4)?,
                        },
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// pending -> delivered, compare-and-set. Concurrent replays from
    /// multiple connections of the same user race here; exactly one wins
    /// and the status never regresses.
    pub fn mark_delivered(&self, alert_id: &str, recipient_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE alert_recipients SET status = 'delivered', delivered_at = ?3
                 WHERE alert_id = ?1 AND recipient_id = ?2 AND status = 'pending'",
                rusqlite::params![alert_id, recipient_id, Utc::now().to_rfc3339()],
            )?;
            Ok(n > 0)
        })
    }

    /// Forward jump to read from either pending or delivered. Idempotent.
    pub fn mark_read(&self, alert_id: &str, recipient_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE alert_recipients SET status = 'read', read_at = ?3
                 WHERE alert_id = ?1 AND recipient_id = ?2 AND status IN ('pending', 'delivered')",
                rusqlite::params![alert_id, recipient_id, Utc::now().to_rfc3339()],
            )?;
            Ok(n > 0)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, role, active, lat, lon, created_at FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                role: row.get(2)?,
                active: row.get(3)?,
                lat: row.get(4)?,
                lon: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_appointment(conn: &Connection, id: &str) -> Result<Option<AppointmentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, provider_id, scheduled_at, mode, status, created_at
         FROM appointments WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(AppointmentRow {
                id: row.get(0)?,
                patient_id: row.get(1)?,
                provider_id: row.get(2)?,
                scheduled_at: row.get(3)?,
                mode: row.get(4)?,
                status: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_alert_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRow> {
    Ok(AlertRow {
        id: row.get(0)?,
        origin_user_id: row.get(1)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_recipient_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecipientRow> {
    Ok(RecipientRow {
        alert_id: row.get(0)?,
        recipient_id: row.get(1)?,
        status: row.get(2)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
