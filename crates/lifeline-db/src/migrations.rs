use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            role        TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1,
            lat         REAL,
            lon         REAL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS providers (
            user_id             TEXT PRIMARY KEY REFERENCES users(id),
            specialty           TEXT,
            available           INTEGER NOT NULL DEFAULT 1,
            service_radius_km   REAL,
            rating              REAL NOT NULL DEFAULT 0,
            verified            INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS appointments (
            id            TEXT PRIMARY KEY,
            patient_id    TEXT NOT NULL REFERENCES users(id),
            provider_id   TEXT NOT NULL REFERENCES users(id),
            scheduled_at  TEXT NOT NULL,
            mode          TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_appointments_patient
            ON appointments(patient_id, scheduled_at);
        CREATE INDEX IF NOT EXISTS idx_appointments_provider
            ON appointments(provider_id, scheduled_at);

        -- Alerts are append-only; retained indefinitely for audit.
        CREATE TABLE IF NOT EXISTS alerts (
            id              TEXT PRIMARY KEY,
            origin_user_id  TEXT NOT NULL REFERENCES users(id),
            kind            TEXT NOT NULL,
            payload         TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        -- Recipient list is fixed at alert creation; status is the only
        -- mutable column.
        CREATE TABLE IF NOT EXISTS alert_recipients (
            alert_id      TEXT NOT NULL REFERENCES alerts(id),
            recipient_id  TEXT NOT NULL REFERENCES users(id),
            status        TEXT NOT NULL DEFAULT 'pending'
                          CHECK (status IN ('pending', 'delivered', 'read')),
            delivered_at  TEXT,
            read_at       TEXT,
            PRIMARY KEY (alert_id, recipient_id)
        );

        CREATE INDEX IF NOT EXISTS idx_alert_recipients_recipient
            ON alert_recipients(recipient_id, status);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
