use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use lifeline_db::Database;
use lifeline_types::api::Claims;
use lifeline_types::events::{GatewayCommand, GatewayEvent};

use crate::registry::Registry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh connection gets to send its Identify command.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, Ready,
/// pending-inbox replay, then live streaming until either side drops.
pub async fn handle_connection(
    socket: WebSocket,
    registry: Registry,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };
    let user_id = claims.sub;

    info!("{} ({}) connected to gateway", user_id, claims.role.as_str());

    let ready = GatewayEvent::Ready { user_id, role: claims.role };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let (conn_id, mut user_rx) = registry.register(user_id).await;

    // Replay the persisted inbox before going live. Every new connection of
    // this user gets the full pending set; the delivered CAS means only the
    // first replay advances each row.
    if let Err(e) = replay_pending(&mut sender, &db, user_id).await {
        warn!("Inbox replay aborted for {}: {}", user_id, e);
        registry.unregister(user_id, conn_id).await;
        return;
    }

    let registry_recv = registry.clone();
    let db_recv = db.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted events -> client, with heartbeat
    let db_send = db.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let alert_ref = delivered_ref(&event);
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                    // A live push that reached the socket counts as delivered.
                    if let Some(alert_id) = alert_ref {
                        mark_delivered(&db_send, alert_id, user_id).await;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&registry_recv, &db_recv, user_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            truncate_for_log(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unregister(user_id, conn_id).await;
    info!("{} disconnected from gateway", user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    sender.send(Message::Text(text.into())).await
}

/// Clip client input for logging without splitting a UTF-8 character.
fn truncate_for_log(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Send half of a connection, as seen by the inbox replay. The indirection
/// lets tests drive the replay without a live WebSocket.
trait EventSink {
    async fn deliver(&mut self, event: &GatewayEvent) -> anyhow::Result<()>;
}

impl EventSink for futures_util::stream::SplitSink<WebSocket, Message> {
    async fn deliver(&mut self, event: &GatewayEvent) -> anyhow::Result<()> {
        send_event(self, event)
            .await
            .map_err(|e| anyhow::anyhow!("socket write failed: {}", e))
    }
}

/// Alert id to CAS to delivered once the event reaches the socket.
/// Signaling events are transient and leave no inbox row.
fn delivered_ref(event: &GatewayEvent) -> Option<Uuid> {
    match event {
        GatewayEvent::Notification { alert_id, .. }
        | GatewayEvent::AppointmentReminder { alert_id, .. }
        | GatewayEvent::EmergencyAlert { alert_id, .. } => Some(*alert_id),
        _ => None,
    }
}

/// Send every pending alert for this user, most recent first, marking each
/// delivered after the socket write succeeds. Corrupt rows are logged and
/// skipped rather than wedging the replay.
async fn replay_pending<S: EventSink>(
    sink: &mut S,
    db: &Arc<Database>,
    user_id: Uuid,
) -> anyhow::Result<()> {
    let db_query = db.clone();
    let uid = user_id.to_string();
    let rows = tokio::task::spawn_blocking(move || db_query.pending_alerts_for(&uid)).await??;

    if !rows.is_empty() {
        info!("Replaying {} pending alert(s) to {}", rows.len(), user_id);
    }

    for row in rows {
        let alert = match row.into_alert() {
            Ok(alert) => alert,
            Err(e) => {
                warn!("Skipping corrupt alert row during replay: {}", e);
                continue;
            }
        };
        let event = match GatewayEvent::from_alert(&alert) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping alert {} with corrupt payload: {}", alert.id, e);
                continue;
            }
        };

        sink.deliver(&event).await?;
        mark_delivered(db, alert.id, user_id).await;
    }

    Ok(())
}

async fn mark_delivered(db: &Arc<Database>, alert_id: Uuid, user_id: Uuid) {
    let db = db.clone();
    let result = tokio::task::spawn_blocking(move || {
        db.mark_delivered(&alert_id.to_string(), &user_id.to_string())
    })
    .await;
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Failed to mark alert {} delivered for {}: {}", alert_id, user_id, e),
        Err(e) => warn!("mark_delivered join error: {}", e),
    }
}

async fn handle_command(registry: &Registry, db: &Arc<Database>, user_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::MarkRead { alert_id } => {
            let db = db.clone();
            let result = tokio::task::spawn_blocking(move || {
                db.mark_read(&alert_id.to_string(), &user_id.to_string())
            })
            .await;
            if let Ok(Err(e)) = result {
                warn!("{} mark_read {} failed: {}", user_id, alert_id, e);
            }
        }

        GatewayCommand::VideoCallStart { target_user_id, call_id, offer } => {
            info!("{} -> video_call:start to {}", user_id, target_user_id);
            let delivered = registry
                .send_to_user(
                    target_user_id,
                    GatewayEvent::VideoCallStart { from_user_id: user_id, call_id, offer },
                )
                .await;
            if !delivered {
                info!("video_call:start target {} not connected", target_user_id);
            }
        }

        GatewayCommand::VideoCallAccept { target_user_id, call_id, answer } => {
            info!("{} -> video_call:accept to {}", user_id, target_user_id);
            registry
                .send_to_user(
                    target_user_id,
                    GatewayEvent::VideoCallAccept { from_user_id: user_id, call_id, answer },
                )
                .await;
        }

        GatewayCommand::VideoCallEnd { target_user_id, call_id } => {
            info!("{} -> video_call:end to {}", user_id, target_user_id);
            registry
                .send_to_user(
                    target_user_id,
                    GatewayEvent::VideoCallEnd { from_user_id: user_id, call_id },
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_log_truncation_respects_char_boundaries() {
        // 199 ASCII bytes then a two-byte char straddling the 200-byte mark
        let mut text = "a".repeat(199);
        text.push('é');
        let clipped = truncate_for_log(&text, 200);
        assert_eq!(clipped.len(), 199);
        assert!(text.starts_with(clipped));

        assert_eq!(truncate_for_log("hello", 200), "hello");

        // Four-byte chars that divide the limit evenly are kept whole
        let wide = "\u{1F691}".repeat(60);
        let clipped = truncate_for_log(&wide, 200);
        assert_eq!(clipped.chars().count(), 50);
        assert_eq!(clipped.len(), 200);
    }

    struct RecordingSink {
        events: Vec<GatewayEvent>,
        fail_at: Option<usize>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { events: Vec::new(), fail_at: None }
        }
    }

    impl EventSink for RecordingSink {
        async fn deliver(&mut self, event: &GatewayEvent) -> anyhow::Result<()> {
            if self.fail_at == Some(self.events.len()) {
                anyhow::bail!("socket write failed");
            }
            self.events.push(event.clone());
            Ok(())
        }
    }

    fn seed_user(db: &Database) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), &format!("u-{}", &id.to_string()[..8]), "doctor")
            .unwrap();
        id
    }

    fn seed_emergency(db: &Database, origin: Uuid, recipient: Uuid, created_at: chrono::DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        db.create_alert(
            &id.to_string(),
            &origin.to_string(),
            "emergency",
            r#"{"message":"help","location":{"lat":12.9716,"lon":77.5946}}"#,
            created_at,
            &[recipient.to_string()],
        )
        .unwrap();
        id
    }

    fn statuses(db: &Database, alert_id: Uuid) -> Vec<String> {
        db.alert_recipients(&alert_id.to_string())
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect()
    }

    #[tokio::test]
    async fn test_replay_sends_most_recent_first_and_marks_delivered() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let origin = seed_user(&db);
        let recipient = seed_user(&db);

        let base = Utc::now();
        let older = seed_emergency(&db, origin, recipient, base);
        let newer = seed_emergency(&db, origin, recipient, base + Duration::seconds(5));

        let mut sink = RecordingSink::new();
        replay_pending(&mut sink, &db, recipient).await.unwrap();

        let ids: Vec<Uuid> = sink
            .events
            .iter()
            .map(|e| delivered_ref(e).unwrap())
            .collect();
        assert_eq!(ids, vec![newer, older]);
        assert_eq!(statuses(&db, newer), vec!["delivered"]);
        assert_eq!(statuses(&db, older), vec!["delivered"]);

        // A second subscribe finds nothing pending to replay.
        let mut sink = RecordingSink::new();
        replay_pending(&mut sink, &db, recipient).await.unwrap();
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn test_replay_aborts_on_write_failure() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let origin = seed_user(&db);
        let recipient = seed_user(&db);

        let base = Utc::now();
        let older = seed_emergency(&db, origin, recipient, base);
        let newer = seed_emergency(&db, origin, recipient, base + Duration::seconds(5));

        let mut sink = RecordingSink::new();
        sink.fail_at = Some(1);
        let err = replay_pending(&mut sink, &db, recipient).await;
        assert!(err.is_err());

        // The alert written before the failure is delivered; the one behind
        // the dead socket stays pending for the next connection.
        assert_eq!(statuses(&db, newer), vec!["delivered"]);
        assert_eq!(statuses(&db, older), vec!["pending"]);
    }

    #[tokio::test]
    async fn test_replay_skips_corrupt_payload_without_delivering_it() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let origin = seed_user(&db);
        let recipient = seed_user(&db);

        let base = Utc::now();
        let good = seed_emergency(&db, origin, recipient, base);
        let corrupt = Uuid::new_v4();
        db.create_alert(
            &corrupt.to_string(),
            &origin.to_string(),
            "emergency",
            r#"{"nonsense":true}"#,
            base + Duration::seconds(5),
            &[recipient.to_string()],
        )
        .unwrap();

        let mut sink = RecordingSink::new();
        replay_pending(&mut sink, &db, recipient).await.unwrap();

        assert_eq!(sink.events.len(), 1);
        assert_eq!(delivered_ref(&sink.events[0]), Some(good));
        assert_eq!(statuses(&db, good), vec!["delivered"]);
        assert_eq!(statuses(&db, corrupt), vec!["pending"]);
    }
}
