use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::warn;
use uuid::Uuid;

use lifeline_types::events::GatewayEvent;

struct LiveConnection {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Process-wide registry of live connections, created at startup and
/// injected into everything that publishes. A user may hold several open
/// connections (tabs, devices); each gets its own channel. Events go
/// through unbounded per-connection channels, so nothing batches or delays
/// an emergency push.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    channels: RwLock<HashMap<Uuid, Vec<LiveConnection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner { channels: RwLock::new(HashMap::new()) }),
        }
    }

    /// Bind a new connection for a user. Returns (conn_id, receiver).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(LiveConnection { conn_id, tx });
        (conn_id, rx)
    }

    /// Drop one connection. Other connections of the same user are untouched.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.channels.write().await;
        if let Some(conns) = channels.get_mut(&user_id) {
            conns.retain(|c| c.conn_id != conn_id);
            if conns.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Push an event to every live connection of a user. Returns true when
    /// at least one connection accepted it; a send failure means the
    /// connection is stale and it is pruned, not an error of the publish.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let mut channels = self.inner.channels.write().await;
        let Some(conns) = channels.get_mut(&user_id) else {
            return false;
        };

        let before = conns.len();
        conns.retain(|c| c.tx.send(event.clone()).is_ok());
        let delivered = !conns.is_empty();
        if conns.len() < before {
            warn!(
                "Pruned {} stale connection(s) for user {}",
                before - conns.len(),
                user_id
            );
        }
        if conns.is_empty() {
            channels.remove(&user_id);
        }
        delivered
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, |c| c.len())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
