// socket/directory.rs
use std::collections::HashMap;

use axum::extract::ws::Message;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::debug;

pub type ConnectionHandle = UnboundedSender<Message>;

/// Live routing table from user id to at most one WebSocket handle.
///
/// Process-local and rebuilt empty on restart. Delivery through it is
/// best-effort only: a user without a live handle simply misses the event,
/// and the status-polling path covers the gap.
#[derive(Default)]
pub struct ConnectionDirectory {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user's handle and rebroadcasts the roster. A reconnect
    /// replaces the previous handle.
    pub async fn register(&self, user_id: &str, handle: ConnectionHandle) {
        self.connections
            .write()
            .await
            .insert(user_id.to_string(), handle);
        self.broadcast_online_users().await;
    }

    pub async fn unregister(&self, user_id: &str) {
        self.connections.write().await.remove(user_id);
        self.broadcast_online_users().await;
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Sends the full `getOnlineUsers` roster to every connection. Always a
    /// complete snapshot, never a diff.
    pub async fn broadcast_online_users(&self) {
        let connections = self.connections.read().await;
        let roster: Vec<&String> = connections.keys().collect();
        let frame = event_frame("getOnlineUsers", json!(roster));
        for handle in connections.values() {
            let _ = handle.send(frame.clone());
        }
    }

    /// Fire-and-forget delivery to one user. Returns whether a live handle
    /// accepted the frame; `false` means the event was dropped.
    pub async fn emit_to_user(&self, user_id: &str, event: &str, payload: serde_json::Value) -> bool {
        let connections = self.connections.read().await;
        match connections.get(user_id) {
            Some(handle) => handle.send(event_frame(event, payload)).is_ok(),
            None => {
                debug!("No live connection for {}, dropping {}", user_id, event);
                false
            }
        }
    }
}

/// Wire format for every server-to-client frame.
fn event_frame(event: &str, data: serde_json::Value) -> Message {
    Message::Text(json!({ "event": event, "data": data }).to_string())
}
