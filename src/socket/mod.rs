// socket/mod.rs
pub mod directory;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::state::AppState;
use directory::ConnectionDirectory;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// `GET /ws?userId=...` — the live notification channel. The user id rides
/// on the handshake query string.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params.user_id, state.directory.clone()))
}

async fn handle_socket(socket: WebSocket, user_id: String, directory: Arc<ConnectionDirectory>) {
    info!("User {} connected", user_id);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    directory.register(&user_id, tx).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let relay_directory = directory.clone();
    let relay_user = user_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            if let Message::Text(text) = frame {
                relay_client_event(&relay_directory, &relay_user, &text).await;
            }
        }
    });

    // Either half closing tears down the connection.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    directory.unregister(&user_id).await;
    info!("User {} disconnected", user_id);
}

/// Relays client-sent payment events to the counterparty named in the
/// payload. Unknown events and frames without a recipient are dropped.
async fn relay_client_event(directory: &ConnectionDirectory, sender_id: &str, text: &str) {
    let frame: serde_json::Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            debug!("Unparseable frame from {}", sender_id);
            return;
        }
    };

    let event = frame.get("event").and_then(|e| e.as_str()).unwrap_or_default();
    let data = frame.get("data").cloned().unwrap_or(serde_json::Value::Null);
    let recipient = match data.get("recipientId").and_then(|r| r.as_str()) {
        Some(recipient) => recipient.to_string(),
        None => return,
    };

    let outbound = match event {
        "payment_initiated" => "payment_initiated",
        "payment_request_sent" => "payment_request_received",
        _ => {
            debug!("Unhandled client event {} from {}", event, sender_id);
            return;
        }
    };

    directory.emit_to_user(&recipient, outbound, data).await;
}
