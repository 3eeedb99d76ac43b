use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    /// Only forward notifications addressed to this user.
    pub user_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();
    let mut notifications = BroadcastStream::new(state.notification_tx.subscribe());

    info!(user_id = ?user_id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(item) = notifications.next().await {
            let notification = match item {
                Ok(notification) => notification,
                Err(err) => {
                    warn!(error = %err, "websocket client lagging; notifications dropped");
                    continue;
                }
            };
            if user_id.is_some_and(|id| id != notification.user_id) {
                continue;
            }

            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    until_either(send_task, recv_task).await;

    info!(user_id = ?user_id, "websocket client disconnected");
}

/// Waits for the first task to finish and aborts the other.
async fn until_either(mut a: JoinHandle<()>, mut b: JoinHandle<()>) {
    tokio::select! {
        _ = &mut a => b.abort(),
        _ = &mut b => a.abort(),
    }
}
