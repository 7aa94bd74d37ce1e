//! WebSocket progress stream.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};

use crate::progress::ProgressHub;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/progress/ws", get(progress_ws))
}

async fn progress_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = Arc::clone(state.engine.progress());
    ws.on_upgrade(move |socket| stream_progress(socket, hub))
}

/// Forward every progress snapshot to an established WebSocket.
///
/// The stream starts with the latest snapshot and ends when the client
/// closes the socket or the session shuts down.
pub async fn stream_progress(socket: WebSocket, hub: Arc<ProgressHub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (subscription, mut rx) = hub.subscribe();

    tracing::info!(subscription = %subscription, "Progress stream opened");

    let send_task = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            match serde_json::to_string(&progress) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send progress: {}", e);
                        return;
                    }
                }
                Err(e) => tracing::error!("Failed to serialize progress: {}", e),
            }
        }
        // hub cleared on shutdown
        let _ = ws_sender.close().await;
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(subscription = %subscription, "WebSocket error: {}", e);
                break;
            }
        }
    }

    hub.unsubscribe(&subscription);
    send_task.abort();

    tracing::info!(
        subscription = %subscription,
        subscribers = hub.subscriber_count(),
        "Progress stream closed"
    );
}
