//! WebSocket stream of session notifications

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use super::ApiState;
use crate::session::Notification;

/// Build events router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/events", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.notifier.subscribe();

    tracing::info!("events WebSocket connected");

    // Current state first so the client can render immediately
    let snapshot = state.notifier.snapshot();
    let initial = Notification::State {
        state: snapshot.state,
        mode: snapshot.mode,
        active: snapshot.active,
    };
    if let Ok(text) = serde_json::to_string(&initial) {
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    let mut broadcast_task = tokio::spawn(async move {
        loop {
            let notification = match rx.recv().await {
                Ok(notification) => notification,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "events subscriber lagging");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if let Ok(text) = serde_json::to_string(&notification) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut broadcast_task => recv_task.abort(),
        _ = &mut recv_task => broadcast_task.abort(),
    }

    tracing::info!("events WebSocket disconnected");
}
