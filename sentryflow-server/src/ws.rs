//! `/ui-events` — the outbound UI WebSocket endpoint (§6). Any number of UI
//! clients may connect; each connection gets its own task that drains the
//! shared `EventCache` broadcast channel and writes frames until the
//! client disconnects or a write fails, at which point that client is
//! dropped silently (a lagged receiver is treated the same way: resync by
//! continuing to read, never by killing the whole fan-out).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;

use crate::state::AppState;

pub async fn ui_events_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let receiver = state.events.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, receiver))
}

async fn handle_socket(socket: WebSocket, mut receiver: broadcast::Receiver<sentryflow_model::Event>) {
    let (mut sender, _incoming) = socket.split();

    loop {
        match receiver.recv().await {
            Ok(event) => {
                let frame = json!({
                    "type": event.event_type,
                    "timestamp": event.timestamp,
                    "data": event.data,
                });
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "ui-events subscriber lagged, continuing");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
