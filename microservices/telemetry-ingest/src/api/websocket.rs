//! WebSocket handler for live readings

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use super::AppState;
use crate::fanout::TopicClass;

/// WebSocket upgrade handler for `/ws/{subscription}`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(subscription): Path<String>,
) -> impl IntoResponse {
    let topic = TopicClass::parse(&subscription);
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic))
}

/// WebSocket upgrade handler for `/ws`, subscribed to everything
pub async fn ws_all_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, TopicClass::All))
}

/// Forward hub payloads to the socket until either side goes away
async fn handle_socket(socket: WebSocket, state: AppState, topic: TopicClass) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.hub.subscribe(topic);
    let connection_id = subscription.id;

    loop {
        tokio::select! {
            payload = subscription.rx.recv() => {
                let Some(payload) = payload else { break };
                let send = sender.send(Message::Text((&*payload).into()));
                match tokio::time::timeout(state.broadcast_timeout, send).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(connection_id = %connection_id, error = %e, "Socket send failed");
                        break;
                    }
                    Err(_) => {
                        debug!(connection_id = %connection_id, "Socket send timed out");
                        break;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(connection_id = %connection_id, error = %e, "Socket receive failed");
                        break;
                    }
                    // Viewers only listen; anything they send is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(&connection_id);
}
