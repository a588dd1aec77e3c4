use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Chat relay endpoint. Inbound frames are logged and dropped; nothing is
/// persisted or broadcast.
pub async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(handle_connection)
}

async fn handle_connection(mut socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    info!(%connection_id, "chat connection opened");

    while let Some(frame) = socket.recv().await {
        match frame {
            Ok(Message::Text(text)) => {
                info!(%connection_id, bytes = text.len(), "chat message received");
                debug!(%connection_id, message = %text, "chat message body");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(%connection_id, error = %err, "chat connection error");
                break;
            }
        }
    }

    info!(%connection_id, "chat connection closed");
}
