//! WebSocket handler for topology sync sessions

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Forward change messages to one client until either side goes away
async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let session = match state.broadcaster.register().await {
        Ok(session) => session,
        Err(e) => {
            warn!("failed to open sync session: {e:#}");
            return;
        }
    };
    let session_id = session.id;
    let mut updates = session.receiver;
    info!("sync session {session_id} connected");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = updates.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // Clients only listen; inbound traffic is limited to control frames
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    if let Err(e) = state.broadcaster.unregister(session_id).await {
        debug!("session {session_id} outlived the broadcaster: {e:#}");
    }
    info!("sync session {session_id} disconnected");
}
