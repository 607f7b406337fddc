//! Connection gateway
//!
//! Accepts WebSocket transports, assigns peer identity, feeds inbound
//! frames to the router and forwards broadcast events. One task per
//! connection; whichever way the loop exits, the disconnect sequence runs
//! exactly once.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::engine::NegotiationEngine;
use crate::signaling::ServerFrame;
use crate::state::AppState;

/// WebSocket upgrade handler for the signaling endpoint
pub async fn ws_handler<E: NegotiationEngine>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<E>>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<E: NegotiationEngine>(socket: WebSocket, state: Arc<AppState<E>>) {
    let (mut sender, mut receiver) = socket.split();
    let router = state.router.clone();

    // Subscribe before registering so no broadcast between the two is lost
    let mut event_rx = router.notifier().subscribe();
    let peer_id = router.register_peer();

    if send_frames(&mut sender, &[ServerFrame::Welcome { id: peer_id }])
        .await
        .is_err()
    {
        warn!("Failed to send welcome to {}", peer_id);
        router.handle_disconnect(peer_id).await;
        return;
    }

    loop {
        tokio::select! {
            // Inbound frame from this peer
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = router.handle_frame(peer_id, &text).await;
                        if send_frames(&mut sender, &replies).await.is_err() {
                            warn!("Failed to write reply to {}, disconnecting", peer_id);
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary frame from {}", peer_id);
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed by {}", peer_id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error from {}: {}", peer_id, e);
                        break;
                    }
                }
            }

            // Broadcast event for every connected peer
            event = event_rx.recv() => {
                match event {
                    Ok(frame) => {
                        if sender.send(Message::Text(frame.to_string())).await.is_err() {
                            warn!("Failed to push event to {}, disconnecting", peer_id);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Peer {} lagged by {} events", peer_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    router.handle_disconnect(peer_id).await;
}

async fn send_frames(
    sender: &mut SplitSink<WebSocket, Message>,
    frames: &[ServerFrame],
) -> Result<(), axum::Error> {
    for frame in frames {
        match serde_json::to_string(frame) {
            Ok(text) => sender.send(Message::Text(text)).await?,
            Err(e) => warn!("Failed to serialize reply frame: {}", e),
        }
    }
    Ok(())
}
