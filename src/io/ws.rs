//! WebSocket connection lifecycle
//!
//! Each connection gets a reader loop plus a writer task fed by a
//! bounded queue. Broadcast pushes never wait on a socket: a slow
//! client's queue fills and messages are dropped for that client only.
//! No authentication; clients join channels based on their role.

use crate::domain::protocol::{ClientMessage, ConnectionHandle, ConnectionId, ServerMessage};
use crate::domain::types::RelayError;
use crate::io::http::AppState;
use crate::services::engine::BroadcastEngine;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(state.config.ws_max_message_size())
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config.ws_send_buffer());
    let handle = ConnectionHandle::new(connection_id.clone(), tx);

    state.metrics.record_connection_opened();
    info!(connection_id = %connection_id, "client_connected");

    let (mut sink, mut stream) = socket.split();

    // Writer task: serialize queued server messages onto the socket
    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    debug!(connection_id = %writer_id, error = %e, "serialize_failed");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(connection_id = %writer_id, error = %e, "ws_send_failed");
                break;
            }
        }
    });

    handle.send(ServerMessage::Connected {
        message: "connected to courier location relay".to_string(),
        connection_id: connection_id.clone(),
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_message(&state.engine, &handle, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            // Ping/pong are answered by the protocol layer; binary frames
            // are not part of this protocol
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "ws_receive_failed");
                break;
            }
        }
    }

    state.engine.disconnect(&connection_id);
    state.metrics.record_connection_closed();
    drop(handle);
    writer.abort();
    info!(connection_id = %connection_id, "client_disconnected");
}

async fn handle_client_message(engine: &BroadcastEngine, handle: &ConnectionHandle, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(connection_id = %handle.id(), error = %e, "unrecognized_client_message");
            handle.send(ServerMessage::Error { message: format!("unrecognized message: {e}") });
            return;
        }
    };

    match message {
        ClientMessage::JoinOffice => {
            engine.join_office(handle);
        }
        ClientMessage::JoinMerchant { merchant_id, package_id } => {
            let (Some(merchant_id), Some(package_id)) = (merchant_id, package_id) else {
                handle.send(ServerMessage::Error {
                    message: RelayError::MissingField("merchant_id and package_id").to_string(),
                });
                return;
            };
            debug!(connection_id = %handle.id(), merchant_id, "merchant_join");
            engine.join_merchant(handle, package_id);
        }
        ClientMessage::JoinCourier { courier_id } => {
            let Some(courier_id) = courier_id else {
                handle.send(ServerMessage::Error {
                    message: RelayError::MissingField("courier_id").to_string(),
                });
                return;
            };
            engine.register_courier(courier_id, handle);
        }
        ClientMessage::LocationUpdate(update) => match engine.handle_update(update).await {
            Ok(position) => {
                handle.send(ServerMessage::LocationReceived(position));
            }
            Err(e) => {
                handle.send(ServerMessage::Error { message: e.to_string() });
            }
        },
    }
}
