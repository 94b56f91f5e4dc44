//! Connection protocol: the JSON message envelopes exchanged over a
//! WebSocket connection, and the handle used to reach one.
//!
//! Frames are text JSON of the form `{"event": "...", "data": ...}`.
//! Event names mirror the dashboard/merchant client vocabulary:
//! `join:office`, `join:merchant`, `join:courier`, `location:update`,
//! `location:all`, `location:received`, `connected`, `error`.

use crate::domain::types::{CourierId, CourierPosition, LocationUpdate, PackageId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Opaque identifier for a live connection (UUID v7)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages a client may send
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Office dashboard subscribing to every courier
    #[serde(rename = "join:office")]
    JoinOffice,
    /// Merchant viewer subscribing to a single package channel
    #[serde(rename = "join:merchant")]
    JoinMerchant {
        #[serde(default)]
        merchant_id: Option<i64>,
        #[serde(default)]
        package_id: Option<PackageId>,
    },
    /// Courier registering its connection; triggers no broadcast
    #[serde(rename = "join:courier")]
    JoinCourier {
        #[serde(default)]
        courier_id: Option<CourierId>,
    },
    /// Position update sent directly over the connection
    #[serde(rename = "location:update")]
    LocationUpdate(LocationUpdate),
}

/// Messages the relay sends to a client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    /// Greeting on connect
    #[serde(rename = "connected")]
    Connected {
        message: String,
        connection_id: ConnectionId,
    },
    /// A position broadcast, or the single-entry merchant join snapshot
    #[serde(rename = "location:update")]
    LocationUpdate(CourierPosition),
    /// One-time batch of all cached positions on office join
    #[serde(rename = "location:all")]
    LocationAll(Vec<CourierPosition>),
    /// Acknowledgement echoed to the sender of an accepted update
    #[serde(rename = "location:received")]
    LocationReceived(CourierPosition),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Result of pushing a message towards a connection's writer task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Writer queue full: the client is too slow, the message is dropped
    Dropped,
    /// Writer gone: the connection is closed
    Closed,
}

/// Handle through which server messages reach a connection.
///
/// Wraps the bounded sender feeding the connection's writer task.
/// Sends never block; a full queue drops the message rather than stall
/// the broadcast path.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn send(&self, message: ServerMessage) -> DeliveryOutcome {
        match self.tx.try_send(message) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) => DeliveryOutcome::Dropped,
            Err(TrySendError::Closed(_)) => DeliveryOutcome::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CourierId;

    #[test]
    fn test_client_message_join_office() {
        let msg: ClientMessage = serde_json::from_str(r#"{"event": "join:office"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::JoinOffice));
    }

    #[test]
    fn test_client_message_join_merchant() {
        let json = r#"{"event": "join:merchant", "data": {"merchant_id": 3, "package_id": 99}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::JoinMerchant { merchant_id, package_id } => {
                assert_eq!(merchant_id, Some(3));
                assert_eq!(package_id, Some(PackageId(99)));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_client_message_join_merchant_missing_fields() {
        let json = r#"{"event": "join:merchant", "data": {}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::JoinMerchant { merchant_id, package_id } => {
                assert!(merchant_id.is_none());
                assert!(package_id.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_client_message_location_update() {
        let json = r#"{
            "event": "location:update",
            "data": {"courier_id": 7, "latitude": 10.5, "longitude": 20.25, "package_id": 99}
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::LocationUpdate(update) => {
                assert_eq!(update.courier_id, CourierId(7));
                assert_eq!(update.package_id, Some(PackageId(99)));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_client_message_unknown_event_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event": "join:admin"}"#).is_err());
    }

    #[test]
    fn test_server_message_envelope_shape() {
        let msg = ServerMessage::Error { message: "courier_id required".to_string() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["message"], "courier_id required");
    }

    #[test]
    fn test_server_message_location_all() {
        let msg = ServerMessage::LocationAll(vec![]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "location:all");
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_handle_send_outcomes() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(ConnectionId::new(), tx);

        let msg = ServerMessage::Error { message: "x".to_string() };
        assert_eq!(handle.send(msg.clone()), DeliveryOutcome::Delivered);
        // Queue of one is now full
        assert_eq!(handle.send(msg.clone()), DeliveryOutcome::Dropped);

        rx.close();
        assert_eq!(handle.send(msg), DeliveryOutcome::Closed);
    }

    #[test]
    fn test_connection_ids_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
