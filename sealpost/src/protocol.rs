use serde::{Deserialize, Serialize};

use crate::crypto::{Point, Scalar};
use crate::models::Envelope;

/// WebSocket message types (shared between relay and client).
///
/// Requests carry a client-chosen `request_id` echoed by the matching
/// response. `Inbox` is pushed by the relay without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "connect")]
    Connect {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    #[serde(rename = "auth_response")]
    AuthResponse { success: bool, message: String },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        request_id: Option<u64>,
        message: String,
    },
    #[serde(rename = "ack")]
    Ack { request_id: u64 },

    // Private partition: always scoped to the authenticated identity
    #[serde(rename = "put_private_key")]
    PutPrivateKey { request_id: u64, private_key: Scalar },
    #[serde(rename = "get_private_key")]
    GetPrivateKey { request_id: u64 },
    #[serde(rename = "private_key")]
    PrivateKey {
        request_id: u64,
        private_key: Option<Scalar>,
    },

    // Public partition
    #[serde(rename = "put_public_key")]
    PutPublicKey { request_id: u64, public_key: Point },
    #[serde(rename = "get_public_key")]
    GetPublicKey { request_id: u64, user_id: String },
    #[serde(rename = "public_key")]
    PublicKey {
        request_id: u64,
        user_id: String,
        public_key: Option<Point>,
    },

    // Inbox streams
    #[serde(rename = "append")]
    Append {
        request_id: u64,
        recipient_id: String,
        envelope: Envelope,
    },
    #[serde(rename = "appended")]
    Appended { request_id: u64, envelope: Envelope },
    #[serde(rename = "subscribe")]
    Subscribe { request_id: u64 },
    #[serde(rename = "inbox")]
    Inbox {
        user_id: String,
        envelopes: Vec<Envelope>,
    },
}

impl WsMessage {
    /// Request id of a response, if this message answers one
    pub fn response_id(&self) -> Option<u64> {
        match self {
            WsMessage::Ack { request_id }
            | WsMessage::PrivateKey { request_id, .. }
            | WsMessage::PublicKey { request_id, .. }
            | WsMessage::Appended { request_id, .. } => Some(*request_id),
            WsMessage::Error { request_id, .. } => *request_id,
            _ => None,
        }
    }
}
