use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sealpost::models::input::MAX_USER_ID_LENGTH;
use sealpost::protocol::WsMessage;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::state::ServerState;

/// Time a new connection has to send its `connect` message
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection
pub async fn handle_connection(ws_stream: WebSocketStream<TcpStream>, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Wait for Connect message to authenticate
    let user_id = match wait_for_connect(&mut ws_receiver, &state).await {
        Ok(id) => id,
        Err(reason) => {
            warn!("Connection rejected: {}", reason);
            let rejection = WsMessage::AuthResponse {
                success: false,
                message: reason,
            };
            if let Ok(json) = serde_json::to_string(&rejection) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    // Create channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    info!("User connected: {}", user_id);

    let auth_response = WsMessage::AuthResponse {
        success: true,
        message: "Connected to relay".to_string(),
    };
    match serde_json::to_string(&auth_response) {
        Ok(json) => {
            if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                error!("Failed to send auth response to {}: {}", user_id, e);
            }
        }
        Err(e) => {
            error!("Failed to serialize auth response for {}: {}", user_id, e);
        }
    }

    // Spawn task to forward messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            res = ws_receiver.next() => {
                match res {
                    Some(Ok(Message::Text(text))) => {
                        handle_message(&text, &user_id, &state, &tx);
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("User {} sent close frame", user_id);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error for user {}: {}", user_id, e);
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended for user {}", user_id);
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut send_task => {
                info!("Send task finished for user {} (likely connection lost)", user_id);
                break;
            }
        }
    }

    // Cleanup
    send_task.abort();
    state.unsubscribe(&user_id, &tx);

    info!("User disconnected: {}", user_id);
}

/// Wait for the Connect message from a new connection and check it
async fn wait_for_connect(
    receiver: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    state: &ServerState,
) -> Result<String, String> {
    let connect = tokio::time::timeout(AUTH_TIMEOUT, async {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(text)) = result {
                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Connect { user_id, token }) => return Some((user_id, token)),
                    Ok(_) => warn!("Expected connect message before anything else"),
                    Err(e) => warn!("Failed to parse Connect message: {}", e),
                }
            }
        }
        None
    });

    let (user_id, token) = match connect.await {
        Ok(Some(found)) => found,
        Ok(None) => return Err("connection closed before authentication".to_string()),
        Err(_) => return Err("authentication timeout".to_string()),
    };

    let user_id = user_id.trim().to_string();
    if user_id.is_empty() || user_id.chars().count() > MAX_USER_ID_LENGTH {
        return Err("invalid user id".to_string());
    }

    if let Some(expected) = state.access_token() {
        match token {
            Some(received) if received == expected => {}
            Some(_) => return Err(format!("invalid token for {}", user_id)),
            None => return Err(format!("no token provided for {}", user_id)),
        }
    }

    Ok(user_id)
}

fn reply(tx: &mpsc::UnboundedSender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => error!("Failed to serialize reply: {}", e),
    }
}

fn reject(tx: &mpsc::UnboundedSender<String>, request_id: Option<u64>, message: impl Into<String>) {
    reply(
        tx,
        &WsMessage::Error {
            request_id,
            message: message.into(),
        },
    );
}

/// Handle an incoming message from an authenticated client.
///
/// Responses go to `reply_tx`, the sending connection. Key writes and the
/// private partition are always scoped to `user_id`.
pub fn handle_message(
    text: &str,
    user_id: &str,
    state: &ServerState,
    reply_tx: &mpsc::UnboundedSender<String>,
) {
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse message from {}: {}", user_id, e);
            reject(reply_tx, None, "malformed message");
            return;
        }
    };

    match msg {
        WsMessage::PutPrivateKey {
            request_id,
            private_key,
        } => {
            state.put_private_key(user_id, private_key);
            debug!("Stored private key for {}", user_id);
            reply(reply_tx, &WsMessage::Ack { request_id });
        }
        WsMessage::GetPrivateKey { request_id } => {
            reply(
                reply_tx,
                &WsMessage::PrivateKey {
                    request_id,
                    private_key: state.private_key(user_id),
                },
            );
        }
        WsMessage::PutPublicKey {
            request_id,
            public_key,
        } => {
            state.put_public_key(user_id, public_key);
            info!("Published public key for {}", user_id);
            reply(reply_tx, &WsMessage::Ack { request_id });
        }
        WsMessage::GetPublicKey {
            request_id,
            user_id: target,
        } => {
            let public_key = state.public_key(&target);
            reply(
                reply_tx,
                &WsMessage::PublicKey {
                    request_id,
                    user_id: target,
                    public_key,
                },
            );
        }
        WsMessage::Append {
            request_id,
            recipient_id,
            mut envelope,
        } => {
            let recipient_id = recipient_id.trim();
            if recipient_id.is_empty() {
                reject(reply_tx, Some(request_id), "recipient_id is required");
                return;
            }

            // Enforce sender identity to prevent spoofing; the relay clock orders inboxes
            envelope.sender_id = user_id.to_string();
            envelope.sent_at = chrono::Utc::now().timestamp_millis();

            if state.append(recipient_id, envelope.clone()).is_none() {
                reject(
                    reply_tx,
                    Some(request_id),
                    format!("inbox for {} is full", recipient_id),
                );
                return;
            }
            reply(reply_tx, &WsMessage::Appended { request_id, envelope });
            push_inbox(state, recipient_id);
        }
        WsMessage::Subscribe { request_id } => {
            state.subscribe(user_id, reply_tx.clone());
            debug!(
                "{} subscribed to inbox pushes ({} connections)",
                user_id,
                state.subscriber_count(user_id)
            );
            reply(reply_tx, &WsMessage::Ack { request_id });
            reply(
                reply_tx,
                &WsMessage::Inbox {
                    user_id: user_id.to_string(),
                    envelopes: state.inbox(user_id),
                },
            );
        }
        WsMessage::Connect { .. } => {
            // Already authenticated, ignore
        }
        other => {
            // Server-only messages
            warn!("Unexpected message from {}: {:?}", user_id, other);
            reject(reply_tx, other.response_id(), "unexpected message type");
        }
    }
}

/// Send the full inbox of `user_id` to its subscribed connections
fn push_inbox(state: &ServerState, user_id: &str) {
    let snapshot = WsMessage::Inbox {
        user_id: user_id.to_string(),
        envelopes: state.inbox(user_id),
    };
    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            if !state.send_to_subscribers(user_id, &json) {
                debug!("No live subscriber for {}", user_id);
            }
        }
        Err(e) => error!("Failed to serialize inbox for {}: {}", user_id, e),
    }
}
