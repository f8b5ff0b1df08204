use sealpost::protocol::WsMessage;
use sealpost_server::{handle_message, ServerState};
use std::sync::Arc;
use tokio::sync::mpsc;

fn parse(json: &str) -> WsMessage {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn test_sender_spoofing_protection() {
    let state = Arc::new(ServerState::new());
    let (victim_tx, mut victim_rx) = mpsc::unbounded_channel();
    let (attacker_tx, mut attacker_rx) = mpsc::unbounded_channel();
    state.subscribe("victim", victim_tx);

    // Attacker "attacker" tries to append as "admin" with a forged timestamp
    let spoofed_json = r#"{
        "type": "append",
        "request_id": 1,
        "recipient_id": "victim",
        "envelope": {
            "sender_id": "admin",
            "ciphertext": { "c1": "5", "c2": "xx" },
            "sent_at": 1
        }
    }"#;

    // "attacker" is the authenticated connection
    handle_message(spoofed_json, "attacker", &state, &attacker_tx);

    match parse(&attacker_rx.recv().await.unwrap()) {
        WsMessage::Appended { request_id, envelope } => {
            assert_eq!(request_id, 1);
            assert_eq!(envelope.sender_id, "attacker");
            assert!(envelope.sent_at > 1, "Relay should assign its own timestamp");
        }
        other => panic!("Expected Appended, got {:?}", other),
    }

    match parse(&victim_rx.recv().await.unwrap()) {
        WsMessage::Inbox { user_id, envelopes } => {
            assert_eq!(user_id, "victim");
            assert_eq!(envelopes.len(), 1);
            assert_eq!(envelopes[0].sender_id, "attacker", "Spoofed sender ID 'admin' persisted!");
        }
        other => panic!("Expected Inbox push, got {:?}", other),
    }
}

#[tokio::test]
async fn test_private_key_is_scoped_to_connection() {
    let state = Arc::new(ServerState::new());
    let (tx, mut rx) = mpsc::unbounded_channel();

    handle_message(
        r#"{"type":"put_private_key","request_id":1,"private_key":"424242"}"#,
        "alice",
        &state,
        &tx,
    );
    assert_eq!(parse(&rx.recv().await.unwrap()), WsMessage::Ack { request_id: 1 });

    // "mallory" asks for a private key; the relay answers with her own (none)
    handle_message(r#"{"type":"get_private_key","request_id":2}"#, "mallory", &state, &tx);
    assert_eq!(
        parse(&rx.recv().await.unwrap()),
        WsMessage::PrivateKey {
            request_id: 2,
            private_key: None
        }
    );

    handle_message(r#"{"type":"get_private_key","request_id":3}"#, "alice", &state, &tx);
    match parse(&rx.recv().await.unwrap()) {
        WsMessage::PrivateKey { private_key, .. } => {
            assert_eq!(private_key.unwrap().to_string(), "424242");
        }
        other => panic!("Expected PrivateKey, got {:?}", other),
    }
}

#[tokio::test]
async fn test_public_key_written_only_for_self() {
    let state = Arc::new(ServerState::new());
    let (tx, mut rx) = mpsc::unbounded_channel();

    // The message carries no target identity, so "mallory" can only publish her own key
    handle_message(
        r#"{"type":"put_public_key","request_id":1,"public_key":"99"}"#,
        "mallory",
        &state,
        &tx,
    );
    assert_eq!(parse(&rx.recv().await.unwrap()), WsMessage::Ack { request_id: 1 });
    assert!(state.public_key("alice").is_none());
    assert_eq!(state.public_key("mallory").unwrap().to_string(), "99");
}

#[tokio::test]
async fn test_server_only_messages_are_rejected() {
    let state = Arc::new(ServerState::new());
    let (tx, mut rx) = mpsc::unbounded_channel();

    // A client cannot inject inbox snapshots for another user
    handle_message(
        r#"{"type":"inbox","user_id":"victim","envelopes":[]}"#,
        "attacker",
        &state,
        &tx,
    );
    assert!(matches!(
        parse(&rx.recv().await.unwrap()),
        WsMessage::Error { request_id: None, .. }
    ));

    handle_message("not json", "attacker", &state, &tx);
    assert!(matches!(parse(&rx.recv().await.unwrap()), WsMessage::Error { .. }));
}
