//! End-to-end tests: sealpost clients talking to a live relay.
//!
//! Each test starts an in-process relay on a random port and drives it
//! through the library's `RemoteStore`, key manager and messenger.

use std::sync::Arc;
use std::time::Duration;

use sealpost::crypto::{CryptoEngine, KeyManager, Point, Scalar};
use sealpost::models::{InboxContent, InboxEntry};
use sealpost::store::{KeyStore, RemoteStore, Stores};
use sealpost::{Error, GroupKind, Messenger, Session, StoreError};
use sealpost_server::{handle_connection, ServerState};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Relay {
    url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn start_relay(state: ServerState) -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(state);

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let state = state.clone();
            tokio::spawn(async move {
                if let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await {
                    handle_connection(ws_stream, state).await;
                }
            });
        }
    });

    Relay {
        url: format!("ws://127.0.0.1:{}", port),
        handle,
    }
}

struct Client {
    session: Session,
    keys: KeyManager,
    messenger: Messenger,
}

async fn client(relay: &Relay, group: GroupKind, user_id: &str) -> Client {
    let store = RemoteStore::connect(&relay.url, user_id, None)
        .await
        .expect("Failed to connect to relay");
    let stores = Stores::from_backend(Arc::new(store));
    let engine = CryptoEngine::new(group.build());

    Client {
        session: Session::new(user_id),
        keys: KeyManager::new(stores.keys.clone(), engine.clone()),
        messenger: Messenger::new(stores, engine),
    }
}

async fn next_snapshot(rx: &mut mpsc::UnboundedReceiver<Vec<InboxEntry>>) -> Vec<InboxEntry> {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timeout waiting for inbox")
        .expect("Subscription closed")
}

async fn alice_and_bob(group: GroupKind) {
    let relay = start_relay(ServerState::new()).await;
    let alice = client(&relay, group, "alice").await;
    let bob = client(&relay, group, "bob").await;

    alice.keys.generate(&alice.session).await.unwrap();

    let err = alice.messenger.send(&alice.session, "bob", "hi").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    bob.keys.generate(&bob.session).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = bob
        .messenger
        .receive(&bob.session, move |entries| {
            let _ = tx.send(entries);
        })
        .await
        .unwrap();
    assert!(next_snapshot(&mut rx).await.is_empty());

    let sent = alice.messenger.send(&alice.session, "bob", "hi").await.unwrap();
    assert_eq!(sent.sender_id, "alice");
    assert!(sent.sent_at > 0);

    let inbox = next_snapshot(&mut rx).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender_id, "alice");
    assert_eq!(inbox[0].content, InboxContent::Decrypted("hi".into()));

    let err = bob.messenger.send(&bob.session, "bob", "x").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_alice_and_bob_over_relay_legacy() {
    alice_and_bob(GroupKind::Legacy).await;
}

#[tokio::test]
async fn test_alice_and_bob_over_relay_ristretto() {
    alice_and_bob(GroupKind::Ristretto).await;
}

#[tokio::test]
async fn test_keys_reload_on_new_connection() {
    let relay = start_relay(ServerState::new()).await;

    let public_key = {
        let alice = client(&relay, GroupKind::Legacy, "alice").await;
        alice.keys.generate(&alice.session).await.unwrap().public_key
    };

    let alice = client(&relay, GroupKind::Legacy, "alice").await;
    assert!(alice.keys.load(&alice.session).await.unwrap().is_ready());
    assert_eq!(alice.keys.public_key(&alice.session), Some(public_key));
}

#[tokio::test]
async fn test_private_partition_is_scoped_to_connection() {
    let relay = start_relay(ServerState::new()).await;
    let store = RemoteStore::connect(&relay.url, "mallory", None).await.unwrap();

    store.put_private_key("mallory", &Scalar::from(7u64)).await.unwrap();
    assert_eq!(
        store.get_private_key("mallory").await.unwrap(),
        Some(Scalar::from(7u64))
    );

    assert!(matches!(
        store.get_private_key("alice").await,
        Err(StoreError::Unauthorized(_))
    ));
    assert!(matches!(
        store.put_public_key("alice", &Point::from(1u64)).await,
        Err(StoreError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_token_required_by_relay() {
    let relay = start_relay(ServerState::with_access_token(Some("s3cret".into()))).await;

    let rejected = RemoteStore::connect(&relay.url, "alice", None).await;
    assert!(matches!(rejected, Err(StoreError::Unauthorized(_))));

    let accepted = RemoteStore::connect(&relay.url, "alice", Some("s3cret")).await;
    assert!(accepted.is_ok());
}

#[tokio::test]
async fn test_relay_timestamps_order_the_inbox() {
    let relay = start_relay(ServerState::new()).await;
    let alice = client(&relay, GroupKind::Legacy, "alice").await;
    let bob = client(&relay, GroupKind::Legacy, "bob").await;
    alice.keys.generate(&alice.session).await.unwrap();
    bob.keys.generate(&bob.session).await.unwrap();

    for text in ["one", "two", "three"] {
        alice.messenger.send(&alice.session, "bob", text).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = bob
        .messenger
        .receive(&bob.session, move |entries| {
            let _ = tx.send(entries);
        })
        .await
        .unwrap();

    let texts: Vec<String> = next_snapshot(&mut rx)
        .await
        .iter()
        .filter_map(|entry| entry.text().map(String::from))
        .collect();
    assert_eq!(texts, vec!["three", "two", "one"]);
}
