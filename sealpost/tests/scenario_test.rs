//! End-to-end messaging scenarios over the local SQLite backend.

use std::sync::Arc;
use std::time::Duration;

use sealpost::crypto::{CryptoEngine, KeyManager};
use sealpost::models::{InboxContent, InboxEntry};
use sealpost::store::{self, SqliteStore, Stores};
use sealpost::{Backend, Config, Error, GroupKind, KeyState, Messenger, Session};
use tokio::sync::mpsc;

struct Device {
    session: Session,
    keys: KeyManager,
    messenger: Messenger,
}

fn device(stores: &Stores, group: GroupKind, identity: &str) -> Device {
    let engine = CryptoEngine::new(group.build());
    Device {
        session: Session::new(identity),
        keys: KeyManager::new(stores.keys.clone(), engine.clone()),
        messenger: Messenger::new(stores.clone(), engine),
    }
}

async fn next_snapshot(rx: &mut mpsc::UnboundedReceiver<Vec<InboxEntry>>) -> Vec<InboxEntry> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for inbox snapshot")
        .expect("subscription closed")
}

async fn run_alice_and_bob(group: GroupKind) {
    let stores = Stores::from_backend(Arc::new(
        SqliteStore::open_in_memory(Duration::from_millis(20)).unwrap(),
    ));
    let alice = device(&stores, group, "alice");
    let bob = device(&stores, group, "bob");

    alice.keys.generate(&alice.session).await.unwrap();

    // Bob has no published key yet
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
    assert_eq!(sent.ciphertext.c2.chars().count(), 2);

    let inbox = next_snapshot(&mut rx).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender_id, "alice");
    assert_eq!(inbox[0].content, InboxContent::Decrypted("hi".to_string()));

    // Sending to yourself is refused before any storage call
    let err = bob.messenger.send(&bob.session, "bob", "x").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_alice_and_bob_legacy() {
    run_alice_and_bob(GroupKind::Legacy).await;
}

#[tokio::test]
async fn test_alice_and_bob_ristretto() {
    run_alice_and_bob(GroupKind::Ristretto).await;
}

#[tokio::test]
async fn test_keys_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        backend: Backend::Local {
            db_path: dir.path().join("sealpost.db"),
        },
        poll_interval: Duration::from_millis(20),
        ..Config::default()
    };

    let public_key = {
        let stores = store::open(&config, "alice").await.unwrap();
        let alice = device(&stores, config.group, "alice");
        assert_eq!(alice.keys.load(&alice.session).await.unwrap(), KeyState::NoKey);
        alice.keys.generate(&alice.session).await.unwrap().public_key
    };

    let stores = store::open(&config, "alice").await.unwrap();
    let alice = device(&stores, config.group, "alice");
    let state = alice.keys.load(&alice.session).await.unwrap();
    assert!(state.is_ready());
    assert_eq!(alice.keys.public_key(&alice.session), Some(public_key));

    // A second generate on a ready session is rejected
    let err = alice.keys.generate(&alice.session).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_conversation_is_newest_first() {
    let stores = Stores::from_backend(Arc::new(
        SqliteStore::open_in_memory(Duration::from_millis(20)).unwrap(),
    ));
    let alice = device(&stores, GroupKind::Legacy, "alice");
    let carol = device(&stores, GroupKind::Legacy, "carol");
    let bob = device(&stores, GroupKind::Legacy, "bob");
    for d in [&alice, &carol, &bob] {
        d.keys.generate(&d.session).await.unwrap();
    }

    alice.messenger.send(&alice.session, "bob", "first").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    carol.messenger.send(&carol.session, "bob", "second").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    alice.messenger.send(&alice.session, "bob", "third").await.unwrap();

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
    assert_eq!(texts, vec!["third", "second", "first"]);
}
