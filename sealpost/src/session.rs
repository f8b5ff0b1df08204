use std::sync::Arc;

use tokio::sync::watch;

use crate::crypto::KeyPair;

/// Key lifecycle state for one identity within a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyState {
    /// No key pair generated or loaded yet
    #[default]
    NoKey,
    /// Key pair resident in memory and persisted
    KeyReady(KeyPair),
}

impl KeyState {
    pub fn is_ready(&self) -> bool {
        matches!(self, KeyState::KeyReady(_))
    }
}

/// Session context for the local identity.
///
/// Passed explicitly to every core operation. Clones share the same key
/// slot, so a running inbox subscription sees a key loaded afterwards.
#[derive(Debug, Clone)]
pub struct Session {
    identity: Arc<str>,
    key: Arc<watch::Sender<KeyState>>,
}

impl Session {
    pub fn new(identity: impl Into<String>) -> Self {
        let (key, _) = watch::channel(KeyState::NoKey);
        Self {
            identity: Arc::from(identity.into().trim()),
            key: Arc::new(key),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Snapshot of the current key state
    pub fn key_state(&self) -> KeyState {
        self.key.borrow().clone()
    }

    pub fn is_key_ready(&self) -> bool {
        self.key.borrow().is_ready()
    }

    pub fn key_pair(&self) -> Option<KeyPair> {
        match &*self.key.borrow() {
            KeyState::KeyReady(pair) => Some(pair.clone()),
            KeyState::NoKey => None,
        }
    }

    /// Notified every time a key pair is installed
    pub fn watch_key(&self) -> watch::Receiver<KeyState> {
        self.key.subscribe()
    }

    pub(crate) fn set_ready(&self, pair: KeyPair) {
        self.key.send_replace(KeyState::KeyReady(pair));
    }
}
