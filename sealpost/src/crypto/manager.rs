use std::sync::Arc;

use tracing::{debug, info};

use super::engine::CryptoEngine;
use super::types::{KeyPair, Point};
use crate::error::{Error, Result};
use crate::session::{KeyState, Session};
use crate::store::KeyStore;

/// Generates, persists and loads the local identity's key pair.
///
/// Drives the NO_KEY -> KEY_READY state machine held by a [`Session`].
/// There is no transition back to NO_KEY.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    engine: CryptoEngine,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStore>, engine: CryptoEngine) -> Self {
        Self { store, engine }
    }

    /// Generate a fresh key pair and persist both halves.
    ///
    /// Only valid from NO_KEY. The public half is written before the private
    /// half and the two writes are not atomic: a failure between them leaves
    /// a published public key with no private counterpart. On any failure
    /// the session stays in NO_KEY.
    pub async fn generate(&self, session: &Session) -> Result<KeyPair> {
        if session.is_key_ready() {
            return Err(Error::Validation(format!(
                "key pair already loaded for {}",
                session.identity()
            )));
        }

        let private_key = self.engine.group().random_scalar();
        let pair = self.engine.key_pair(private_key)?;
        let identity = session.identity();

        debug!(user_id = %identity, "Publishing public key");
        self.store.put_public_key(identity, &pair.public_key).await?;

        debug!(user_id = %identity, "Storing private key");
        self.store.put_private_key(identity, &pair.private_key).await?;

        session.set_ready(pair.clone());
        info!(user_id = %identity, group = self.engine.group().name(), "Key pair generated");
        Ok(pair)
    }

    /// Load the private key from the Key Store, if one exists.
    ///
    /// Idempotent. Leaves the session in NO_KEY when nothing is stored.
    pub async fn load(&self, session: &Session) -> Result<KeyState> {
        let identity = session.identity();

        match self.store.get_private_key(identity).await? {
            Some(private_key) => {
                let pair = self.engine.key_pair(private_key)?;
                session.set_ready(pair);
                info!(user_id = %identity, "Private key loaded into memory");
            }
            None => {
                info!(user_id = %identity, "No stored key pair");
            }
        }

        Ok(session.key_state())
    }

    /// Public key of the resident key pair
    pub fn public_key(&self, session: &Session) -> Option<Point> {
        session.key_pair().map(|pair| pair.public_key)
    }
}
