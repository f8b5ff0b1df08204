use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::crypto::CryptoEngine;
use crate::error::{Error, Result};
use crate::models::input::{SendInput, ValidateExt};
use crate::models::{Envelope, InboxContent, InboxEntry, InboxItem};
use crate::session::{KeyState, Session};
use crate::store::{KeyStore, MessageStore, Stores, Subscription};

/// Sends encrypted messages and turns inbox snapshots into readable entries.
pub struct Messenger {
    keys: Arc<dyn KeyStore>,
    messages: Arc<dyn MessageStore>,
    engine: CryptoEngine,
}

impl Messenger {
    pub fn new(stores: Stores, engine: CryptoEngine) -> Self {
        Self {
            keys: stores.keys,
            messages: stores.messages,
            engine,
        }
    }

    /// Encrypt `plaintext` for `recipient_id` and append it to their inbox.
    ///
    /// All validation happens before any store call.
    pub async fn send(&self, session: &Session, recipient_id: &str, plaintext: &str) -> Result<Envelope> {
        let input = SendInput::new(recipient_id, plaintext);
        input.validate_input().map_err(Error::Validation)?;

        if !session.is_key_ready() {
            return Err(Error::Validation(
                "local key pair is not ready; generate or load it first".to_string(),
            ));
        }
        if input.recipient_id == session.identity() {
            return Err(Error::Validation(
                "cannot send a message to yourself".to_string(),
            ));
        }

        let recipient = input.recipient_id.as_str();
        let public_key = self
            .keys
            .get_public_key(recipient)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no public key for {}", recipient)))?;

        let ciphertext = self.engine.encrypt(&input.message, &public_key)?;
        let envelope = Envelope {
            sender_id: session.identity().to_string(),
            ciphertext,
            sent_at: chrono::Utc::now().timestamp_millis(),
        };

        let stored = self.messages.append(recipient, envelope).await?;
        info!(sender = %session.identity(), recipient = %recipient, "Encrypted message sent");
        Ok(stored)
    }

    /// Subscribe to the local inbox. Every snapshot is decrypted and ordered
    /// by [`Messenger::open_inbox`] before reaching `on_update`.
    ///
    /// The latest snapshot is opened again whenever the session installs a
    /// key pair, so entries delivered as pending become readable without a
    /// new envelope arriving. Deliveries never overlap.
    pub async fn receive<F>(&self, session: &Session, on_update: F) -> Result<Subscription>
    where
        F: Fn(Vec<InboxEntry>) + Send + Sync + 'static,
    {
        let reader = Arc::new(InboxReader {
            opener: InboxOpener {
                engine: self.engine.clone(),
                session: session.clone(),
            },
            latest: Mutex::new(None),
            on_update,
        });

        // Subscribe to key changes before the first snapshot can arrive
        let mut key_changes = session.watch_key();

        let inner = {
            let reader = reader.clone();
            self.messages
                .subscribe(
                    session.identity(),
                    Arc::new(move |items: Vec<InboxItem>| reader.deliver(items)),
                )
                .await?
        };

        let rekey = tokio::spawn(async move {
            while key_changes.changed().await.is_ok() {
                debug!(user_id = %reader.opener.session.identity(), "Key changed, reopening inbox");
                reader.redeliver();
            }
        });

        debug!(user_id = %session.identity(), "Inbox subscription started");
        Ok(Subscription::new(move || {
            rekey.abort();
            inner.cancel();
        }))
    }

    /// Order a snapshot newest first and decrypt what the session can.
    pub fn open_inbox<I>(&self, session: &Session, items: I) -> Vec<InboxEntry>
    where
        I: IntoIterator,
        I::Item: Into<InboxItem>,
    {
        InboxOpener {
            engine: self.engine.clone(),
            session: session.clone(),
        }
        .open(items.into_iter().map(Into::into).collect())
    }
}

/// Everything needed to process a snapshot inside a subscription callback
struct InboxOpener {
    engine: CryptoEngine,
    session: Session,
}

impl InboxOpener {
    fn open(&self, mut items: Vec<InboxItem>) -> Vec<InboxEntry> {
        // Stable: equal timestamps keep storage order
        items.sort_by(|a, b| b.sent_at().cmp(&a.sent_at()));

        let key = self.session.key_state();
        items
            .into_iter()
            .map(|item| match item {
                InboxItem::Envelope(envelope) => {
                    let content = match &key {
                        KeyState::NoKey => InboxContent::PendingKey,
                        KeyState::KeyReady(pair) => match self.engine.decrypt(
                            &envelope.ciphertext.c1,
                            &envelope.ciphertext.c2,
                            &pair.private_key,
                        ) {
                            Ok(text) => InboxContent::Decrypted(text),
                            Err(e) => {
                                warn!(sender = %envelope.sender_id, error = %e, "Failed to decrypt envelope");
                                InboxContent::DecryptionFailed(e.to_string())
                            }
                        },
                    };
                    InboxEntry {
                        sender_id: envelope.sender_id,
                        sent_at: envelope.sent_at,
                        ciphertext: Some(envelope.ciphertext),
                        content,
                    }
                }
                InboxItem::Unreadable {
                    sender_id,
                    sent_at,
                    reason,
                } => {
                    warn!(sender = %sender_id, reason = %reason, "Skipping unreadable envelope");
                    InboxEntry {
                        sender_id,
                        sent_at,
                        ciphertext: None,
                        content: InboxContent::DecryptionFailed(reason),
                    }
                }
            })
            .collect()
    }
}

/// Shared between the store callback and the key watcher of one subscription
struct InboxReader<F> {
    opener: InboxOpener,
    latest: Mutex<Option<Vec<InboxItem>>>,
    on_update: F,
}

impl<F: Fn(Vec<InboxEntry>)> InboxReader<F> {
    fn deliver(&self, items: Vec<InboxItem>) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        *latest = Some(items.clone());
        (self.on_update)(self.opener.open(items));
    }

    fn redeliver(&self) {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        // Nothing to reopen before the first snapshot
        if let Some(items) = latest.as_ref() {
            (self.on_update)(self.opener.open(items.clone()));
        }
    }
}
