//! Key Store and Message Store capabilities.
//!
//! Two backends implement both traits and one is selected at startup:
//! [`SqliteStore`] keeps everything in a local database and feeds
//! subscriptions by polling; [`RemoteStore`] talks to the relay over a
//! WebSocket and receives inbox snapshots as pushes. Callers never branch
//! on which one they hold.

mod remote;
mod sqlite;

pub use remote::RemoteStore;
pub use sqlite::SqliteStore;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{Backend, Config};
use crate::crypto::{Point, Scalar};
use crate::error::StoreError;
use crate::models::{Envelope, InboxItem};

/// Called with the full current set of envelopes on every change.
pub type UpdateCallback = Arc<dyn Fn(Vec<InboxItem>) + Send + Sync>;

/// Storage for key material. The private partition is never publicly
/// queryable; the public partition is readable for any identity.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_private_key(&self, identity: &str) -> Result<Option<Scalar>, StoreError>;

    async fn put_private_key(&self, identity: &str, key: &Scalar) -> Result<(), StoreError>;

    async fn get_public_key(&self, identity: &str) -> Result<Option<Point>, StoreError>;

    async fn put_public_key(&self, identity: &str, key: &Point) -> Result<(), StoreError>;
}

/// Append-only per-identity envelope streams.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append to `identity`'s inbox. Returns the envelope as persisted, which
    /// may carry a store-assigned `sent_at`.
    async fn append(&self, identity: &str, envelope: Envelope) -> Result<Envelope, StoreError>;

    /// Deliver `identity`'s full inbox to `on_update` now and after every
    /// change, until the returned handle is dropped.
    async fn subscribe(
        &self,
        identity: &str,
        on_update: UpdateCallback,
    ) -> Result<Subscription, StoreError>;
}

/// Live inbox subscription. Dropping it stops further updates.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Both capabilities, as selected by configuration
#[derive(Clone)]
pub struct Stores {
    pub keys: Arc<dyn KeyStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Stores {
    pub fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: KeyStore + MessageStore + 'static,
    {
        Self {
            keys: store.clone(),
            messages: store,
        }
    }
}

/// Open the configured backend for `identity`
pub async fn open(config: &Config, identity: &str) -> Result<Stores, StoreError> {
    match &config.backend {
        Backend::Local { db_path } => {
            info!(path = %db_path.display(), "Using local SQLite store");
            let store = SqliteStore::open(db_path, config.poll_interval)?;
            Ok(Stores::from_backend(Arc::new(store)))
        }
        Backend::Remote { url, token } => {
            info!(url = %url, "Using relay store");
            let store = RemoteStore::connect(url, identity, token.as_deref()).await?;
            Ok(Stores::from_backend(Arc::new(store)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscription_cancels_once_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(subscription);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_cancel_does_not_double_fire() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
