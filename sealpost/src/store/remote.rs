use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{KeyStore, MessageStore, Subscription, UpdateCallback};
use crate::crypto::{Point, Scalar};
use crate::error::StoreError;
use crate::models::{Envelope, InboxItem};
use crate::protocol::WsMessage;

/// How long to wait for the relay to accept the connect handshake
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

type PendingMap = HashMap<u64, oneshot::Sender<WsMessage>>;
type SubscriberMap = HashMap<u64, UpdateCallback>;

/// Networked Key Store and Message Store talking to the sealpost relay.
///
/// Holds one authenticated connection for a single identity. A reader task
/// routes responses to waiting requests by `request_id` and hands pushed
/// inbox snapshots to every registered subscriber.
pub struct RemoteStore {
    user_id: String,
    write_tx: mpsc::UnboundedSender<String>,
    pending: Arc<StdMutex<PendingMap>>,
    subscribers: Arc<StdMutex<SubscriberMap>>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RemoteStore {
    /// Connect to the relay at `url` and authenticate as `user_id`
    pub async fn connect(url: &str, user_id: &str, token: Option<&str>) -> Result<Self, StoreError> {
        info!(url = %url, user_id = %user_id, "Connecting to relay");
        let (ws_stream, _) = connect_async(url).await?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let connect_msg = WsMessage::Connect {
            user_id: user_id.to_string(),
            token: token.map(String::from),
        };
        ws_write
            .send(Message::Text(serde_json::to_string(&connect_msg)?.into()))
            .await?;

        let auth = tokio::time::timeout(AUTH_TIMEOUT, wait_for_auth(&mut ws_read))
            .await
            .map_err(|_| StoreError::Timeout("relay authentication"))??;

        match auth {
            Some(WsMessage::AuthResponse { success: true, .. }) => {
                info!(user_id = %user_id, "Authenticated with relay");
            }
            Some(WsMessage::AuthResponse { message, .. }) | Some(WsMessage::Error { message, .. }) => {
                return Err(StoreError::Unauthorized(message));
            }
            Some(other) => {
                return Err(StoreError::Transport(format!(
                    "unexpected handshake reply: {:?}",
                    other
                )));
            }
            None => return Err(StoreError::Disconnected),
        }

        let pending: Arc<StdMutex<PendingMap>> = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let subscribers: Arc<StdMutex<SubscriberMap>> = Arc::default();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(data) = write_rx.recv().await {
                if let Err(e) = ws_write.send(Message::Text(data.into())).await {
                    error!(error = %e, "Failed to send message to relay");
                    break;
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        let reader = {
            let pending = pending.clone();
            let closed = closed.clone();
            let subscribers = subscribers.clone();
            tokio::spawn(async move {
                while let Some(frame) = ws_read.next().await {
                    match frame {
                        Ok(Message::Text(text)) => route_incoming(&text, &pending, &subscribers),
                        Ok(Message::Close(_)) => {
                            info!("Relay closed connection");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }
                    }
                }
                // Fail every in-flight request
                closed.store(true, Ordering::SeqCst);
                pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
            })
        };

        Ok(Self {
            user_id: user_id.to_string(),
            write_tx,
            pending,
            subscribers,
            next_id: AtomicU64::new(1),
            closed,
            reader,
            writer,
        })
    }

    fn ensure_self(&self, identity: &str, what: &str) -> Result<(), StoreError> {
        if identity == self.user_id {
            Ok(())
        } else {
            Err(StoreError::Unauthorized(format!(
                "{} of {} over a connection for {}",
                what, identity, self.user_id
            )))
        }
    }

    /// Send a request built around a fresh id and wait for its response
    async fn request(&self, build: impl FnOnce(u64) -> WsMessage) -> Result<WsMessage, StoreError> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let json = serde_json::to_string(&build(request_id))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id, tx);

        debug!(request_id, bytes = json.len(), "Sending request to relay");
        if self.closed.load(Ordering::SeqCst) || self.write_tx.send(json).is_err() {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&request_id);
            return Err(StoreError::Disconnected);
        }

        match rx.await.map_err(|_| StoreError::Disconnected)? {
            WsMessage::Error { message, .. } => Err(StoreError::Rejected(message)),
            response => Ok(response),
        }
    }
}

/// Read frames until the relay answers the connect handshake
async fn wait_for_auth<S>(ws_read: &mut S) -> Result<Option<WsMessage>, StoreError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = ws_read.next().await {
        if let Message::Text(text) = frame? {
            return Ok(Some(serde_json::from_str(&text)?));
        }
    }
    Ok(None)
}

fn unexpected(response: WsMessage) -> StoreError {
    StoreError::Transport(format!("unexpected response: {:?}", response))
}

fn route_incoming(
    text: &str,
    pending: &StdMutex<PendingMap>,
    subscribers: &StdMutex<SubscriberMap>,
) {
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "Failed to parse message from relay");
            return;
        }
    };

    if let Some(request_id) = msg.response_id() {
        let waiter = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => warn!(request_id, "Response for unknown request"),
        }
        return;
    }

    match msg {
        WsMessage::Inbox { user_id, envelopes } => {
            // Clone out so callbacks run without the lock held
            let callbacks: Vec<UpdateCallback> = subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            debug!(user_id = %user_id, count = envelopes.len(), "Inbox snapshot pushed");
            let items: Vec<InboxItem> = envelopes.into_iter().map(InboxItem::from).collect();
            for callback in callbacks {
                callback(items.clone());
            }
        }
        WsMessage::Error { message, .. } => warn!(message = %message, "Relay reported an error"),
        other => debug!(message = ?other, "Ignoring unsolicited relay message"),
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl KeyStore for RemoteStore {
    async fn get_private_key(&self, identity: &str) -> Result<Option<Scalar>, StoreError> {
        self.ensure_self(identity, "read of private key")?;
        match self
            .request(|request_id| WsMessage::GetPrivateKey { request_id })
            .await?
        {
            WsMessage::PrivateKey { private_key, .. } => Ok(private_key),
            other => Err(unexpected(other)),
        }
    }

    async fn put_private_key(&self, identity: &str, key: &Scalar) -> Result<(), StoreError> {
        self.ensure_self(identity, "write of private key")?;
        match self
            .request(|request_id| WsMessage::PutPrivateKey {
                request_id,
                private_key: key.clone(),
            })
            .await?
        {
            WsMessage::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get_public_key(&self, identity: &str) -> Result<Option<Point>, StoreError> {
        match self
            .request(|request_id| WsMessage::GetPublicKey {
                request_id,
                user_id: identity.to_string(),
            })
            .await?
        {
            WsMessage::PublicKey { public_key, .. } => Ok(public_key),
            other => Err(unexpected(other)),
        }
    }

    async fn put_public_key(&self, identity: &str, key: &Point) -> Result<(), StoreError> {
        self.ensure_self(identity, "publication of public key")?;
        match self
            .request(|request_id| WsMessage::PutPublicKey {
                request_id,
                public_key: key.clone(),
            })
            .await?
        {
            WsMessage::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl MessageStore for RemoteStore {
    async fn append(&self, identity: &str, envelope: Envelope) -> Result<Envelope, StoreError> {
        match self
            .request(|request_id| WsMessage::Append {
                request_id,
                recipient_id: identity.to_string(),
                envelope,
            })
            .await?
        {
            WsMessage::Appended { envelope, .. } => Ok(envelope),
            other => Err(unexpected(other)),
        }
    }

    async fn subscribe(
        &self,
        identity: &str,
        on_update: UpdateCallback,
    ) -> Result<Subscription, StoreError> {
        self.ensure_self(identity, "subscription to inbox")?;

        let subscription_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscription_id, on_update);

        // The relay answers with an ack followed by the current snapshot
        if let Err(e) = self
            .request(|request_id| WsMessage::Subscribe { request_id })
            .await
        {
            self.subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&subscription_id);
            return Err(e);
        }

        let subscribers = Arc::downgrade(&self.subscribers);
        Ok(Subscription::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&subscription_id);
            }
        }))
    }
}
