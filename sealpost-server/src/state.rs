use dashmap::DashMap;
use sealpost::crypto::{Point, Scalar};
use sealpost::models::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Maximum envelopes held per inbox. Appends beyond it are rejected.
pub const MAX_INBOX_ENVELOPES: usize = 10_000;

/// Relay state: inbox subscribers, both key partitions and every inbox
pub struct ServerState {
    /// user_id -> connections that asked for inbox pushes (several per user allowed)
    subscribers: DashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    /// Only ever read or written by the owning identity
    private_keys: DashMap<String, Scalar>,
    public_keys: DashMap<String, Point>,
    /// user_id -> envelopes in arrival order
    inboxes: DashMap<String, Vec<Envelope>>,
    access_token: Option<String>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::with_access_token(None)
    }

    /// Require every `connect` to carry `token`. An empty token disables the check.
    pub fn with_access_token(token: Option<String>) -> Self {
        Self {
            subscribers: DashMap::new(),
            private_keys: DashMap::new(),
            public_keys: DashMap::new(),
            inboxes: DashMap::new(),
            access_token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Start pushing `user_id`'s inbox snapshots to `tx`
    pub fn subscribe(&self, user_id: &str, tx: mpsc::UnboundedSender<String>) {
        let mut entry = self.subscribers.entry(user_id.to_string()).or_default();
        if !entry.iter().any(|existing| existing.same_channel(&tx)) {
            entry.push(tx);
        }
    }

    /// Stop pushing to `tx` and prune any other closed channels of the user
    pub fn unsubscribe(&self, user_id: &str, tx: &mpsc::UnboundedSender<String>) {
        if let Some(mut entry) = self.subscribers.get_mut(user_id) {
            entry.retain(|existing| !existing.same_channel(tx) && !existing.is_closed());
            if entry.is_empty() {
                drop(entry);
                self.subscribers.remove(user_id);
            }
        }
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.subscribers.get(user_id).map(|e| e.len()).unwrap_or(0)
    }

    /// Push to every subscribed connection of a user
    pub fn send_to_subscribers(&self, user_id: &str, message: &str) -> bool {
        if let Some(channels) = self.subscribers.get(user_id) {
            let mut sent = false;
            for tx in channels.iter() {
                if tx.send(message.to_string()).is_ok() {
                    sent = true;
                }
            }
            sent
        } else {
            false
        }
    }

    pub fn put_private_key(&self, user_id: &str, key: Scalar) {
        self.private_keys.insert(user_id.to_string(), key);
    }

    pub fn private_key(&self, user_id: &str) -> Option<Scalar> {
        self.private_keys.get(user_id).map(|k| k.value().clone())
    }

    pub fn put_public_key(&self, user_id: &str, key: Point) {
        self.public_keys.insert(user_id.to_string(), key);
    }

    pub fn public_key(&self, user_id: &str) -> Option<Point> {
        self.public_keys.get(user_id).map(|k| k.value().clone())
    }

    /// Append to `user_id`'s inbox and return its new length.
    /// Returns `None` when the inbox is at capacity; nothing stored is dropped.
    pub fn append(&self, user_id: &str, envelope: Envelope) -> Option<usize> {
        let mut inbox = self.inboxes.entry(user_id.to_string()).or_default();
        if inbox.len() >= MAX_INBOX_ENVELOPES {
            warn!("Inbox for {} is full, rejecting envelope", user_id);
            return None;
        }
        inbox.push(envelope);
        debug!("Stored envelope for {} ({} total)", user_id, inbox.len());
        Some(inbox.len())
    }

    /// Current inbox in arrival order
    pub fn inbox(&self, user_id: &str) -> Vec<Envelope> {
        self.inboxes
            .get(user_id)
            .map(|envelopes| envelopes.clone())
            .unwrap_or_default()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealpost::crypto::Ciphertext;

    fn envelope(sender: &str, sent_at: i64) -> Envelope {
        Envelope {
            sender_id: sender.to_string(),
            ciphertext: Ciphertext {
                c1: Point::from(9u64),
                c2: "ab".to_string(),
            },
            sent_at,
        }
    }

    #[test]
    fn test_new_server_state() {
        let state = ServerState::new();
        assert_eq!(state.subscriber_count("user1"), 0);
        assert!(state.inbox("user1").is_empty());
        assert_eq!(state.access_token(), None);
    }

    #[test]
    fn test_empty_access_token_disables_check() {
        assert_eq!(ServerState::with_access_token(Some(String::new())).access_token(), None);
        assert_eq!(
            ServerState::with_access_token(Some("t".into())).access_token(),
            Some("t")
        );
    }

    #[test]
    fn test_unsubscribe_removes_the_user_when_empty() {
        let state = ServerState::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        state.subscribe("user1", tx.clone());
        assert_eq!(state.subscriber_count("user1"), 1);

        // The receiver is still alive; the channel is removed by identity
        state.unsubscribe("user1", &tx);
        assert_eq!(state.subscriber_count("user1"), 0);
        assert!(!state.send_to_subscribers("user1", "gone"));
    }

    #[test]
    fn test_push_reaches_every_subscribed_connection() {
        let state = ServerState::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        state.subscribe("user1", tx1);
        state.subscribe("user1", tx2);

        assert_eq!(state.subscriber_count("user1"), 2);

        assert!(state.send_to_subscribers("user1", "hello"));
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");

        assert!(!state.send_to_subscribers("user2", "hello"));
    }

    #[test]
    fn test_only_subscribed_connections_get_pushes() {
        let state = ServerState::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (_tx2, mut rx2) = mpsc::unbounded_channel::<String>();

        state.subscribe("user1", tx1.clone());
        state.subscribe("user1", tx1);

        assert!(state.send_to_subscribers("user1", "snapshot"));
        assert_eq!(rx1.try_recv().unwrap(), "snapshot");
        // Subscribing twice does not duplicate pushes
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_partial_disconnect_keeps_subscription() {
        let state = ServerState::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, rx3) = mpsc::unbounded_channel();

        state.subscribe("user1", tx1.clone());
        state.subscribe("user1", tx2);
        state.subscribe("user1", tx3);

        // One connection leaves while another has already gone away
        drop(rx3);
        state.unsubscribe("user1", &tx1);

        assert_eq!(state.subscriber_count("user1"), 1);
        assert!(state.send_to_subscribers("user1", "still here"));
        assert_eq!(rx2.try_recv().unwrap(), "still here");
    }

    #[test]
    fn test_key_partitions() {
        let state = ServerState::new();
        state.put_public_key("alice", Point::from(5u64));
        state.put_private_key("alice", Scalar::from(7u64));

        assert_eq!(state.public_key("alice"), Some(Point::from(5u64)));
        assert_eq!(state.private_key("alice"), Some(Scalar::from(7u64)));
        assert_eq!(state.public_key("bob"), None);
        assert_eq!(state.private_key("bob"), None);
    }

    #[test]
    fn test_inbox_keeps_arrival_order() {
        let state = ServerState::new();

        assert_eq!(state.append("bob", envelope("alice", 30)), Some(1));
        assert_eq!(state.append("bob", envelope("carol", 10)), Some(2));

        let snapshot = state.inbox("bob");
        assert_eq!(snapshot[0].sender_id, "alice");
        assert_eq!(snapshot[1].sender_id, "carol");
        assert!(state.inbox("alice").is_empty());
    }

    #[test]
    fn test_full_inbox_rejects_without_dropping() {
        let state = ServerState::new();

        for i in 0..MAX_INBOX_ENVELOPES {
            state.append("bob", envelope("alice", i as i64)).unwrap();
        }
        assert!(state.append("bob", envelope("late", -1)).is_none());

        let inbox = state.inbox("bob");
        assert_eq!(inbox.len(), MAX_INBOX_ENVELOPES);
        assert_eq!(inbox[0].sent_at, 0);
        assert!(inbox.iter().all(|e| e.sender_id != "late"));
    }
}
