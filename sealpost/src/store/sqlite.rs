use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{KeyStore, MessageStore, Subscription, UpdateCallback};
use crate::crypto::{Ciphertext, Point, Scalar};
use crate::error::StoreError;
use crate::models::{Envelope, InboxItem};

const SCHEMA: &str = "
    -- Private partition, one row per identity
    CREATE TABLE IF NOT EXISTS private_keys (
        user_id TEXT PRIMARY KEY,
        private_key TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    -- Public partition, queryable for any identity
    CREATE TABLE IF NOT EXISTS public_keys (
        user_id TEXT PRIMARY KEY,
        public_key TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    -- Append-only inbox streams; id preserves storage order
    CREATE TABLE IF NOT EXISTS envelopes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recipient_id TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        c1 TEXT NOT NULL,
        c2 BLOB NOT NULL,
        sent_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_envelopes_recipient ON envelopes(recipient_id);
";

/// Local-only Key Store and Message Store backed by SQLite.
///
/// One database may hold many identities, as on a shared device.
/// Subscriptions poll the inbox on a fixed interval.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    poll_interval: Duration,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, poll_interval: Duration) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?, poll_interval)
    }

    pub fn open_in_memory(poll_interval: Duration) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, poll_interval)
    }

    fn init(conn: Connection, poll_interval: Duration) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_interval,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        lock_connection(&self.conn)
    }

    /// All envelopes for `identity` in storage order. Rows that fail to
    /// decode come back as [`InboxItem::Unreadable`].
    pub fn load_inbox(&self, identity: &str) -> Result<Vec<InboxItem>, StoreError> {
        let conn = self.lock()?;
        load_inbox(&conn, identity)
    }
}

fn lock_connection(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|e| StoreError::Database(format!("lock poisoned: {}", e)))
}

fn load_inbox(conn: &Connection, identity: &str) -> Result<Vec<InboxItem>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT sender_id, c1, c2, sent_at FROM envelopes
         WHERE recipient_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map([identity], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1),
                row.get::<_, Vec<u8>>(2),
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(sender_id, c1, c2, sent_at)| match decode_ciphertext(c1, c2) {
            Ok(ciphertext) => InboxItem::Envelope(Envelope {
                sender_id,
                ciphertext,
                sent_at,
            }),
            Err(reason) => {
                debug!(sender = %sender_id, sent_at, reason = %reason, "Unreadable envelope row");
                InboxItem::Unreadable {
                    sender_id,
                    sent_at,
                    reason,
                }
            }
        })
        .collect())
}

fn decode_ciphertext(
    c1: rusqlite::Result<String>,
    c2: rusqlite::Result<Vec<u8>>,
) -> Result<Ciphertext, String> {
    let c1: Point = c1
        .map_err(|e| format!("envelope c1: {}", e))?
        .parse()
        .map_err(|e| format!("envelope c1: {}", e))?;
    let c2 = c2
        .map_err(|e| format!("envelope c2: {}", e))
        .and_then(|bytes| String::from_utf8(bytes).map_err(|e| format!("envelope c2: {}", e)))?;
    Ok(Ciphertext { c1, c2 })
}

fn parse_column<T: std::str::FromStr>(value: Option<String>, what: &str) -> Result<Option<T>, StoreError>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.parse()
                .map_err(|e| StoreError::Corrupt(format!("{}: {}", what, e)))
        })
        .transpose()
}

#[async_trait]
impl KeyStore for SqliteStore {
    async fn get_private_key(&self, identity: &str) -> Result<Option<Scalar>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT private_key FROM private_keys WHERE user_id = ?1",
                [identity],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        parse_column(raw, "private key")
    }

    async fn put_private_key(&self, identity: &str, key: &Scalar) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO private_keys (user_id, private_key, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET private_key = ?2",
            (identity, key.to_string(), now),
        )?;
        debug!(user_id = %identity, "Stored private key");
        Ok(())
    }

    async fn get_public_key(&self, identity: &str) -> Result<Option<Point>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT public_key FROM public_keys WHERE user_id = ?1",
                [identity],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        parse_column(raw, "public key")
    }

    async fn put_public_key(&self, identity: &str, key: &Point) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO public_keys (user_id, public_key, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET public_key = ?2",
            (identity, key.to_string(), now),
        )?;
        debug!(user_id = %identity, "Stored public key");
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, identity: &str, envelope: Envelope) -> Result<Envelope, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO envelopes (recipient_id, sender_id, c1, c2, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                identity,
                &envelope.sender_id,
                envelope.ciphertext.c1.to_string(),
                envelope.ciphertext.c2.as_bytes(),
                envelope.sent_at,
            ),
        )?;
        debug!(recipient = %identity, sender = %envelope.sender_id, "Appended envelope");
        Ok(envelope)
    }

    async fn subscribe(
        &self,
        identity: &str,
        on_update: UpdateCallback,
    ) -> Result<Subscription, StoreError> {
        let conn = self.conn.clone();
        let identity = identity.to_string();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let task = tokio::spawn(async move {
            let mut last_seen: Option<usize> = None;
            loop {
                ticker.tick().await;

                let snapshot = lock_connection(&conn).and_then(|guard| load_inbox(&guard, &identity));
                match snapshot {
                    // Append-only: a count change is the only possible change
                    Ok(envelopes) if last_seen != Some(envelopes.len()) => {
                        last_seen = Some(envelopes.len());
                        on_update(envelopes);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(user_id = %identity, error = %e, "Inbox poll failed"),
                }
            }
        });

        Ok(Subscription::new(move || task.abort()))
    }
}
