use serde::{Deserialize, Serialize};

use crate::crypto::Ciphertext;

/// Milliseconds since the Unix epoch, assigned locally or by the relay
pub type Timestamp = i64;

/// One stored encrypted message in a recipient's inbox. Immutable once written.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Envelope {
   pub sender_id: String,
   pub ciphertext: Ciphertext,
   pub sent_at: Timestamp,
}

/// One row of an inbox snapshot as handed out by a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxItem {
   Envelope(Envelope),
   /// A stored row that could not be decoded into an envelope
   Unreadable {
      sender_id: String,
      sent_at: Timestamp,
      reason: String,
   },
}

impl InboxItem {
   pub fn sender_id(&self) -> &str {
      match self {
         InboxItem::Envelope(envelope) => &envelope.sender_id,
         InboxItem::Unreadable { sender_id, .. } => sender_id,
      }
   }

   pub fn sent_at(&self) -> Timestamp {
      match self {
         InboxItem::Envelope(envelope) => envelope.sent_at,
         InboxItem::Unreadable { sent_at, .. } => *sent_at,
      }
   }
}

impl From<Envelope> for InboxItem {
   fn from(envelope: Envelope) -> Self {
      InboxItem::Envelope(envelope)
   }
}

/// An envelope as presented to the UI collaborator
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InboxEntry {
   pub sender_id: String,
   pub sent_at: Timestamp,
   /// Absent when the stored row could not be decoded
   pub ciphertext: Option<Ciphertext>,
   pub content: InboxContent,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum InboxContent {
   Decrypted(String),
   /// Kept encrypted until the local private key is loaded
   PendingKey,
   DecryptionFailed(String),
}

impl InboxEntry {
   pub fn text(&self) -> Option<&str> {
      match &self.content {
         InboxContent::Decrypted(text) => Some(text),
         _ => None,
      }
   }
}
