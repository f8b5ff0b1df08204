mod envelope;
pub mod input;

pub use envelope::{Envelope, InboxContent, InboxEntry, InboxItem, Timestamp};
