//! Sealpost relay library
//!
//! Exposes the relay components for use in integration tests.

mod connection;
mod state;

pub use connection::handle_connection;
pub use connection::handle_message;
pub use state::{ServerState, MAX_INBOX_ENVELOPES};
