//! Recipient-only text messaging.
//!
//! A sender encrypts with the recipient's published public key; only the
//! holder of the matching private key recovers the text. Keys and inbox
//! streams live behind the [`store::KeyStore`] and [`store::MessageStore`]
//! capabilities, backed either by a local SQLite file or by the relay.

pub mod config;
pub mod crypto;
pub mod error;
pub mod messaging;
pub mod models;
pub mod protocol;
pub mod session;
pub mod store;

pub use config::{Backend, Config, ConfigError};
pub use crypto::{CryptoEngine, GroupKind, KeyManager};
pub use error::{CryptoError, Error, Result, StoreError};
pub use messaging::Messenger;
pub use session::{KeyState, Session};
