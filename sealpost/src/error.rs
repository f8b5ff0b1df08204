//! Error types for sealpost.
//!
//! Validation and lookup failures are reported to the caller before or
//! instead of any storage I/O. Store and crypto failures carry their
//! underlying cause. Per-envelope decryption failures never surface here;
//! they become an inbox marker instead.

use thiserror::Error;

use crate::config::ConfigError;

/// Failures of the group operation or the masking cipher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The integer does not encode a valid group element
    #[error("invalid group element: {0}")]
    InvalidPoint(String),

    /// A scalar or point string could not be parsed
    #[error("invalid integer encoding: {0}")]
    InvalidEncoding(String),

    /// Non-empty input with an empty mask key
    #[error("mask key is empty")]
    EmptyMask,

    /// XOR produced a value outside the Unicode scalar range
    #[error("masked value {0:#x} is not a valid character")]
    InvalidCharacter(u32),
}

/// Failures of a Key Store or Message Store backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection to the relay is closed")]
    Disconnected,

    #[error("request rejected by the relay: {0}")]
    Rejected(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StoreError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

/// Errors surfaced to the calling collaborator.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing recipient, message or local key, recipient equals sender, or
    /// an operation invalid in the current key state
    #[error("validation failed: {0}")]
    Validation(String),

    /// Recipient has no published public key
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
