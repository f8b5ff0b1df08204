//! Startup configuration.
//!
//! Read once from the environment (optionally seeded from a `.env` file)
//! and fixed for the session.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::crypto::GroupKind;

const DEFAULT_DB_PATH: &str = "sealpost.db";
const DEFAULT_SERVER_URL: &str = "ws://localhost:9001";
const DEFAULT_IDENTITY_FILE: &str = "sealpost-identity.json";
const DEFAULT_POLL_MS: u64 = 1500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("identity file {}: {reason}", .path.display())]
    IdentityFile { path: PathBuf, reason: String },
}

/// Which Key Store / Message Store implementation to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Local-only SQLite database, polled for inbox updates
    Local { db_path: PathBuf },
    /// Networked relay with pushed inbox updates
    Remote { url: String, token: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: Backend,
    pub group: GroupKind,
    pub poll_interval: Duration,
    /// Identity supplied by the environment instead of the identity file
    pub user_id: Option<String>,
    pub identity_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Local {
                db_path: PathBuf::from(DEFAULT_DB_PATH),
            },
            group: GroupKind::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            user_id: None,
            identity_file: PathBuf::from(DEFAULT_IDENTITY_FILE),
        }
    }
}

impl Config {
    /// Load from the process environment, after applying any `.env` file
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("SEALPOST_BACKEND").as_deref().map(str::trim) {
            None | Some("local") => Backend::Local {
                db_path: get("SEALPOST_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            },
            Some("remote") => Backend::Remote {
                url: get("SEALPOST_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
                token: get("SEALPOST_ACCESS_TOKEN"),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SEALPOST_BACKEND",
                    reason: format!("expected local or remote, got {:?}", other),
                })
            }
        };

        let group = match get("SEALPOST_GROUP") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "SEALPOST_GROUP",
                reason,
            })?,
            None => GroupKind::default(),
        };

        let poll_ms = match get("SEALPOST_POLL_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SEALPOST_POLL_MS",
                        reason: format!("expected a positive integer, got {:?}", raw),
                    })
                }
            },
            None => DEFAULT_POLL_MS,
        };

        Ok(Self {
            backend,
            group,
            poll_interval: Duration::from_millis(poll_ms),
            user_id: get("SEALPOST_USER_ID").map(|id| id.trim().to_string()),
            identity_file: get("SEALPOST_IDENTITY_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IDENTITY_FILE)),
        })
    }

    /// Pick the local identity: an explicit override, then `user_id`, then
    /// the identity file. A fresh UUID is generated and persisted when the
    /// file is missing or empty.
    pub fn resolve_identity(&self, explicit: Option<&str>) -> Result<String, ConfigError> {
        let explicit = explicit.map(str::trim).filter(|id| !id.is_empty());
        if let Some(id) = explicit.or(self.user_id.as_deref()) {
            return Ok(id.to_string());
        }

        if let Some(id) = load_stored_identity(&self.identity_file) {
            return Ok(id);
        }

        let new_id = uuid::Uuid::new_v4().to_string();
        save_stored_identity(&self.identity_file, &new_id)?;
        info!(user_id = %new_id, path = %self.identity_file.display(), "Created new identity");
        Ok(new_id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredIdentity {
    user_id: String,
}

fn load_stored_identity(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }

    let contents = fs::read_to_string(path).ok()?;
    let identity: StoredIdentity = serde_json::from_str(&contents).ok()?;
    let trimmed = identity.user_id.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn save_stored_identity(path: &Path, user_id: &str) -> Result<(), ConfigError> {
    let failed = |reason: String| ConfigError::IdentityFile {
        path: path.to_path_buf(),
        reason,
    };
    let identity = StoredIdentity {
        user_id: user_id.to_string(),
    };
    let contents = serde_json::to_string_pretty(&identity).map_err(|e| failed(e.to_string()))?;
    fs::write(path, contents).map_err(|e| failed(e.to_string()))
}
