//! Identity bridge: turns an opaque credential into a verified account
//! identifier plus profile before a connection is trusted with anything
//! else.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Display data attached to an account, denormalized into player state
/// when the account joins a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub nickname: String,
    pub gid: String,
}

/// A verified account: stable identifier plus profile.
#[derive(Debug, Clone)]
pub struct Identity {
    pub uid: String,
    pub profile: Profile,
}

/// Terminal authentication failures. Every variant ends the connection;
/// there is no retry path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown or malformed credential")]
    InvalidCredential,
    #[error("credential has expired")]
    ExpiredCredential,
    #[error("no profile bound to this account")]
    MissingProfile,
}

/// External credential verifier. The gateway awaits exactly one call per
/// connection; while the call is outstanding the connection stays
/// unauthenticated and its frames are dropped.
#[async_trait]
pub trait IdentityBridge: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// One keyring entry. Keys are issued out-of-band (a chat-command
/// workflow, outside this crate) and may carry an expiry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEntry {
    pub uid: String,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub gid: Option<String>,
}

impl KeyEntry {
    pub fn new(uid: &str, nickname: &str, gid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            expires_at: None,
            nickname: Some(nickname.to_string()),
            gid: Some(gid.to_string()),
        }
    }

    pub fn expiring(uid: &str, nickname: &str, gid: &str, expires_at: u64) -> Self {
        Self {
            expires_at: Some(expires_at),
            ..Self::new(uid, nickname, gid)
        }
    }
}

/// Identity bridge backed by a token → entry table.
pub struct KeyringBridge {
    entries: HashMap<String, KeyEntry>,
}

impl KeyringBridge {
    /// Loads the keyring from a JSON file mapping each access key to
    /// its entry. A missing or unreadable file is startup-fatal.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, KeyEntry> = serde_json::from_str(&raw)?;
        Ok(Self { entries })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, KeyEntry)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

#[async_trait]
impl IdentityBridge for KeyringBridge {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let entry = self
            .entries
            .get(token)
            .ok_or(AuthError::InvalidCredential)?;

        if let Some(expires_at) = entry.expires_at {
            if crate::unix_millis() >= expires_at {
                return Err(AuthError::ExpiredCredential);
            }
        }

        match (&entry.nickname, &entry.gid) {
            (Some(nickname), Some(gid)) => Ok(Identity {
                uid: entry.uid.clone(),
                profile: Profile {
                    nickname: nickname.clone(),
                    gid: gid.clone(),
                },
            }),
            _ => Err(AuthError::MissingProfile),
        }
    }
}
