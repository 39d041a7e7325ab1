//! Short-lived credential cache.
//!
//! Remembers the bot token, pack name, user id and bot username between
//! runs so repeat publishes can omit the flags. Each field carries its own
//! expiration; expired entries read as absent.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const STORE_FILE: &str = "credentials.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Token,
    PackName,
    UserId,
    BotUsername,
}

impl CredentialField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialField::Token => "token",
            CredentialField::PackName => "pack_name",
            CredentialField::UserId => "user_id",
            CredentialField::BotUsername => "bot_username",
        }
    }

    /// How long a stored value stays valid. The user id is stable and kept
    /// long; everything else is short-lived.
    fn ttl(&self) -> Duration {
        match self {
            CredentialField::UserId => Duration::days(720),
            _ => Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    value: String,
    expires_at: DateTime<Utc>,
}

/// File-backed credential cache living under the data directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn open(data_dir: &str) -> Self {
        Self {
            path: Path::new(data_dir).join(STORE_FILE),
        }
    }

    /// Returns the stored value, or None when absent or expired.
    pub fn get(&self, field: CredentialField) -> Option<String> {
        let map = self.read_map().ok()?;
        let entry = map.get(field.as_str())?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Stores a value with the field's own TTL, replacing any prior entry.
    pub fn put(&self, field: CredentialField, value: &str) -> Result<()> {
        let mut map = self.read_map().unwrap_or_default();
        map.insert(
            field.as_str().to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Utc::now() + field.ttl(),
            },
        );
        let body = serde_json::to_string_pretty(&map)?;
        fs::write(&self.path, body)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn read_map(&self) -> Result<HashMap<String, StoredValue>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}
