//! Cached browser session types.
//!
//! The storage snapshot uses the browser automation layer's storage-state
//! JSON shape. It is parsed to check validity, but the raw bytes are what
//! get persisted, so a save/load round trip is byte-identical.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix seconds; -1 for session cookies
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

fn session_expiry() -> f64 {
    -1.0
}

impl Cookie {
    pub fn is_session(&self) -> bool {
        self.expires < 0.0
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_session() && self.expires < now.timestamp() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

impl StorageState {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Cookies that are still usable at `now`.
    pub fn live_cookies(&self, now: DateTime<Utc>) -> usize {
        self.cookies.iter().filter(|c| !c.is_expired_at(now)).count()
    }
}

/// Bookkeeping stored next to the snapshot in `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMeta {
    pub profile: String,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_validated: Option<DateTime<Utc>>,
    /// Set when validation found the session logged out
    #[serde(default)]
    pub stale: bool,
}

impl AuthMeta {
    pub fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
            saved_at: None,
            last_validated: None,
            stale: false,
        }
    }
}

/// A loaded session for one profile.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub profile: String,
    /// Snapshot bytes exactly as written
    pub raw: Vec<u8>,
    pub storage: StorageState,
    pub meta: AuthMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Serializable status of a profile.
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub profile: String,
    pub present: bool,
    pub stale: bool,
    pub cookies: usize,
    pub live_cookies: usize,
    pub saved_at: Option<DateTime<Utc>>,
    pub last_validated: Option<DateTime<Utc>>,
    pub has_backup: bool,
}
