//! On-disk auth state per profile.
//!
//! Layout under the auth directory:
//!
//! ```text
//! <profile>/storage_state.json         snapshot bytes (0600)
//! <profile>/meta.json                  AuthMeta
//! <profile>/storage_state.backup.json  backup slot
//! ```
//!
//! Every write goes through [`write_atomic`], so a crash mid-write leaves the
//! previous file readable. Writers of one profile are serialized by that
//! profile's lock; readers never take it.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::heal::SessionProbe;
use super::state::{AuthMeta, AuthState, AuthStatus, Freshness, StorageState};
use crate::error::{AuthError, AuthResult, ValidationError};
use crate::persist::{sweep_temp_artifacts, write_atomic, FileMode};

const STATE_FILE: &str = "storage_state.json";
const META_FILE: &str = "meta.json";
const BACKUP_FILE: &str = "storage_state.backup.json";

/// Temp files younger than this may belong to another process's write.
const STALE_TEMP_AGE: Duration = Duration::from_secs(600);

fn profile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("profile pattern is a valid regex"))
}

pub fn validate_profile(profile: &str) -> Result<(), ValidationError> {
    if profile_pattern().is_match(profile) {
        Ok(())
    } else {
        Err(ValidationError::InvalidProfile(profile.to_string()))
    }
}

fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Held while writing a profile's files.
pub type ProfileGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
struct ProfileLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProfileLocks {
    async fn acquire(&self, profile: &str) -> ProfileGuard {
        let existing = self.locks.read().await.get(profile).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => Arc::clone(
                self.locks
                    .write()
                    .await
                    .entry(profile.to_string())
                    .or_default(),
            ),
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Clone)]
pub struct AuthStateManager {
    root: PathBuf,
    locks: Arc<ProfileLocks>,
}

impl AuthStateManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(ProfileLocks::default()),
        }
    }

    /// Wait for exclusive write access to `profile`.
    pub async fn lock_profile(&self, profile: &str) -> AuthResult<ProfileGuard> {
        validate_profile(profile)?;
        Ok(self.locks.acquire(profile).await)
    }

    fn profile_dir(&self, profile: &str) -> Result<PathBuf, ValidationError> {
        validate_profile(profile)?;
        Ok(self.root.join(profile))
    }

    pub fn state_path(&self, profile: &str) -> Result<PathBuf, ValidationError> {
        Ok(self.profile_dir(profile)?.join(STATE_FILE))
    }

    fn meta_path(&self, profile: &str) -> Result<PathBuf, ValidationError> {
        Ok(self.profile_dir(profile)?.join(META_FILE))
    }

    fn backup_path(&self, profile: &str) -> Result<PathBuf, ValidationError> {
        Ok(self.profile_dir(profile)?.join(BACKUP_FILE))
    }

    fn load_meta(&self, profile: &str) -> AuthResult<AuthMeta> {
        let path = self.meta_path(profile)?;
        let Some(bytes) = read_optional(&path)? else {
            return Ok(AuthMeta::new(profile));
        };
        match serde_json::from_slice::<AuthMeta>(&bytes) {
            Ok(meta) => Ok(meta),
            Err(e) => {
                tracing::warn!("Ignoring corrupt {}: {}", path.display(), e);
                Ok(AuthMeta::new(profile))
            }
        }
    }

    fn save_meta(&self, meta: &AuthMeta) -> AuthResult<()> {
        let path = self.meta_path(&meta.profile)?;
        let contents = serde_json::to_vec_pretty(meta)
            .map_err(|e| AuthError::Io(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        write_atomic(&path, &contents, FileMode::Private)?;
        Ok(())
    }

    /// Cached state for `profile`. Absent and corrupt snapshots are both `None`.
    pub async fn load(&self, profile: &str) -> AuthResult<Option<AuthState>> {
        let path = self.state_path(profile)?;
        let Some(raw) = read_optional(&path)? else {
            tracing::debug!("No auth state for '{}'", profile);
            return Ok(None);
        };

        let storage = match StorageState::parse(&raw) {
            Ok(storage) => storage,
            Err(e) => {
                tracing::warn!(
                    "Auth state at {} is corrupt, treating as absent: {}",
                    path.display(),
                    e
                );
                return Ok(None);
            }
        };

        Ok(Some(AuthState {
            profile: profile.to_string(),
            raw,
            storage,
            meta: self.load_meta(profile)?,
        }))
    }

    /// Atomically replace the snapshot for `profile` with `raw`.
    ///
    /// Bytes that do not parse as a storage snapshot are refused and the
    /// existing file is left untouched.
    pub async fn persist(&self, profile: &str, raw: &[u8]) -> AuthResult<AuthState> {
        let guard = self.lock_profile(profile).await?;
        self.persist_locked(&guard, profile, raw)
    }

    pub(super) fn persist_locked(
        &self,
        _guard: &ProfileGuard,
        profile: &str,
        raw: &[u8],
    ) -> AuthResult<AuthState> {
        let path = self.state_path(profile)?;
        let storage = StorageState::parse(raw)
            .map_err(|e| AuthError::InvalidSnapshot(profile.to_string(), e.to_string()))?;

        if let Some(dir) = path.parent() {
            let swept = sweep_temp_artifacts(dir, STALE_TEMP_AGE)?;
            if swept > 0 {
                tracing::info!("Removed {} leftover temp file(s) for '{}'", swept, profile);
            }
        }
        write_atomic(&path, raw, FileMode::Private)?;

        let now = Utc::now();
        let meta = AuthMeta {
            profile: profile.to_string(),
            saved_at: Some(now),
            last_validated: Some(now),
            stale: false,
        };
        self.save_meta(&meta)?;
        tracing::info!(
            "Persisted auth state for '{}' ({} cookies)",
            profile,
            storage.cookies.len()
        );

        Ok(AuthState {
            profile: profile.to_string(),
            raw: raw.to_vec(),
            storage,
            meta,
        })
    }

    /// Ask `probe` whether the cached session is still logged in.
    pub async fn validate(&self, profile: &str, probe: &dyn SessionProbe) -> AuthResult<Freshness> {
        let guard = self.lock_profile(profile).await?;
        self.validate_locked(&guard, profile, probe).await
    }

    pub(super) async fn validate_locked(
        &self,
        _guard: &ProfileGuard,
        profile: &str,
        probe: &dyn SessionProbe,
    ) -> AuthResult<Freshness> {
        let Some(state) = self.load(profile).await? else {
            return Ok(Freshness::Stale);
        };

        let authenticated = probe.is_authenticated(&state).await?;
        let mut meta = state.meta;
        if authenticated {
            meta.last_validated = Some(Utc::now());
            meta.stale = false;
        } else {
            tracing::warn!("Auth state for '{}' is no longer logged in", profile);
            meta.stale = true;
        }
        self.save_meta(&meta)?;

        Ok(if authenticated {
            Freshness::Fresh
        } else {
            Freshness::Stale
        })
    }

    /// Mark the state stale without deleting it. Returns false when there
    /// is no state to mark.
    pub async fn invalidate(&self, profile: &str) -> AuthResult<bool> {
        let _guard = self.lock_profile(profile).await?;
        if read_optional(&self.state_path(profile)?)?.is_none() {
            return Ok(false);
        }
        let mut meta = self.load_meta(profile)?;
        meta.stale = true;
        self.save_meta(&meta)?;
        tracing::info!("Marked auth state for '{}' stale", profile);
        Ok(true)
    }

    /// Copy the current snapshot into the backup slot.
    pub async fn backup(&self, profile: &str) -> AuthResult<()> {
        let _guard = self.lock_profile(profile).await?;
        let state = self
            .load(profile)
            .await?
            .ok_or_else(|| AuthError::NotFound(profile.to_string()))?;
        write_atomic(&self.backup_path(profile)?, &state.raw, FileMode::Private)?;
        tracing::info!("Backed up auth state for '{}'", profile);
        Ok(())
    }

    /// Replace the snapshot with the backup slot.
    pub async fn restore(&self, profile: &str) -> AuthResult<AuthState> {
        let _guard = self.lock_profile(profile).await?;
        let backup = self.backup_path(profile)?;
        let raw = read_optional(&backup)?.ok_or_else(|| AuthError::NotFound(profile.to_string()))?;
        let storage = StorageState::parse(&raw)
            .map_err(|e| AuthError::InvalidSnapshot(profile.to_string(), e.to_string()))?;

        write_atomic(&self.state_path(profile)?, &raw, FileMode::Private)?;
        let meta = AuthMeta {
            profile: profile.to_string(),
            saved_at: Some(Utc::now()),
            last_validated: None,
            stale: false,
        };
        self.save_meta(&meta)?;
        tracing::info!("Restored auth state for '{}' from backup", profile);

        Ok(AuthState {
            profile: profile.to_string(),
            raw,
            storage,
            meta,
        })
    }

    pub fn has_backup(&self, profile: &str) -> AuthResult<bool> {
        Ok(self.backup_path(profile)?.exists())
    }

    pub async fn status(&self, profile: &str) -> AuthResult<AuthStatus> {
        let has_backup = self.has_backup(profile)?;
        let status = match self.load(profile).await? {
            Some(state) => AuthStatus {
                profile: profile.to_string(),
                present: true,
                stale: state.meta.stale,
                cookies: state.storage.cookies.len(),
                live_cookies: state.storage.live_cookies(Utc::now()),
                saved_at: state.meta.saved_at,
                last_validated: state.meta.last_validated,
                has_backup,
            },
            None => AuthStatus {
                profile: profile.to_string(),
                present: false,
                stale: false,
                cookies: 0,
                live_cookies: 0,
                saved_at: None,
                last_validated: None,
                has_backup,
            },
        };
        Ok(status)
    }
}
