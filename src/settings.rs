//! Runtime settings storage.
//!
//! Persists user-adjustable settings to `{data_dir}/config.json`. Keys the
//! file does not know are ignored and missing keys fall back to defaults,
//! so older and newer files both load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::persist::{write_atomic, FileMode};

/// Default upper bound for the random start delay of scheduled runs.
pub const DEFAULT_MAX_DELAY_MINUTES: u64 = 5;

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Scheduled runs start after a random delay of up to this many minutes.
    pub max_delay_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_delay_minutes: DEFAULT_MAX_DELAY_MINUTES,
        }
    }
}

/// In-memory settings with disk persistence.
#[derive(Debug)]
pub struct SettingsStore {
    settings: RwLock<Settings>,
    storage_path: PathBuf,
}

impl SettingsStore {
    /// Create a settings store, loading from disk if available.
    pub async fn new(data_dir: &Path) -> Self {
        let storage_path = data_dir.join("config.json");

        let settings = if storage_path.exists() {
            match Self::load_from_path(&storage_path) {
                Ok(s) => {
                    tracing::info!("Loaded settings from {}", storage_path.display());
                    s
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load settings from {}: {}, using defaults",
                        storage_path.display(),
                        e
                    );
                    Settings::default()
                }
            }
        } else {
            tracing::info!(
                "No settings file found at {}, using defaults",
                storage_path.display()
            );
            Settings::default()
        };

        Self {
            settings: RwLock::new(settings),
            storage_path,
        }
    }

    fn load_from_path(path: &Path) -> Result<Settings, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    async fn save_to_disk(&self) -> Result<(), std::io::Error> {
        let settings = self.settings.read().await;

        let contents = serde_json::to_string_pretty(&*settings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        write_atomic(&self.storage_path, contents.as_bytes(), FileMode::Shared)?;
        tracing::info!("Saved settings to {}", self.storage_path.display());
        Ok(())
    }

    /// Get a clone of the current settings.
    pub async fn get(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Replace all settings and persist them.
    pub async fn update(&self, new_settings: Settings) -> Result<(), std::io::Error> {
        let mut settings = self.settings.write().await;
        *settings = new_settings;
        drop(settings);
        self.save_to_disk().await
    }

    /// Reload settings from disk.
    pub async fn reload(&self) -> Result<(), std::io::Error> {
        if self.storage_path.exists() {
            let loaded = Self::load_from_path(&self.storage_path)?;
            let mut settings = self.settings.write().await;
            *settings = loaded;
            tracing::info!("Reloaded settings from {}", self.storage_path.display());
        }
        Ok(())
    }
}

/// Shared settings store wrapped in Arc for concurrent access.
pub type SharedSettingsStore = Arc<SettingsStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_defaults_without_file() {
        let temp = tempdir().unwrap();
        let store = SettingsStore::new(temp.path()).await;
        assert_eq!(store.get().await.max_delay_minutes, DEFAULT_MAX_DELAY_MINUTES);
    }

    #[tokio::test]
    async fn test_unknown_keys_ignored_and_missing_defaulted() {
        let temp = tempdir().unwrap();
        std::fs::write(
            temp.path().join("config.json"),
            r#"{"playwright_headless": false, "procurement_method": "api"}"#,
        )
        .unwrap();

        let store = SettingsStore::new(temp.path()).await;
        assert_eq!(store.get().await, Settings::default());
    }

    #[tokio::test]
    async fn test_update_persists() {
        let temp = tempdir().unwrap();
        let store = SettingsStore::new(temp.path()).await;
        store
            .update(Settings {
                max_delay_minutes: 0,
            })
            .await
            .unwrap();

        let reopened = SettingsStore::new(temp.path()).await;
        assert_eq!(reopened.get().await.max_delay_minutes, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("config.json"), "{not json").unwrap();
        let store = SettingsStore::new(temp.path()).await;
        assert_eq!(store.get().await, Settings::default());
        assert!(store.reload().await.is_err());
    }
}
