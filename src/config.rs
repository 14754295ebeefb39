//! Process configuration from environment variables.
//!
//! | Variable              | Default                      |
//! |-----------------------|------------------------------|
//! | `ROOMFLOW_DATA_DIR`   | `db`                         |
//! | `ROOMFLOW_CATALOG`    | `<data_dir>/catalog.yaml`    |
//! | `ROOMFLOW_SCHEDULES`  | `<data_dir>/schedules.json`  |
//! | `ROOMFLOW_AUTH_DIR`   | `<data_dir>/auth`            |
//! | `ROOMFLOW_TICK_MS`    | `1000`                       |
//! | `LOG_LEVEL`           | `info`                       |
//! | `LOG_FORMAT`          | `detailed` (or `simple`)     |
//!
//! Runtime-adjustable values live in [`crate::settings`] instead.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Simple,
    #[default]
    Detailed,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "detailed" => Ok(Self::Detailed),
            other => anyhow::bail!("Unknown LOG_FORMAT '{}' (expected simple or detailed)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub schedules_path: PathBuf,
    pub auth_dir: PathBuf,
    pub tick_interval: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(get("ROOMFLOW_DATA_DIR").unwrap_or_else(|| "db".to_string()));
        let catalog_path = get("ROOMFLOW_CATALOG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("catalog.yaml"));
        let schedules_path = get("ROOMFLOW_SCHEDULES")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("schedules.json"));
        let auth_dir = get("ROOMFLOW_AUTH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("auth"));

        let tick_ms = match get("ROOMFLOW_TICK_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("ROOMFLOW_TICK_MS must be an integer, got '{}'", raw))?,
            None => 1000,
        };
        if tick_ms == 0 {
            anyhow::bail!("ROOMFLOW_TICK_MS must be positive");
        }

        let log_format = match get("LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };

        Ok(Self {
            data_dir,
            catalog_path,
            schedules_path,
            auth_dir,
            tick_interval: Duration::from_millis(tick_ms),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
        })
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("logs").join("app.log")
    }
}
