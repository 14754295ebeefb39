//! Schedule file (`schedules.json`) persistence.
//!
//! The file maps identifier → schedule. Two shapes are accepted per
//! identifier: a bare list of entries (older files) or
//! `{"enabled": bool, "times": [...]}`. Saves always write the second shape.
//!
//! Named snapshots of the file (schedule profiles) live next to it in
//! `schedule_profiles/<name>.json`.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{bail, Context};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::rule::RecurrenceRule;
use crate::error::ValidationError;
use crate::persist::{write_atomic, FileMode};

const PROFILES_DIR: &str = "schedule_profiles";

fn profile_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.\- ぁ-んァ-ヶー一-龠々]+$")
            .expect("schedule profile pattern is a valid regex")
    })
}

/// Letters, digits, kana, kanji, spaces and `_.-`; no leading dot.
pub fn validate_schedule_profile(name: &str) -> Result<(), ValidationError> {
    if profile_name_pattern().is_match(name) && !name.starts_with('.') {
        Ok(())
    } else {
        Err(ValidationError::InvalidScheduleProfile(name.to_string()))
    }
}

/// One fire time for an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    #[serde(flatten)]
    pub rule: RecurrenceRule,
    /// Passed to the run as the `count` keyword argument
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl TimeEntry {
    pub fn new(rule: RecurrenceRule) -> Self {
        Self { rule, count: None }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }
}

/// Schedule for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub times: Vec<TimeEntry>,
}

impl ScheduleConfig {
    pub fn new(times: Vec<TimeEntry>) -> Self {
        Self {
            enabled: true,
            times,
        }
    }

    pub fn validate(&self, identifier: &str) -> Result<(), ValidationError> {
        for entry in &self.times {
            entry
                .rule
                .validate()
                .map_err(|reason| ValidationError::InvalidSchedule {
                    identifier: identifier.to_string(),
                    reason,
                })?;
        }
        Ok(())
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSchedule {
    Legacy(Vec<serde_json::Value>),
    Current {
        #[serde(default = "enabled_by_default")]
        enabled: bool,
        #[serde(default)]
        times: Vec<serde_json::Value>,
    },
}

/// Parse entries one at a time so a single bad entry does not drop the rest.
fn parse_entries(identifier: &str, raw: Vec<serde_json::Value>) -> Vec<TimeEntry> {
    raw.into_iter()
        .filter_map(|value| {
            let parsed = serde_json::from_value::<TimeEntry>(value.clone())
                .map_err(|e| e.to_string())
                .and_then(|entry| entry.rule.validate().map(|_| entry));
            match parsed {
                Ok(entry) => Some(entry),
                Err(reason) => {
                    tracing::warn!(
                        "Skipping invalid schedule entry for '{}' ({}): {}",
                        identifier,
                        value,
                        reason
                    );
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
    profiles_dir: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let profiles_dir = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(PROFILES_DIR);
        Self { path, profiles_dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the schedule file. A missing file is an empty schedule.
    pub fn load(&self) -> anyhow::Result<BTreeMap<String, ScheduleConfig>> {
        if !self.path.exists() {
            tracing::info!("No schedule file at {}", self.path.display());
            return Ok(BTreeMap::new());
        }
        read_schedules(&self.path)
    }

    pub fn save(&self, schedules: &BTreeMap<String, ScheduleConfig>) -> anyhow::Result<()> {
        write_schedules(&self.path, schedules)?;
        tracing::info!("Saved schedules to {}", self.path.display());
        Ok(())
    }

    fn profile_path(&self, name: &str) -> Result<PathBuf, ValidationError> {
        validate_schedule_profile(name)?;
        Ok(self.profiles_dir.join(format!("{}.json", name)))
    }

    /// Snapshot the current schedule file under `name`, replacing any
    /// profile of the same name.
    pub fn save_profile(&self, name: &str) -> anyhow::Result<()> {
        let path = self.profile_path(name)?;
        write_schedules(&path, &self.load()?)?;
        tracing::info!("Saved schedule profile '{}'", name);
        Ok(())
    }

    /// Schedules stored under `name`. Does not touch the schedule file.
    pub fn load_profile(&self, name: &str) -> anyhow::Result<BTreeMap<String, ScheduleConfig>> {
        let path = self.profile_path(name)?;
        if !path.exists() {
            bail!("Schedule profile '{}' not found", name);
        }
        read_schedules(&path)
    }

    /// Saved profile names, sorted.
    pub fn list_profiles(&self) -> anyhow::Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.profiles_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to list {}", self.profiles_dir.display()))
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let file_name = entry?.file_name().to_string_lossy().to_string();
            if let Some(name) = file_name.strip_suffix(".json") {
                if validate_schedule_profile(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a profile. Returns false when there was none.
    pub fn delete_profile(&self, name: &str) -> anyhow::Result<bool> {
        let path = self.profile_path(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("Deleted schedule profile '{}'", name);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}

fn read_schedules(path: &Path) -> anyhow::Result<BTreeMap<String, ScheduleConfig>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let stored: BTreeMap<String, serde_json::Value> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let mut schedules = BTreeMap::new();
    for (identifier, value) in stored {
        let config = match serde_json::from_value::<StoredSchedule>(value) {
            Ok(StoredSchedule::Legacy(times)) => ScheduleConfig::new(parse_entries(&identifier, times)),
            Ok(StoredSchedule::Current { enabled, times }) => ScheduleConfig {
                enabled,
                times: parse_entries(&identifier, times),
            },
            Err(e) => {
                tracing::warn!("Skipping unreadable schedule for '{}': {}", identifier, e);
                continue;
            }
        };
        schedules.insert(identifier, config);
    }

    Ok(schedules)
}

fn write_schedules(path: &Path, schedules: &BTreeMap<String, ScheduleConfig>) -> anyhow::Result<()> {
    let contents = serde_json::to_string_pretty(schedules)?;
    write_atomic(path, contents.as_bytes(), FileMode::Shared)
        .with_context(|| format!("Failed to write {}", path.display()))
}
