//! Declarative task and flow catalog (`catalog.yaml`).
//!
//! ```yaml
//! auth:
//!   profile: main
//!   probe: [python, -m, automation.check_login]
//!   login: [python, -m, automation.login]
//!   login_timeout_secs: 310
//! tasks:
//!   - id: like-items
//!     name: いいね
//!     command: [python, -m, automation.like]
//!     outcome: count_errors
//!     timeout_secs: 1800
//!     default_kwargs: { count: 10 }
//! flows:
//!   - id: like-flow
//!     name: いいね活動
//!     default_kwargs: { count: 25 }
//!     steps: "ensure-session | like-items"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::capabilities::{CommandTask, ScriptedSession};
use crate::error::ValidationError;
use crate::flow::{FlowDefinitionStore, FlowSpec};
use crate::task::{Kwargs, OutcomeKind, TaskDefinition, TaskRegistry, TaskRegistryBuilder};

pub const DEFAULT_PROFILE: &str = "main";

fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSpec {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub probe: Vec<String>,
    #[serde(default)]
    pub login: Vec<String>,
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
    #[serde(default)]
    pub login_timeout_secs: Option<u64>,
}

impl Default for AuthSpec {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            probe: Vec::new(),
            login: Vec::new(),
            probe_timeout_secs: None,
            login_timeout_secs: None,
        }
    }
}

impl AuthSpec {
    /// Scripted session checks, when both scripts are configured.
    pub fn session(&self, scratch_dir: &Path) -> Option<ScriptedSession> {
        if self.probe.is_empty() || self.login.is_empty() {
            return None;
        }
        let mut session = ScriptedSession::new(self.probe.clone(), self.login.clone(), scratch_dir);
        if let Some(secs) = self.probe_timeout_secs {
            session = session.probe_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.login_timeout_secs {
            session = session.login_timeout(Duration::from_secs(secs));
        }
        Some(session)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandTaskSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Program followed by its fixed arguments
    pub command: Vec<String>,
    pub outcome: OutcomeKind,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub show_in_schedule: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub default_kwargs: Kwargs,
    #[serde(default)]
    pub summary_name: Option<String>,
}

impl CommandTaskSpec {
    pub fn into_definition(self) -> Result<TaskDefinition, ValidationError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ValidationError::InvalidTask {
                task: self.id.clone(),
                reason: "command is empty".to_string(),
            })?;
        if self.timeout_secs == Some(0) {
            return Err(ValidationError::InvalidTask {
                task: self.id,
                reason: "timeout_secs must be positive".to_string(),
            });
        }

        let name = self.name.clone().unwrap_or_else(|| self.id.clone());
        let mut capability = CommandTask::new(&name, program, self.outcome)
            .args(args.iter().cloned())
            .envs(self.env);
        if let Some(cwd) = self.cwd {
            capability = capability.cwd(cwd);
        }

        let mut definition = TaskDefinition::new(self.id, name, Arc::new(capability))
            .debug(self.debug)
            .order(self.order)
            .default_kwargs(self.default_kwargs);
        definition.show_in_schedule = self.show_in_schedule;
        definition.description = self.description;
        definition.summary_name = self.summary_name;
        if let Some(secs) = self.timeout_secs {
            definition = definition.timeout(Duration::from_secs(secs));
        }
        Ok(definition)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub auth: AuthSpec,
    #[serde(default)]
    pub tasks: Vec<CommandTaskSpec>,
    #[serde(default)]
    pub flows: Vec<FlowSpec>,
}

impl Catalog {
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load the catalog. A missing file is an empty catalog.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("No catalog at {}, only built-in tasks are available", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        let catalog = Self::parse(&contents)
            .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
        tracing::info!(
            "Loaded catalog {} ({} tasks, {} flows)",
            path.display(),
            catalog.tasks.len(),
            catalog.flows.len()
        );
        Ok(catalog)
    }

    pub fn register_tasks(&self, builder: &mut TaskRegistryBuilder) -> Result<(), ValidationError> {
        for spec in &self.tasks {
            builder.register(spec.clone().into_definition()?)?;
        }
        Ok(())
    }

    pub fn flow_store(&self, registry: &TaskRegistry) -> Result<FlowDefinitionStore, ValidationError> {
        FlowDefinitionStore::from_specs(self.flows.iter().cloned(), registry)
    }
}
