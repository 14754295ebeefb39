//! Task definitions and the capability contract.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use super::outcome::{OutcomeKind, TaskOutcome};
use crate::error::CapabilityFailure;

/// Limit for a single task invocation unless the definition sets its own.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// Keyword arguments passed to a task (name → JSON value).
pub type Kwargs = BTreeMap<String, serde_json::Value>;

/// Per-invocation context handed to a capability.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub run_id: Uuid,
    /// Identifier that was fired (flow id, or the task id for direct runs)
    pub identifier: String,
    /// Zero-based step index when running inside a flow
    pub step: Option<usize>,
}

impl TaskContext {
    pub fn direct(run_id: Uuid, task_id: &str) -> Self {
        Self {
            run_id,
            identifier: task_id.to_string(),
            step: None,
        }
    }
}

/// An executable unit of automation.
///
/// Implemented by the automation layer. The outcome kind is static metadata:
/// the executor interprets failures by it and rejects outcomes of another kind.
#[async_trait]
pub trait TaskCapability: Send + Sync {
    fn outcome_kind(&self) -> OutcomeKind;

    async fn run(
        &self,
        ctx: &TaskContext,
        kwargs: &Kwargs,
    ) -> Result<TaskOutcome, CapabilityFailure>;
}

pub type CapabilityRef = Arc<dyn TaskCapability>;

/// Immutable task metadata plus its capability.
#[derive(Clone)]
pub struct TaskDefinition {
    pub id: String,
    pub name: String,
    pub capability: CapabilityRef,
    pub is_debug: bool,
    /// Explicit schedule visibility; `None` follows `is_debug`
    pub show_in_schedule: Option<bool>,
    pub description: Option<String>,
    pub order: i32,
    pub default_kwargs: Kwargs,
    /// Name used in Action Summary lines for direct runs
    pub summary_name: Option<String>,
    pub timeout: Duration,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capability: CapabilityRef) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capability,
            is_debug: false,
            show_in_schedule: None,
            description: None,
            order: 0,
            default_kwargs: Kwargs::new(),
            summary_name: None,
            timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    pub fn debug(mut self, is_debug: bool) -> Self {
        self.is_debug = is_debug;
        self
    }

    pub fn show_in_schedule(mut self, show: bool) -> Self {
        self.show_in_schedule = Some(show);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn default_kwarg(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.default_kwargs.insert(name.into(), value);
        self
    }

    pub fn default_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.default_kwargs = kwargs;
        self
    }

    pub fn summary_name(mut self, name: impl Into<String>) -> Self {
        self.summary_name = Some(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn outcome_kind(&self) -> OutcomeKind {
        self.capability.outcome_kind()
    }

    pub fn summary_label(&self) -> &str {
        self.summary_name.as_deref().unwrap_or(&self.name)
    }

    /// Debug tasks stay off the schedule unless they opt in explicitly;
    /// any task can opt out.
    pub fn is_schedulable(&self) -> bool {
        (!self.is_debug || self.show_in_schedule == Some(true))
            && self.show_in_schedule != Some(false)
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            outcome: self.outcome_kind(),
            is_debug: self.is_debug,
            schedulable: self.is_schedulable(),
            description: self.description.clone(),
            order: self.order,
        }
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("outcome", &self.outcome_kind())
            .field("is_debug", &self.is_debug)
            .field("show_in_schedule", &self.show_in_schedule)
            .field("order", &self.order)
            .field("default_kwargs", &self.default_kwargs)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Serializable view of a task for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: String,
    pub name: String,
    pub outcome: OutcomeKind,
    pub is_debug: bool,
    pub schedulable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub order: i32,
}
