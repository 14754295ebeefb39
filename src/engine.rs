//! Identifier dispatch: run either a flow or a single task by id.
//!
//! Flows and tasks share one identifier namespace. Direct task runs get
//! the same failure mapping as flow steps, and count-bearing tasks write
//! their own Action Summary line.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::flow::{invoke, FlowDefinition, FlowDefinitionStore, FlowExecutor, FlowRunResult};
use crate::flow::args::invocation_kwargs;
use crate::summary::ActionSummary;
use crate::task::{Kwargs, TaskContext, TaskDefinition, TaskOutcome, TaskRegistry};

/// What an identifier resolves to.
#[derive(Debug, Clone)]
pub enum Target {
    Task(Arc<TaskDefinition>),
    Flow(Arc<FlowDefinition>),
}

/// Result of a direct task run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRunResult {
    pub run_id: Uuid,
    pub task_id: String,
    pub outcome: TaskOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ActionSummary>,
}

impl TaskRunResult {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && !self.outcome.halts()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunReport {
    Task(TaskRunResult),
    Flow(FlowRunResult),
}

impl RunReport {
    pub fn summary(&self) -> Option<ActionSummary> {
        match self {
            Self::Task(task) => task.summary.clone(),
            Self::Flow(flow) => Some(flow.summary()),
        }
    }
}

pub struct Engine {
    registry: Arc<TaskRegistry>,
    flows: Arc<FlowDefinitionStore>,
    executor: FlowExecutor,
}

impl Engine {
    pub fn new(registry: Arc<TaskRegistry>, flows: Arc<FlowDefinitionStore>) -> Self {
        let executor = FlowExecutor::new(Arc::clone(&registry));
        Self {
            registry,
            flows,
            executor,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn flows(&self) -> &FlowDefinitionStore {
        &self.flows
    }

    pub fn contains(&self, id: &str) -> bool {
        self.flows.contains(id) || self.registry.contains(id)
    }

    pub fn resolve(&self, id: &str) -> Result<Target, ValidationError> {
        if let Some(flow) = self.flows.get(id) {
            return Ok(Target::Flow(flow));
        }
        self.registry
            .lookup(id)
            .map(Target::Task)
            .map_err(|_| ValidationError::UnknownIdentifier(id.to_string()))
    }

    /// Run an identifier to completion.
    pub async fn run(&self, id: &str, kwargs: &Kwargs) -> Result<RunReport, ValidationError> {
        match self.resolve(id)? {
            Target::Flow(flow) => self.executor.run(flow, kwargs).await.map(RunReport::Flow),
            Target::Task(task) => Ok(RunReport::Task(self.run_task(&task, kwargs).await)),
        }
    }

    async fn run_task(&self, task: &TaskDefinition, invocation: &Kwargs) -> TaskRunResult {
        let run_id = Uuid::new_v4();
        let kwargs = invocation_kwargs(&task.default_kwargs, invocation);
        let ctx = TaskContext::direct(run_id, &task.id);

        tracing::info!("Task '{}' started (run {})", task.name, run_id);
        let (outcome, failure) = match invoke(task, &ctx, &kwargs).await {
            Ok(outcome) => (outcome, None),
            Err(e) => {
                tracing::error!("Task '{}' failed: {}", task.name, e);
                (TaskOutcome::failure(task.outcome_kind()), Some(e.to_string()))
            }
        };
        tracing::info!("Task '{}' finished: {}", task.name, outcome);

        let summary = outcome
            .counts()
            .map(|(count, errors)| ActionSummary::new(task.summary_label(), count, errors));
        if let Some(summary) = &summary {
            summary.emit();
        }

        TaskRunResult {
            run_id,
            task_id: task.id.clone(),
            outcome,
            failure,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowStep;
    use crate::task::testing::StaticTask;
    use crate::task::OutcomeKind;
    use serde_json::json;

    fn engine() -> Engine {
        let mut builder = TaskRegistry::builder();
        builder
            .register(TaskDefinition::new(
                "check-login",
                "Login check",
                StaticTask::arc(TaskOutcome::Continuation(true)),
            ))
            .unwrap()
            .register(
                TaskDefinition::new("like-items", "Like", StaticTask::arc(TaskOutcome::Count(8)))
                    .summary_name("いいね"),
            )
            .unwrap()
            .register(TaskDefinition::new(
                "procure",
                "Procure",
                Arc::new(StaticTask::failing(OutcomeKind::CountErrors, "api down")),
            ))
            .unwrap();
        let registry = Arc::new(builder.build());
        let flows = FlowDefinitionStore::from_definitions(
            vec![FlowDefinition {
                id: "like-flow".into(),
                name: "いいね活動".into(),
                steps: vec![FlowStep::new("check-login"), FlowStep::new("like-items")],
                default_kwargs: Kwargs::new(),
                summary_name: None,
                description: None,
            }],
            &registry,
        )
        .unwrap();
        Engine::new(registry, Arc::new(flows))
    }

    #[tokio::test]
    async fn test_runs_flow_by_id() {
        let report = engine().run("like-flow", &Kwargs::new()).await.unwrap();
        assert!(matches!(report, RunReport::Flow(_)));
        assert_eq!(report.summary().unwrap(), ActionSummary::new("いいね活動", 8, 0));
    }

    #[tokio::test]
    async fn test_direct_task_summaries() {
        let engine = engine();

        let report = engine.run("like-items", &Kwargs::new()).await.unwrap();
        assert_eq!(report.summary().unwrap(), ActionSummary::new("いいね", 8, 0));

        let report = engine.run("procure", &Kwargs::new()).await.unwrap();
        let RunReport::Task(task) = report else {
            panic!("expected task report");
        };
        assert!(!task.succeeded());
        assert_eq!(task.summary.unwrap(), ActionSummary::new("Procure", 0, 1));

        let report = engine
            .run("check-login", &[("count".to_string(), json!(1))].into_iter().collect())
            .await
            .unwrap();
        assert!(report.summary().is_none());
    }

    #[tokio::test]
    async fn test_unknown_identifier() {
        let err = engine().run("nope", &Kwargs::new()).await.unwrap_err();
        assert_eq!(err, ValidationError::UnknownIdentifier("nope".into()));
    }
}
