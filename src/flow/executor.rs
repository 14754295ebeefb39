//! Sequential flow execution.
//!
//! A run moves `Pending → Running(i) → {Running(i+1) | Aborted(i) | Completed}`.
//! Step kwargs are resolved for the whole flow before the first step runs,
//! so argument errors surface without side effects. A `Continuation(false)`
//! (or a failed continuation step) aborts the run and adds exactly one
//! flow-level error on top of whatever was already tallied.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use uuid::Uuid;

use super::aggregate::Tally;
use super::args::{invocation_kwargs, ArgumentResolver};
use super::definition::FlowDefinition;
use crate::error::{CapabilityFailure, ValidationError};
use crate::summary::ActionSummary;
use crate::task::{Kwargs, TaskContext, TaskDefinition, TaskOutcome, TaskRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running { step: usize },
    Aborted { step: usize },
    Completed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Completed)
    }
}

/// What one step did.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub task_id: String,
    pub outcome: TaskOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowRunResult {
    pub run_id: Uuid,
    pub flow_id: String,
    pub summary_name: String,
    pub state: RunState,
    pub tally: Tally,
    pub steps: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FlowRunResult {
    pub fn count(&self) -> u64 {
        self.tally.count()
    }

    pub fn errors(&self) -> u64 {
        self.tally.errors
    }

    pub fn aborted_at(&self) -> Option<usize> {
        match self.state {
            RunState::Aborted { step } => Some(step),
            _ => None,
        }
    }

    pub fn summary(&self) -> ActionSummary {
        ActionSummary::new(self.summary_name.clone(), self.count(), self.errors())
    }
}

#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub task: Arc<TaskDefinition>,
    pub kwargs: Kwargs,
}

/// A flow invocation with every step's kwargs resolved.
#[derive(Debug, Clone)]
pub struct FlowPlan {
    pub flow: Arc<FlowDefinition>,
    pub kwargs: Kwargs,
    pub steps: Vec<PlannedStep>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Invoke a task's capability once.
///
/// Timeouts, panics, and outcomes of the wrong kind all come back as
/// ordinary [`CapabilityFailure`]s.
pub async fn invoke(
    task: &TaskDefinition,
    ctx: &TaskContext,
    kwargs: &Kwargs,
) -> Result<TaskOutcome, CapabilityFailure> {
    let call = AssertUnwindSafe(task.capability.run(ctx, kwargs)).catch_unwind();

    let result = match tokio::time::timeout(task.timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            return Err(CapabilityFailure::TimedOut {
                task: task.id.clone(),
                after: task.timeout,
            })
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome?,
        Err(payload) => {
            return Err(CapabilityFailure::Panicked {
                task: task.id.clone(),
                message: panic_message(payload.as_ref()),
            })
        }
    };

    let declared = task.outcome_kind();
    if outcome.kind() != declared {
        return Err(CapabilityFailure::ContractViolation {
            task: task.id.clone(),
            expected: declared.to_string(),
            actual: outcome.kind().to_string(),
        });
    }
    Ok(outcome)
}

pub struct FlowExecutor {
    registry: Arc<TaskRegistry>,
}

impl FlowExecutor {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve the flow's invocation kwargs and every step's final kwargs.
    pub fn plan(
        &self,
        flow: Arc<FlowDefinition>,
        invocation: &Kwargs,
    ) -> Result<FlowPlan, ValidationError> {
        if flow.steps.is_empty() {
            return Err(ValidationError::MalformedFlow {
                flow: flow.id.clone(),
                reason: "flow has no steps".to_string(),
            });
        }

        let kwargs = invocation_kwargs(&flow.default_kwargs, invocation);
        let resolver = ArgumentResolver::new(&flow.id, &kwargs);

        let steps = flow
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let task = self.registry.lookup(&step.task_id)?;
                let kwargs = resolver.resolve(index, &task, step)?;
                Ok(PlannedStep { task, kwargs })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        Ok(FlowPlan {
            flow: Arc::clone(&flow),
            kwargs,
            steps,
        })
    }

    /// Run a planned flow to a terminal state.
    pub async fn execute(&self, plan: FlowPlan) -> FlowRunResult {
        let FlowPlan { flow, steps, .. } = plan;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = steps.len();

        let mut state = RunState::Pending;
        let mut tally = Tally::default();
        let mut records = Vec::with_capacity(total);

        tracing::info!("--- Flow '{}' started (run {}) ---", flow.name, run_id);

        for (index, step) in steps.iter().enumerate() {
            state = RunState::Running { step: index };
            tracing::info!(
                "  Flow '{}' step {}/{}: {}",
                flow.id,
                index + 1,
                total,
                step.task.name
            );

            let ctx = TaskContext {
                run_id,
                identifier: flow.id.clone(),
                step: Some(index),
            };
            let clock = Instant::now();
            let (outcome, failure) = match invoke(&step.task, &ctx, &step.kwargs).await {
                Ok(outcome) => (outcome, None),
                Err(e) => {
                    tracing::error!(
                        "Step '{}' of flow '{}' failed: {}",
                        step.task.id,
                        flow.id,
                        e
                    );
                    (TaskOutcome::failure(step.task.outcome_kind()), Some(e.to_string()))
                }
            };
            let elapsed_ms = clock.elapsed().as_millis() as u64;
            tracing::debug!("Step '{}' -> {} in {}ms", step.task.id, outcome, elapsed_ms);

            records.push(StepRecord {
                index,
                task_id: step.task.id.clone(),
                outcome,
                failure,
                elapsed_ms,
            });

            if outcome.halts() {
                tally.errors += 1;
                state = RunState::Aborted { step: index };
                tracing::error!(
                    "Flow '{}' aborted at step {} ('{}')",
                    flow.id,
                    index + 1,
                    step.task.name
                );
                break;
            }

            tally.absorb(&outcome);
        }

        if !state.is_terminal() {
            state = RunState::Completed;
            tracing::info!("--- Flow '{}' completed ---", flow.name);
        }

        FlowRunResult {
            run_id,
            flow_id: flow.id.clone(),
            summary_name: flow.summary_label().to_string(),
            state,
            tally,
            steps: records,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Plan, execute, and emit the Action Summary line.
    pub async fn run(
        &self,
        flow: Arc<FlowDefinition>,
        invocation: &Kwargs,
    ) -> Result<FlowRunResult, ValidationError> {
        let plan = self.plan(flow, invocation)?;
        let result = self.execute(plan).await;
        result.summary().emit();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowStep;
    use crate::task::testing::{PanickingTask, SlowTask, StaticTask};
    use crate::task::{CapabilityRef, OutcomeKind};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        executor: FlowExecutor,
    }

    fn fixture(tasks: Vec<(&str, CapabilityRef)>) -> Fixture {
        let mut builder = TaskRegistry::builder();
        for (id, capability) in tasks {
            builder
                .register(TaskDefinition::new(id, id, capability).timeout(Duration::from_millis(200)))
                .unwrap();
        }
        Fixture {
            executor: FlowExecutor::new(Arc::new(builder.build())),
        }
    }

    fn flow(steps: &[&str]) -> Arc<FlowDefinition> {
        Arc::new(FlowDefinition {
            id: "test-flow".into(),
            name: "Test flow".into(),
            steps: steps.iter().map(|s| FlowStep::new(*s)).collect(),
            default_kwargs: Kwargs::new(),
            summary_name: Some("テスト".into()),
            description: None,
        })
    }

    #[tokio::test]
    async fn test_first_count_bearing_step_sets_primary() {
        let fx = fixture(vec![
            (
                "a",
                StaticTask::arc(TaskOutcome::CountErrors {
                    success: 5,
                    errors: 1,
                }),
            ),
            ("b", StaticTask::arc(TaskOutcome::Continuation(true))),
            ("c", StaticTask::arc(TaskOutcome::Count(3))),
        ]);

        let result = fx.executor.run(flow(&["a", "b", "c"]), &Kwargs::new()).await.unwrap();

        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.tally.primary, Some(5));
        assert_eq!(result.errors(), 1);
        assert_eq!(result.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_end_to_end_like_and_post() {
        let fx = fixture(vec![
            ("check-login", StaticTask::arc(TaskOutcome::Continuation(true))),
            ("like-items", StaticTask::arc(TaskOutcome::Count(8))),
            (
                "post-article",
                StaticTask::arc(TaskOutcome::CountErrors {
                    success: 3,
                    errors: 2,
                }),
            ),
        ]);

        let result = fx
            .executor
            .run(flow(&["check-login", "like-items", "post-article"]), &Kwargs::new())
            .await
            .unwrap();

        assert_eq!(result.count(), 8);
        assert_eq!(result.errors(), 2);
        assert_eq!(
            result.summary().to_string(),
            "[Action Summary] name=テスト, count=8, errors=2"
        );
    }

    #[tokio::test]
    async fn test_continuation_false_aborts_with_one_error() {
        let after = StaticTask::arc(TaskOutcome::Count(4));
        let fx = fixture(vec![
            (
                "a",
                StaticTask::arc(TaskOutcome::CountErrors {
                    success: 2,
                    errors: 3,
                }),
            ),
            ("gate", StaticTask::arc(TaskOutcome::Continuation(false))),
            ("after", after.clone()),
        ]);

        let result = fx.executor.run(flow(&["a", "gate", "after"]), &Kwargs::new()).await.unwrap();

        assert_eq!(result.state, RunState::Aborted { step: 1 });
        assert_eq!(result.aborted_at(), Some(1));
        assert_eq!(result.count(), 2);
        assert_eq!(result.errors(), 3 + 1);
        assert_eq!(after.calls(), 0);
        assert_eq!(result.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_continuation_step_aborts() {
        let after = StaticTask::arc(TaskOutcome::Count(4));
        let fx = fixture(vec![
            (
                "check-login",
                Arc::new(StaticTask::failing(OutcomeKind::Continuation, "redirected to login")),
            ),
            ("after", after.clone()),
        ]);

        let result = fx.executor.run(flow(&["check-login", "after"]), &Kwargs::new()).await.unwrap();

        assert_eq!(result.aborted_at(), Some(0));
        assert_eq!(result.count(), 0);
        assert_eq!(result.errors(), 1);
        assert_eq!(after.calls(), 0);
        assert_eq!(result.steps[0].failure.as_deref(), Some("redirected to login"));
    }

    #[tokio::test]
    async fn test_failed_count_step_counts_as_error_and_continues() {
        let fx = fixture(vec![
            ("procure", Arc::new(StaticTask::failing(OutcomeKind::Count, "boom"))),
            ("post", StaticTask::arc(TaskOutcome::Count(6))),
        ]);

        let result = fx.executor.run(flow(&["procure", "post"]), &Kwargs::new()).await.unwrap();

        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.tally.primary, Some(0));
        assert_eq!(result.errors(), 1);
    }

    #[tokio::test]
    async fn test_timeout_panic_and_contract_violation_are_failures() {
        let fx = fixture(vec![
            ("slow", Arc::new(SlowTask(OutcomeKind::Count))),
            ("panics", Arc::new(PanickingTask)),
            (
                "liar",
                Arc::new(StaticTask::mismatched(OutcomeKind::Count, TaskOutcome::Continuation(true))),
            ),
        ]);

        let result = fx
            .executor
            .run(flow(&["slow", "panics", "liar"]), &Kwargs::new())
            .await
            .unwrap();

        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.tally.primary, Some(0));
        assert_eq!(result.errors(), 3);
        assert!(result.steps[0].failure.as_deref().unwrap().contains("timed out"));
        assert!(result.steps[1].failure.as_deref().unwrap().contains("selector vanished"));
        assert!(result.steps[2].failure.as_deref().unwrap().contains("declared count"));
    }

    #[tokio::test]
    async fn test_no_count_bearing_steps_reports_zero() {
        let fx = fixture(vec![("gate", StaticTask::arc(TaskOutcome::Continuation(true)))]);

        let result = fx.executor.run(flow(&["gate"]), &Kwargs::new()).await.unwrap();

        assert_eq!(result.tally.primary, None);
        assert_eq!(result.summary(), ActionSummary::new("テスト", 0, 0));
    }

    #[tokio::test]
    async fn test_flow_arguments_reach_the_step() {
        let like = Arc::new(StaticTask::new(TaskOutcome::Count(1)));
        let fx = fixture(vec![("like-items", like.clone())]);
        let flow = Arc::new(FlowDefinition {
            id: "like-flow".into(),
            name: "Like flow".into(),
            steps: vec![FlowStep::with_overrides(
                "like-items",
                [("count".to_string(), json!("flow_count"))].into_iter().collect(),
            )],
            default_kwargs: [("count".to_string(), json!(10))].into_iter().collect(),
            summary_name: None,
            description: None,
        });

        let invocation: Kwargs = [("count".to_string(), json!(25))].into_iter().collect();
        fx.executor.run(flow, &invocation).await.unwrap();

        assert_eq!(like.last_kwargs().unwrap()["count"], json!(25));
    }

    #[tokio::test]
    async fn test_missing_argument_fails_before_any_step() {
        let first = StaticTask::arc(TaskOutcome::Continuation(true));
        let fx = fixture(vec![
            ("first", first.clone()),
            ("like-items", StaticTask::arc(TaskOutcome::Count(1))),
        ]);
        let flow = Arc::new(FlowDefinition {
            id: "like-flow".into(),
            name: "Like flow".into(),
            steps: vec![
                FlowStep::new("first"),
                FlowStep::with_overrides(
                    "like-items",
                    [("count".to_string(), json!("flow_missing"))].into_iter().collect(),
                ),
            ],
            default_kwargs: Kwargs::new(),
            summary_name: None,
            description: None,
        });

        let err = fx.executor.run(flow, &Kwargs::new()).await.unwrap_err();

        assert!(matches!(err, ValidationError::MissingFlowArgument { ref name, .. } if name == "missing"));
        assert_eq!(first.calls(), 0);
    }
}
