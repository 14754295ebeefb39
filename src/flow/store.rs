//! Immutable flow store, validated against the task registry at load.

use std::collections::HashMap;
use std::sync::Arc;

use super::definition::{FlowDefinition, FlowSpec};
use crate::error::ValidationError;
use crate::task::TaskRegistry;

#[derive(Debug, Default)]
pub struct FlowDefinitionStore {
    flows: HashMap<String, Arc<FlowDefinition>>,
}

impl FlowDefinitionStore {
    /// Normalize and validate declarative flows.
    ///
    /// Flow ids share a namespace with task ids, and every step must name a
    /// registered task.
    pub fn from_specs(
        specs: impl IntoIterator<Item = FlowSpec>,
        registry: &TaskRegistry,
    ) -> Result<Self, ValidationError> {
        let definitions = specs
            .into_iter()
            .map(FlowDefinition::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_definitions(definitions, registry)
    }

    pub fn from_definitions(
        definitions: impl IntoIterator<Item = FlowDefinition>,
        registry: &TaskRegistry,
    ) -> Result<Self, ValidationError> {
        let mut flows = HashMap::new();

        for flow in definitions {
            if registry.contains(&flow.id) || flows.contains_key(&flow.id) {
                return Err(ValidationError::DuplicateId(flow.id));
            }
            if flow.steps.is_empty() {
                return Err(ValidationError::MalformedFlow {
                    flow: flow.id,
                    reason: "flow has no steps".to_string(),
                });
            }
            for step in &flow.steps {
                if !registry.contains(&step.task_id) {
                    return Err(ValidationError::MalformedFlow {
                        flow: flow.id.clone(),
                        reason: format!("step references unknown task '{}'", step.task_id),
                    });
                }
            }
            tracing::debug!("Loaded flow '{}' ({} steps)", flow.id, flow.steps.len());
            flows.insert(flow.id.clone(), Arc::new(flow));
        }

        Ok(Self { flows })
    }

    pub fn get(&self, id: &str) -> Option<Arc<FlowDefinition>> {
        self.flows.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.flows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn list(&self) -> Vec<Arc<FlowDefinition>> {
        let mut flows: Vec<_> = self.flows.values().cloned().collect();
        flows.sort_by(|a, b| a.id.cmp(&b.id));
        flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowStep;
    use crate::task::testing::StaticTask;
    use crate::task::{TaskDefinition, TaskOutcome};

    fn registry() -> TaskRegistry {
        let mut builder = TaskRegistry::builder();
        builder
            .register(TaskDefinition::new(
                "check-login",
                "Login check",
                StaticTask::arc(TaskOutcome::Continuation(true)),
            ))
            .unwrap()
            .register(TaskDefinition::new(
                "like-items",
                "Like",
                StaticTask::arc(TaskOutcome::Count(1)),
            ))
            .unwrap();
        builder.build()
    }

    fn flow(id: &str, steps: &[&str]) -> FlowDefinition {
        FlowDefinition {
            id: id.to_string(),
            name: id.to_string(),
            steps: steps.iter().map(|s| FlowStep::new(*s)).collect(),
            default_kwargs: Default::default(),
            summary_name: None,
            description: None,
        }
    }

    #[test]
    fn test_valid_flows_load() {
        let store = FlowDefinitionStore::from_definitions(
            vec![flow("like-flow", &["check-login", "like-items"])],
            &registry(),
        )
        .unwrap();
        assert!(store.contains("like-flow"));
        assert_eq!(store.get("like-flow").unwrap().steps.len(), 2);
    }

    #[test]
    fn test_unknown_step_task_rejected() {
        let err = FlowDefinitionStore::from_definitions(
            vec![flow("like-flow", &["check-login", "follow"])],
            &registry(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MalformedFlow { ref flow, .. } if flow == "like-flow"));
    }

    #[test]
    fn test_id_collisions_rejected() {
        let err = FlowDefinitionStore::from_definitions(
            vec![flow("like-items", &["check-login"])],
            &registry(),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateId("like-items".into()));

        let err = FlowDefinitionStore::from_definitions(
            vec![flow("a", &["check-login"]), flow("a", &["like-items"])],
            &registry(),
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateId("a".into()));
    }
}
