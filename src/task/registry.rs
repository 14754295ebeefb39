//! Startup-time task registration.
//!
//! Registration goes through [`TaskRegistryBuilder`]; once built, the
//! [`TaskRegistry`] is immutable and shared behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use super::definition::TaskDefinition;
use crate::error::ValidationError;

#[derive(Debug, Default)]
pub struct TaskRegistryBuilder {
    tasks: HashMap<String, Arc<TaskDefinition>>,
}

impl TaskRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Fails if the id is already taken.
    pub fn register(&mut self, definition: TaskDefinition) -> Result<&mut Self, ValidationError> {
        if self.tasks.contains_key(&definition.id) {
            return Err(ValidationError::DuplicateId(definition.id));
        }
        tracing::debug!(
            "Registered task '{}' ({})",
            definition.id,
            definition.outcome_kind()
        );
        self.tasks.insert(definition.id.clone(), Arc::new(definition));
        Ok(self)
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry { tasks: self.tasks }
    }
}

/// Immutable id → definition map.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<TaskDefinition>>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::new()
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<TaskDefinition>, ValidationError> {
        self.tasks
            .get(id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownTask(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All tasks in display order.
    pub fn list(&self) -> Vec<Arc<TaskDefinition>> {
        let mut tasks: Vec<_> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn schedulable(&self) -> Vec<Arc<TaskDefinition>> {
        self.list()
            .into_iter()
            .filter(|t| t.is_schedulable())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::StaticTask;
    use crate::task::TaskOutcome;

    fn task(id: &str, order: i32) -> TaskDefinition {
        TaskDefinition::new(id, id, StaticTask::arc(TaskOutcome::Count(1))).order(order)
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut builder = TaskRegistry::builder();
        builder.register(task("like-items", 30)).unwrap();
        let err = builder.register(task("like-items", 31)).unwrap_err();
        assert_eq!(err, ValidationError::DuplicateId("like-items".into()));
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = TaskRegistry::builder().build();
        assert_eq!(
            registry.lookup("nope").unwrap_err(),
            ValidationError::UnknownTask("nope".into())
        );
    }

    #[test]
    fn test_list_in_display_order() {
        let mut builder = TaskRegistry::builder();
        builder
            .register(task("post-article", 20))
            .unwrap()
            .register(task("procure", 10))
            .unwrap()
            .register(task("follow", 31))
            .unwrap();
        let registry = builder.build();

        let ids: Vec<_> = registry.list().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["procure", "post-article", "follow"]);
        assert_eq!(registry.lookup("follow").unwrap().order, 31);
    }

    #[test]
    fn test_schedulable_filter() {
        let mut builder = TaskRegistry::builder();
        builder
            .register(task("normal", 1))
            .unwrap()
            .register(task("debug", 2).debug(true))
            .unwrap()
            .register(task("debug-visible", 3).debug(true).show_in_schedule(true))
            .unwrap()
            .register(task("hidden", 4).show_in_schedule(false))
            .unwrap();
        let registry = builder.build();

        let ids: Vec<_> = registry
            .schedulable()
            .iter()
            .map(|t| t.id.clone())
            .collect();
        assert_eq!(ids, vec!["normal", "debug-visible"]);
    }
}
