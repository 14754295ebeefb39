//! Step argument resolution.
//!
//! A step's final kwargs are the task defaults overlaid by the step's
//! overrides. An override whose value is the string `flow_<name>` is replaced
//! by the flow's own argument `<name>`. Substitution is single-level and
//! case-sensitive.

use serde_json::Value;

use super::definition::FlowStep;
use crate::error::ValidationError;
use crate::task::{Kwargs, TaskDefinition};

/// Prefix marking a flow-argument placeholder.
pub const FLOW_ARG_PREFIX: &str = "flow_";

/// Name of the flow argument a value refers to, if it is a placeholder.
pub fn placeholder_name(value: &Value) -> Option<&str> {
    value
        .as_str()
        .and_then(|s| s.strip_prefix(FLOW_ARG_PREFIX))
        .filter(|name| !name.is_empty())
}

/// Flow defaults overlaid by the caller's invocation kwargs.
pub fn invocation_kwargs(defaults: &Kwargs, invocation: &Kwargs) -> Kwargs {
    let mut kwargs = defaults.clone();
    kwargs.extend(invocation.iter().map(|(k, v)| (k.clone(), v.clone())));
    kwargs
}

/// Resolves step kwargs against one flow invocation.
pub struct ArgumentResolver<'a> {
    flow_id: &'a str,
    flow_kwargs: &'a Kwargs,
}

impl<'a> ArgumentResolver<'a> {
    pub fn new(flow_id: &'a str, flow_kwargs: &'a Kwargs) -> Self {
        Self {
            flow_id,
            flow_kwargs,
        }
    }

    pub fn resolve(
        &self,
        index: usize,
        task: &TaskDefinition,
        step: &FlowStep,
    ) -> Result<Kwargs, ValidationError> {
        let mut resolved = task.default_kwargs.clone();

        for (key, value) in &step.overrides {
            let value = match placeholder_name(value) {
                Some(name) => self.flow_kwargs.get(name).cloned().ok_or_else(|| {
                    ValidationError::MissingFlowArgument {
                        flow: self.flow_id.to_string(),
                        step: index,
                        task: step.task_id.clone(),
                        name: name.to_string(),
                    }
                })?,
                None => value.clone(),
            };
            resolved.insert(key.clone(), value);
        }

        Ok(resolved)
    }
}
