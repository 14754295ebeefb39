//! Flow definitions and the single step-list normalizer.
//!
//! Catalogs may write a flow's steps either as a bare chain
//! (`"check-login | like-items"`) or as `[task_id, {overrides}]` pairs.
//! Both are normalized into the same `Vec<FlowStep>` at load time.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::task::Kwargs;

/// One step of a flow: a task plus its argument overrides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowStep {
    pub task_id: String,
    pub overrides: Kwargs,
}

impl FlowStep {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            overrides: Kwargs::new(),
        }
    }

    pub fn with_overrides(task_id: impl Into<String>, overrides: Kwargs) -> Self {
        Self {
            task_id: task_id.into(),
            overrides,
        }
    }
}

/// A named, ordered composition of task invocations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowDefinition {
    pub id: String,
    pub name: String,
    pub steps: Vec<FlowStep>,
    pub default_kwargs: Kwargs,
    /// Name used in Action Summary lines
    pub summary_name: Option<String>,
    pub description: Option<String>,
}

impl FlowDefinition {
    pub fn summary_label(&self) -> &str {
        self.summary_name.as_deref().unwrap_or(&self.name)
    }

    /// Build a definition from its declarative form.
    pub fn from_spec(spec: FlowSpec) -> Result<Self, ValidationError> {
        let steps = normalize_steps(&spec.id, spec.steps)?;
        Ok(Self {
            name: spec.name.unwrap_or_else(|| spec.id.clone()),
            id: spec.id,
            steps,
            default_kwargs: spec.default_kwargs,
            summary_name: spec.summary_name,
            description: spec.description,
        })
    }
}

/// Declarative flow as written in a catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_kwargs: Kwargs,
    pub steps: StepList,
}

/// Either accepted step encoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StepList {
    /// `"a | b | c"`
    Chain(String),
    /// `[a, [b, {count: flow_count}], c]`
    Steps(Vec<StepSpec>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    Bare(String),
    Pair(String, Kwargs),
}

/// Normalize either step encoding into the canonical ordered sequence.
pub fn normalize_steps(flow_id: &str, list: StepList) -> Result<Vec<FlowStep>, ValidationError> {
    let malformed = |reason: &str| ValidationError::MalformedFlow {
        flow: flow_id.to_string(),
        reason: reason.to_string(),
    };

    let steps: Vec<FlowStep> = match list {
        StepList::Chain(chain) => chain
            .split('|')
            .map(|segment| segment.trim())
            .map(|id| {
                if id.is_empty() {
                    Err(malformed("empty task id in step chain"))
                } else {
                    Ok(FlowStep::new(id))
                }
            })
            .collect::<Result<_, _>>()?,
        StepList::Steps(specs) => specs
            .into_iter()
            .map(|spec| {
                let step = match spec {
                    StepSpec::Bare(id) => FlowStep::new(id.trim()),
                    StepSpec::Pair(id, overrides) => FlowStep::with_overrides(id.trim(), overrides),
                };
                if step.task_id.is_empty() {
                    Err(malformed("empty task id in step list"))
                } else {
                    Ok(step)
                }
            })
            .collect::<Result<_, _>>()?,
    };

    if steps.is_empty() {
        return Err(malformed("flow has no steps"));
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(yaml: &str) -> FlowSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_encodings_normalize_identically() {
        let chain = FlowDefinition::from_spec(spec(
            "id: like-flow\nsteps: \"check-login | like-items | post-article\"\n",
        ))
        .unwrap();
        let pairs = FlowDefinition::from_spec(spec(
            "id: like-flow\nsteps:\n  - [check-login, {}]\n  - [like-items, {}]\n  - [post-article, {}]\n",
        ))
        .unwrap();
        let bare_list = FlowDefinition::from_spec(spec(
            "id: like-flow\nsteps: [check-login, like-items, post-article]\n",
        ))
        .unwrap();

        assert_eq!(chain.steps, pairs.steps);
        assert_eq!(chain.steps, bare_list.steps);
        assert_eq!(chain.steps[2].task_id, "post-article");
    }

    #[test]
    fn test_pair_overrides_kept() {
        let flow = FlowDefinition::from_spec(spec(
            "id: like-flow\nname: いいね活動\nsummary_name: いいね\ndefault_kwargs: {count: 10}\nsteps:\n  - check-login\n  - [like-items, {count: flow_count}]\n",
        ))
        .unwrap();

        assert_eq!(flow.name, "いいね活動");
        assert_eq!(flow.summary_label(), "いいね");
        assert_eq!(flow.default_kwargs["count"], json!(10));
        assert!(flow.steps[0].overrides.is_empty());
        assert_eq!(flow.steps[1].overrides["count"], json!("flow_count"));
    }

    #[test]
    fn test_name_defaults_to_id() {
        let flow = FlowDefinition::from_spec(spec("id: solo\nsteps: check-login\n")).unwrap();
        assert_eq!(flow.name, "solo");
        assert_eq!(flow.summary_label(), "solo");
        assert_eq!(flow.steps, vec![FlowStep::new("check-login")]);
    }

    #[test]
    fn test_malformed_chains_rejected() {
        let err = FlowDefinition::from_spec(spec("id: broken\nsteps: \"a || b\"\n")).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedFlow { .. }));

        let err = FlowDefinition::from_spec(spec("id: empty\nsteps: []\n")).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedFlow { .. }));
    }
}
