//! Flows: ordered compositions of tasks.
//!
//! - `definition`: flow/step types and the step-list normalizer
//! - `store`: validated, immutable flow lookup
//! - `args`: `flow_<name>` placeholder resolution
//! - `aggregate`: outcome → tally folding
//! - `executor`: the sequential run state machine

pub mod aggregate;
pub mod args;
pub mod definition;
pub mod executor;
pub mod store;

pub use aggregate::{fold, Tally};
pub use args::{ArgumentResolver, FLOW_ARG_PREFIX};
pub use definition::{normalize_steps, FlowDefinition, FlowSpec, FlowStep, StepList, StepSpec};
pub use executor::{
    invoke, FlowExecutor, FlowPlan, FlowRunResult, PlannedStep, RunState, StepRecord,
};
pub use store::FlowDefinitionStore;
