//! Task module - defines tasks, their outcome semantics, and the registry.
//!
//! This module is designed around a few invariants:
//! - Outcomes are an algebraic data type with exhaustive matching
//! - A task's outcome kind is declared up front, never inferred from results
//! - The registry is frozen once startup registration completes

pub mod definition;
pub mod outcome;
pub mod registry;

pub use definition::{
    CapabilityRef, Kwargs, TaskCapability, TaskContext, TaskDefinition, TaskInfo,
    DEFAULT_TASK_TIMEOUT,
};
pub use outcome::{OutcomeKind, TaskOutcome};
pub use registry::{TaskRegistry, TaskRegistryBuilder};
