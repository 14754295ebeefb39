//! # roomflow
//!
//! Scheduled browser-automation flows for a social shopping site, with
//! self-healing login sessions.
//!
//! This library provides:
//! - A registry of tasks with declared outcome semantics
//! - Flows composed of tasks, with argument passing and result aggregation
//! - A scheduler with per-identifier mutual exclusion
//! - Crash-safe persistence of cached login sessions
//!
//! ## Architecture
//!
//! ```text
//!   Scheduler ──tick──▶ RunLocks ──▶ Engine ──▶ FlowExecutor ──▶ TaskCapability
//!       ▲                              │              │
//!   schedules.json              TaskRegistry    ArgumentResolver / Tally
//!                                FlowStore            │
//!                                                     ▼
//!                                           [Action Summary] log line
//! ```
//!
//! ## Run Flow
//! 1. Resolve the identifier (flow or task)
//! 2. Resolve every step's arguments before running anything
//! 3. Run steps in order; a `false` continuation aborts the rest
//! 4. Fold outcomes into one count and one error total
//! 5. Write the Action Summary line
//!
//! ## Modules
//! - `task`: outcome types, task definitions, the registry
//! - `flow`: flow definitions, argument resolution, aggregation, execution
//! - `engine`: identifier dispatch
//! - `scheduler`: recurrence rules, run locks, the tick loop
//! - `auth`: cached session persistence and re-authentication
//! - `capabilities`: command-backed and auth-state tasks
//! - `catalog`, `config`, `settings`, `logging`, `cli`, `app`: the ambient stack

pub mod app;
pub mod auth;
pub mod capabilities;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
pub mod logging;
pub mod persist;
pub mod scheduler;
pub mod settings;
pub mod summary;
pub mod task;

pub use config::Config;
pub use engine::{Engine, RunReport};
pub use error::{AuthError, CapabilityFailure, ValidationError};
