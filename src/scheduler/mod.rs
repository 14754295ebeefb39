//! Time-based triggering of flows and tasks.
//!
//! - `rule`: recurrence rules (daily time, interval, cron)
//! - `lock`: per-identifier run locks with RAII release
//! - `store`: the `schedules.json` file
//! - `service`: the tick loop, manual fires, and lifecycle

pub mod lock;
pub mod rule;
pub mod service;
pub mod store;

pub use lock::{RunGuard, RunLocks};
pub use rule::{parse_daily_time, RecurrenceRule};
pub use service::{
    FireOutcome, RunHandle, ScheduleOverview, ScheduledJob, Scheduler, TickReport,
    DEFAULT_TICK_INTERVAL,
};
pub use store::{validate_schedule_profile, ScheduleConfig, ScheduleStore, TimeEntry};
