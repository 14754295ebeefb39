//! The scheduler service: a tick loop over the job table.
//!
//! Each tick advances every due job to its next fire time and tries the
//! identifier's run lock. A held lock means the trigger is skipped and
//! logged. An acquired lock moves into a spawned worker that runs the
//! identifier through the [`Engine`] and releases the lock however the
//! worker ends.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lock::{RunGuard, RunLocks};
use super::rule::RecurrenceRule;
use super::store::{ScheduleConfig, ScheduleStore, TimeEntry};
use crate::engine::{Engine, RunReport};
use crate::error::ValidationError;
use crate::settings::SharedSettingsStore;
use crate::task::Kwargs;

/// Default dispatch loop period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// A row of the job table.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub identifier: String,
    pub rule: RecurrenceRule,
    pub kwargs: Kwargs,
    pub next_fire: Option<DateTime<Local>>,
}

impl ScheduledJob {
    fn new(identifier: &str, entry: &TimeEntry, now: &DateTime<Local>) -> Self {
        let mut kwargs = Kwargs::new();
        if let Some(count) = entry.count {
            kwargs.insert("count".to_string(), json!(count));
        }
        Self {
            identifier: identifier.to_string(),
            rule: entry.rule.clone(),
            kwargs,
            next_fire: entry.rule.next_after(now),
        }
    }

    fn is_due(&self, now: &DateTime<Local>) -> bool {
        self.next_fire.is_some_and(|at| at <= *now)
    }
}

/// Receives a worker's result. `None` when the run never started
/// (cancelled during the start delay) or the identifier failed validation.
/// Resolves to an error if the worker panicked.
///
/// The scheduler tracks the worker itself, so dropping the handle neither
/// cancels the run nor keeps [`Scheduler::stop`] from waiting for it.
pub type RunHandle = oneshot::Receiver<Option<RunReport>>;

pub enum FireOutcome {
    Started(RunHandle),
    /// Another run of the identifier is in flight
    Skipped,
}

impl FireOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub fired: Vec<String>,
    pub skipped: Vec<String>,
}

/// Schedule state of one schedulable identifier.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleOverview {
    pub identifier: String,
    pub name: String,
    pub enabled: bool,
    pub times: Vec<TimeEntry>,
    pub next_fire: Option<DateTime<Local>>,
    pub running: bool,
}

pub struct Scheduler {
    engine: Arc<Engine>,
    settings: SharedSettingsStore,
    store: ScheduleStore,
    tick_interval: Duration,
    schedules: RwLock<BTreeMap<String, ScheduleConfig>>,
    jobs: RwLock<Vec<ScheduledJob>>,
    locks: RunLocks,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    skipped: AtomicU64,
    /// Maps `max_delay_minutes` to the delay before a scheduled run
    start_delay: fn(u64) -> Duration,
}

impl Scheduler {
    pub fn new(
        engine: Arc<Engine>,
        settings: SharedSettingsStore,
        store: ScheduleStore,
        tick_interval: Duration,
    ) -> Self {
        Self {
            engine,
            settings,
            store,
            tick_interval,
            schedules: RwLock::new(BTreeMap::new()),
            jobs: RwLock::new(Vec::new()),
            locks: RunLocks::new(),
            cancel: CancellationToken::new(),
            loop_handle: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            skipped: AtomicU64::new(0),
            start_delay: random_start_delay,
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    /// Re-read settings and the schedule file, then rebuild the job table.
    /// Returns the number of jobs.
    pub async fn reload(&self) -> anyhow::Result<usize> {
        if let Err(e) = self.settings.reload().await {
            tracing::warn!("Keeping current settings, reload failed: {}", e);
        }

        let mut current = self.schedules.write().await;
        let schedules = self.store.load()?;
        Ok(self.install(&mut current, schedules).await)
    }

    /// Replace the schedule table and its jobs. The caller holds the
    /// schedules lock, so the file and the table change together.
    async fn install(
        &self,
        current: &mut BTreeMap<String, ScheduleConfig>,
        schedules: BTreeMap<String, ScheduleConfig>,
    ) -> usize {
        let jobs = self.build_jobs(&schedules, &Local::now());
        let count = jobs.len();

        *self.jobs.write().await = jobs;
        *current = schedules;
        tracing::info!("Scheduler loaded {} job(s)", count);
        count
    }

    fn build_jobs(
        &self,
        schedules: &BTreeMap<String, ScheduleConfig>,
        now: &DateTime<Local>,
    ) -> Vec<ScheduledJob> {
        let mut jobs = Vec::new();
        for (identifier, config) in schedules {
            if !self.engine.contains(identifier) {
                tracing::warn!("Schedule references unknown identifier '{}', skipping", identifier);
                continue;
            }
            if !config.enabled {
                tracing::debug!("Schedule for '{}' is disabled", identifier);
                continue;
            }
            for entry in &config.times {
                let job = ScheduledJob::new(identifier, entry, now);
                match job.next_fire {
                    Some(at) => {
                        tracing::info!("Scheduled '{}' {} (next {})", identifier, job.rule, at)
                    }
                    None => {
                        tracing::warn!("'{}' {} has no upcoming fire time", identifier, job.rule)
                    }
                }
                jobs.push(job);
            }
        }
        jobs
    }

    /// Replace the schedule of one identifier, save the file, and reload.
    pub async fn update_schedule(
        &self,
        identifier: &str,
        config: ScheduleConfig,
    ) -> anyhow::Result<()> {
        if !self.engine.contains(identifier) {
            return Err(ValidationError::UnknownIdentifier(identifier.to_string()).into());
        }
        config.validate(identifier)?;

        let mut current = self.schedules.write().await;
        let mut schedules = current.clone();
        schedules.insert(identifier.to_string(), config);
        self.store.save(&schedules)?;
        self.install(&mut current, schedules).await;
        Ok(())
    }

    /// Make a saved schedule profile the active schedule.
    /// Returns the number of jobs.
    pub async fn load_profile(&self, name: &str) -> anyhow::Result<usize> {
        let mut current = self.schedules.write().await;
        let schedules = self.store.load_profile(name)?;
        self.store.save(&schedules)?;
        tracing::info!("Loaded schedule profile '{}'", name);
        Ok(self.install(&mut current, schedules).await)
    }

    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.read().await.clone()
    }

    pub fn is_running(&self, identifier: &str) -> bool {
        self.locks.is_held(identifier)
    }

    /// Triggers dropped because a run was already in flight.
    pub fn skipped_count(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Fire every job that is due at `now`.
    pub async fn tick(&self, now: DateTime<Local>) -> TickReport {
        let due: Vec<(String, Kwargs)> = {
            let mut jobs = self.jobs.write().await;
            jobs.iter_mut()
                .filter(|job| job.is_due(&now))
                .map(|job| {
                    job.next_fire = job.rule.next_after(&now);
                    (job.identifier.clone(), job.kwargs.clone())
                })
                .collect()
        };

        let mut report = TickReport::default();
        for (identifier, kwargs) in due {
            match self.dispatch(&identifier, kwargs, Trigger::Scheduled).await {
                FireOutcome::Started(_) => report.fired.push(identifier),
                FireOutcome::Skipped => report.skipped.push(identifier),
            }
        }
        report
    }

    /// Run an identifier right away, without start delay.
    pub async fn fire_now(
        &self,
        identifier: &str,
        kwargs: Kwargs,
    ) -> Result<FireOutcome, ValidationError> {
        if !self.engine.contains(identifier) {
            return Err(ValidationError::UnknownIdentifier(identifier.to_string()));
        }
        Ok(self.dispatch(identifier, kwargs, Trigger::Manual).await)
    }

    async fn dispatch(&self, identifier: &str, kwargs: Kwargs, trigger: Trigger) -> FireOutcome {
        let Some(guard) = self.locks.try_acquire(identifier) else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "'{}' is already running; skipping {:?} trigger",
                identifier,
                trigger
            );
            return FireOutcome::Skipped;
        };

        let delay = match trigger {
            Trigger::Scheduled => (self.start_delay)(self.settings.get().await.max_delay_minutes),
            Trigger::Manual => Duration::ZERO,
        };

        let engine = Arc::clone(&self.engine);
        let cancel = self.cancel.child_token();
        let (tx, rx) = oneshot::channel();
        let worker = tokio::spawn(async move {
            let result = run_worker(engine, guard, kwargs, delay, cancel).await;
            let _ = tx.send(result);
        });
        self.track(worker).await;
        FireOutcome::Started(rx)
    }

    async fn track(&self, worker: JoinHandle<()>) {
        let mut workers = self.workers.lock().await;
        workers.retain(|worker| !worker.is_finished());
        workers.push(worker);
    }

    /// Start the dispatch loop. Calling it again while running is a no-op.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut loop_handle = self.loop_handle.lock().await;
        if loop_handle.is_some() {
            return Ok(());
        }
        self.reload().await?;

        let scheduler = Arc::clone(self);
        *loop_handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = scheduler.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let report = scheduler.tick(Local::now()).await;
                        if !report.fired.is_empty() {
                            tracing::debug!("Tick fired {:?}", report.fired);
                        }
                    }
                }
            }
            tracing::info!("Scheduler loop stopped");
        }));
        tracing::info!(
            "Scheduler started (tick every {}ms)",
            self.tick_interval.as_millis()
        );
        Ok(())
    }

    /// Stop the loop, cancel pending start delays, and wait for in-flight runs.
    pub async fn stop(&self) {
        self.cancel.cancel();

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler loop ended abnormally: {}", e);
            }
        }

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().await);
        if !workers.is_empty() {
            tracing::info!("Waiting for {} run(s) to finish", workers.len());
        }
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::error!("Run ended abnormally: {}", e);
            }
        }
    }

    /// Schedule state for every schedulable task and every flow.
    pub async fn overview(&self) -> Vec<ScheduleOverview> {
        let schedules = self.schedules.read().await;
        let jobs = self.jobs.read().await;

        let mut candidates: Vec<(String, String)> = self
            .engine
            .flows()
            .list()
            .into_iter()
            .map(|flow| (flow.id.clone(), flow.name.clone()))
            .collect();
        candidates.extend(
            self.engine
                .registry()
                .schedulable()
                .into_iter()
                .map(|task| (task.id.clone(), task.name.clone())),
        );

        candidates
            .into_iter()
            .map(|(identifier, name)| {
                let config = schedules.get(&identifier);
                let next_fire = jobs
                    .iter()
                    .filter(|job| job.identifier == identifier)
                    .filter_map(|job| job.next_fire)
                    .min();
                ScheduleOverview {
                    running: self.is_running(&identifier),
                    enabled: config.map(|c| c.enabled).unwrap_or(false),
                    times: config.map(|c| c.times.clone()).unwrap_or_default(),
                    next_fire,
                    identifier,
                    name,
                }
            })
            .collect()
    }
}

/// A uniformly random delay in `[0, max_delay_minutes * 60]` seconds.
fn start_delay<R: Rng>(max_delay_minutes: u64, rng: &mut R) -> Duration {
    let max_secs = max_delay_minutes.saturating_mul(60);
    if max_secs == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(rng.gen_range(0..=max_secs))
}

fn random_start_delay(max_delay_minutes: u64) -> Duration {
    start_delay(max_delay_minutes, &mut rand::thread_rng())
}

async fn run_worker(
    engine: Arc<Engine>,
    guard: RunGuard,
    kwargs: Kwargs,
    delay: Duration,
    cancel: CancellationToken,
) -> Option<RunReport> {
    let identifier = guard.identifier().to_string();

    if !delay.is_zero() {
        tracing::info!(
            "'{}' starts in {}m{}s",
            identifier,
            delay.as_secs() / 60,
            delay.as_secs() % 60
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("'{}' cancelled before start", identifier);
                return None;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let result = engine.run(&identifier, &kwargs).await;
    drop(guard);

    match result {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!("Scheduled run of '{}' failed: {}", identifier, e);
            None
        }
    }
}
