//! Tasks over cached auth state, and script-backed session checks.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use super::command::interpret_output;
use crate::auth::{AuthState, AuthStateManager, Authenticator, SessionProbe};
use crate::error::CapabilityFailure;
use crate::task::{Kwargs, OutcomeKind, TaskCapability, TaskContext, TaskOutcome};

/// Keyword argument that selects the profile.
pub const PROFILE_KWARG: &str = "profile";

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(310);

fn profile_from<'a>(kwargs: &'a Kwargs, default: &'a str) -> &'a str {
    kwargs
        .get(PROFILE_KWARG)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// Continue only if a non-stale state is cached
    Status,
    Backup,
    Restore,
}

/// Maintenance of a profile's cached state as a continuation task.
pub struct AuthMaintenanceTask {
    manager: Arc<AuthStateManager>,
    default_profile: String,
    action: AuthAction,
}

impl AuthMaintenanceTask {
    pub fn new(manager: Arc<AuthStateManager>, default_profile: impl Into<String>, action: AuthAction) -> Self {
        Self {
            manager,
            default_profile: default_profile.into(),
            action,
        }
    }
}

#[async_trait]
impl TaskCapability for AuthMaintenanceTask {
    fn outcome_kind(&self) -> OutcomeKind {
        OutcomeKind::Continuation
    }

    async fn run(&self, _ctx: &TaskContext, kwargs: &Kwargs) -> Result<TaskOutcome, CapabilityFailure> {
        let profile = profile_from(kwargs, &self.default_profile);
        let to_failure = |e: crate::error::AuthError| CapabilityFailure::failed(e.to_string());

        match self.action {
            AuthAction::Status => {
                let usable = self
                    .manager
                    .load(profile)
                    .await
                    .map_err(to_failure)?
                    .is_some_and(|state| !state.meta.stale);
                if !usable {
                    tracing::warn!("No usable auth state for '{}'", profile);
                }
                Ok(TaskOutcome::Continuation(usable))
            }
            AuthAction::Backup => {
                self.manager.backup(profile).await.map_err(to_failure)?;
                Ok(TaskOutcome::Continuation(true))
            }
            AuthAction::Restore => {
                self.manager.restore(profile).await.map_err(to_failure)?;
                Ok(TaskOutcome::Continuation(true))
            }
        }
    }
}

/// Probe and login driven by external scripts.
///
/// The probe runs as `probe... --state <file>` and reports `{"ok": bool}`
/// (or exits 0 for logged in). The login runs as
/// `login... --profile <name> --output <file>` and writes the new
/// snapshot to `<file>`. Confirmation re-runs the probe on that snapshot.
/// A script that outlives its timeout is killed and reported as timed out.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    probe: Vec<String>,
    login: Vec<String>,
    scratch_dir: PathBuf,
    probe_timeout: Duration,
    login_timeout: Duration,
}

impl ScriptedSession {
    pub fn new(probe: Vec<String>, login: Vec<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            probe,
            login,
            scratch_dir: scratch_dir.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    fn scratch_file(&self) -> PathBuf {
        self.scratch_dir
            .join(format!(".session.tmp-{}.json", Uuid::new_v4().simple()))
    }

    async fn run_script(
        &self,
        label: &str,
        command: &[String],
        extra: &[String],
        limit: Duration,
    ) -> Result<std::process::Output, CapabilityFailure> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CapabilityFailure::failed(format!("No {} command configured", label)))?;
        let output = Command::new(program)
            .args(args)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(limit, output).await {
            Ok(result) => result.map_err(|e| {
                CapabilityFailure::failed(format!("Failed to start {} script: {}", label, e))
            }),
            Err(_) => {
                tracing::warn!("{} script exceeded {}s, killed", label, limit.as_secs());
                Err(CapabilityFailure::TimedOut {
                    task: format!("session-{}", label),
                    after: limit,
                })
            }
        }
    }

    async fn probe_snapshot(&self, raw: &[u8]) -> Result<bool, CapabilityFailure> {
        let path = self.scratch_file();
        write_scratch(&path, raw)?;
        let result = self
            .run_script(
                "probe",
                &self.probe,
                &["--state".to_string(), path.display().to_string()],
                self.probe_timeout,
            )
            .await;
        let _ = std::fs::remove_file(&path);

        let output = result?;
        // A failing probe exit means "not logged in", not a broken probe.
        match interpret_output("session-probe", OutcomeKind::Continuation, &output) {
            Ok(TaskOutcome::Continuation(ok)) => Ok(ok),
            Ok(other) => Err(CapabilityFailure::failed(format!(
                "Probe reported {} instead of a login status",
                other
            ))),
            Err(_) => Ok(false),
        }
    }
}

fn write_scratch(path: &Path, raw: &[u8]) -> Result<(), CapabilityFailure> {
    crate::persist::write_atomic(path, raw, crate::persist::FileMode::Private)
        .map_err(|e| CapabilityFailure::failed(format!("Failed to write {}: {}", path.display(), e)))
}

#[async_trait]
impl SessionProbe for ScriptedSession {
    async fn is_authenticated(&self, state: &AuthState) -> Result<bool, CapabilityFailure> {
        self.probe_snapshot(&state.raw).await
    }
}

#[async_trait]
impl Authenticator for ScriptedSession {
    async fn authenticate(&self, profile: &str) -> Result<Vec<u8>, CapabilityFailure> {
        let path = self.scratch_file();
        let output = self
            .run_script(
                "login",
                &self.login,
                &[
                    "--profile".to_string(),
                    profile.to_string(),
                    "--output".to_string(),
                    path.display().to_string(),
                ],
                self.login_timeout,
            )
            .await;
        let raw = output.and_then(|output| {
            interpret_output("session-login", OutcomeKind::Continuation, &output)?;
            std::fs::read(&path).map_err(|e| {
                CapabilityFailure::failed(format!("Login script wrote no snapshot to {}: {}", path.display(), e))
            })
        });
        let _ = std::fs::remove_file(&path);
        raw
    }

    async fn confirm(&self, _profile: &str, raw: &[u8]) -> Result<bool, CapabilityFailure> {
        self.probe_snapshot(raw).await
    }
}

/// Continues only once the profile has a session the probe accepts,
/// logging in again when needed.
pub struct EnsureSessionTask {
    manager: Arc<AuthStateManager>,
    default_profile: String,
    probe: Arc<dyn SessionProbe>,
    authenticator: Arc<dyn Authenticator>,
}

impl EnsureSessionTask {
    pub fn new(
        manager: Arc<AuthStateManager>,
        default_profile: impl Into<String>,
        probe: Arc<dyn SessionProbe>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            manager,
            default_profile: default_profile.into(),
            probe,
            authenticator,
        }
    }
}

#[async_trait]
impl TaskCapability for EnsureSessionTask {
    fn outcome_kind(&self) -> OutcomeKind {
        OutcomeKind::Continuation
    }

    async fn run(&self, _ctx: &TaskContext, kwargs: &Kwargs) -> Result<TaskOutcome, CapabilityFailure> {
        let profile = profile_from(kwargs, &self.default_profile);
        self.manager
            .ensure_session(profile, self.probe.as_ref(), self.authenticator.as_ref())
            .await
            .map(|_| TaskOutcome::Continuation(true))
            .map_err(|e| CapabilityFailure::failed(e.to_string()))
    }
}
