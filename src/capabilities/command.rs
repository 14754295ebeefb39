//! Command-backed task capability.
//!
//! Runs an external automation script. Keyword arguments become
//! `--key value` flags and the script reports its outcome as a JSON line
//! on stdout:
//!
//! - `{"count": 8}`
//! - `{"count": 3, "errors": 2}`
//! - `{"ok": true}`
//!
//! The last such line wins, so scripts are free to log other output.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use crate::error::CapabilityFailure;
use crate::task::{Kwargs, OutcomeKind, TaskCapability, TaskContext, TaskOutcome};

/// Characters of stderr kept in failure messages.
const STDERR_TAIL_CHARS: usize = 2_000;

/// Printable end of a process stream, for failure messages. Control
/// characters other than newlines and tabs become spaces.
fn stream_excerpt(bytes: &[u8], max_chars: usize) -> String {
    let printable: String = String::from_utf8_lossy(bytes)
        .chars()
        .map(|c| {
            if c.is_control() && c != '\n' && c != '\t' {
                ' '
            } else {
                c
            }
        })
        .collect();
    tail(&printable, max_chars).to_string()
}

fn tail(text: &str, max_chars: usize) -> &str {
    let trimmed = text.trim_end();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed;
    }
    let skip = count - max_chars;
    match trimmed.char_indices().nth(skip) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}

/// Render kwargs as command-line flags.
pub fn kwargs_to_args(kwargs: &Kwargs) -> Vec<String> {
    let mut args = Vec::new();
    for (key, value) in kwargs {
        let flag = format!("--{}", key);
        match value {
            Value::Bool(true) => args.push(flag),
            Value::Bool(false) | Value::Null => {}
            Value::String(s) => {
                args.push(flag);
                args.push(s.clone());
            }
            other => {
                args.push(flag);
                args.push(other.to_string());
            }
        }
    }
    args
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReportedOutcome {
    Counted {
        count: u64,
        #[serde(default)]
        errors: Option<u64>,
    },
    Continuation {
        ok: bool,
    },
}

impl ReportedOutcome {
    fn into_outcome(self, declared: OutcomeKind) -> TaskOutcome {
        match (self, declared) {
            (Self::Counted { count, errors: None }, OutcomeKind::CountErrors) => {
                TaskOutcome::CountErrors {
                    success: count,
                    errors: 0,
                }
            }
            (Self::Counted { count, errors: None }, _) => TaskOutcome::Count(count),
            (
                Self::Counted {
                    count,
                    errors: Some(errors),
                },
                _,
            ) => TaskOutcome::CountErrors {
                success: count,
                errors,
            },
            (Self::Continuation { ok }, _) => TaskOutcome::Continuation(ok),
        }
    }
}

/// Last stdout line that is an outcome report.
fn parse_reported_outcome(stdout: &str) -> Option<ReportedOutcome> {
    stdout.lines().rev().find_map(|line| {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str::<ReportedOutcome>(line).ok()
    })
}

/// Interpret a finished process as a task outcome.
pub fn interpret_output(
    task: &str,
    kind: OutcomeKind,
    output: &Output,
) -> Result<TaskOutcome, CapabilityFailure> {
    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let detail = stream_excerpt(&output.stderr, STDERR_TAIL_CHARS);
        return Err(CapabilityFailure::failed(if detail.is_empty() {
            format!("'{}' exited with status {}", task, code)
        } else {
            format!("'{}' exited with status {}: {}", task, code, detail)
        }));
    }

    // Scripts may print arbitrary bytes before the report line.
    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_reported_outcome(&stdout) {
        Some(reported) => Ok(reported.into_outcome(kind)),
        None if kind == OutcomeKind::Continuation => Ok(TaskOutcome::Continuation(true)),
        None => Err(CapabilityFailure::failed(format!(
            "'{}' exited without reporting a {} outcome",
            task, kind
        ))),
    }
}

/// Runs `program args... --key value...` for each invocation.
#[derive(Debug, Clone)]
pub struct CommandTask {
    name: String,
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
    kind: OutcomeKind,
}

impl CommandTask {
    pub fn new(name: impl Into<String>, program: impl Into<String>, kind: OutcomeKind) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            kind,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn envs(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn command(&self, ctx: &TaskContext, kwargs: &Kwargs) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).args(kwargs_to_args(kwargs));
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&self.env)
            .env("ROOMFLOW_RUN_ID", ctx.run_id.to_string())
            .env("ROOMFLOW_IDENTIFIER", &ctx.identifier)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out invocation drops this future; the child goes with it.
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TaskCapability for CommandTask {
    fn outcome_kind(&self) -> OutcomeKind {
        self.kind
    }

    async fn run(&self, ctx: &TaskContext, kwargs: &Kwargs) -> Result<TaskOutcome, CapabilityFailure> {
        tracing::info!("Executing '{}': {} {:?}", self.name, self.program, self.args);

        let child = self
            .command(ctx, kwargs)
            .spawn()
            .map_err(|e| CapabilityFailure::failed(format!("Failed to start '{}': {}", self.program, e)))?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CapabilityFailure::failed(format!("Failed to wait for '{}': {}", self.program, e)))?;

        tracing::debug!(
            "'{}' completed: exit={:?}, stdout_len={}, stderr_len={}",
            self.name,
            output.status.code(),
            output.stdout.len(),
            output.stderr.len()
        );

        interpret_output(&self.name, self.kind, &output)
    }
}
