//! Action Summary log lines.
//!
//! Every finished flow (and every count-bearing task run outside a flow)
//! writes exactly one line of the form
//!
//! ```text
//! [Action Summary] name=<name>, count=<count>, errors=<errors>
//! ```
//!
//! The dashboard side aggregates those lines from the log file; that log
//! line is the only contract with it. [`tally_log`] implements the same
//! aggregation for the CLI.

use std::collections::BTreeMap;
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

/// Tracing target the summary line is emitted on.
pub const SUMMARY_TARGET: &str = "action_summary";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionSummary {
    pub name: String,
    pub count: u64,
    pub errors: u64,
}

impl ActionSummary {
    pub fn new(name: impl Into<String>, count: u64, errors: u64) -> Self {
        Self {
            name: name.into(),
            count,
            errors,
        }
    }

    /// Write the summary line to the log.
    pub fn emit(&self) {
        tracing::info!(target: SUMMARY_TARGET, "{}", self);
    }
}

impl fmt::Display for ActionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Action Summary] name={}, count={}, errors={}",
            self.name, self.count, self.errors
        )
    }
}

fn summary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\[Action Summary\]\s*name=(?P<name>[^,]+),\s*count=(?P<count>\d+)(?:,\s*errors=(?P<errors>\d+))?",
        )
        .expect("summary pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not an action summary line")]
pub struct NotASummary;

impl FromStr for ActionSummary {
    type Err = NotASummary;

    /// Finds a summary anywhere in a log line. A missing `errors` field
    /// (older log lines) reads as 0.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let caps = summary_pattern().captures(line).ok_or(NotASummary)?;
        let count = caps["count"].parse().map_err(|_| NotASummary)?;
        let errors = match caps.name("errors") {
            Some(m) => m.as_str().parse().map_err(|_| NotASummary)?,
            None => 0,
        };
        Ok(Self {
            name: caps["name"].trim().to_string(),
            count,
            errors,
        })
    }
}

/// Per-name totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionTotals {
    pub count: u64,
    pub errors: u64,
}

/// Sum summary lines logged at or after `since`.
///
/// Lines must start with an RFC 3339 timestamp (the subscriber's default
/// format); lines without one are skipped, as are lines that are not UTF-8.
/// Names whose totals are both zero are dropped.
pub fn tally_log<R: BufRead>(
    mut reader: R,
    since: DateTime<Utc>,
) -> std::io::Result<BTreeMap<String, ActionTotals>> {
    let mut totals: BTreeMap<String, ActionTotals> = BTreeMap::new();

    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let Ok(line) = std::str::from_utf8(&buf) else {
            continue;
        };
        let line = line.trim_end();
        let Some(stamp) = line.split_whitespace().next() else {
            continue;
        };
        let Ok(logged_at) = DateTime::parse_from_rfc3339(stamp) else {
            continue;
        };
        if logged_at.with_timezone(&Utc) < since {
            continue;
        }
        if let Ok(summary) = line.parse::<ActionSummary>() {
            let entry = totals.entry(summary.name).or_default();
            entry.count += summary.count;
            entry.errors += summary.errors;
        }
    }

    totals.retain(|_, t| t.count > 0 || t.errors > 0);
    Ok(totals)
}
