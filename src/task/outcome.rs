//! Step outcomes and the semantics a task declares for them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which outcome shape a task promises to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// `Count(n)`: n successes, no error figure.
    Count,
    /// `CountErrors { success, errors }`.
    CountErrors,
    /// `Continuation(ok)`: gates whether a flow may proceed.
    Continuation,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountErrors => "count_errors",
            Self::Continuation => "continuation",
        }
    }

    /// Whether outcomes of this kind feed the numeric tally.
    pub fn is_count_bearing(&self) -> bool {
        !matches!(self, Self::Continuation)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Count(u64),
    CountErrors { success: u64, errors: u64 },
    Continuation(bool),
}

impl TaskOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Count(_) => OutcomeKind::Count,
            Self::CountErrors { .. } => OutcomeKind::CountErrors,
            Self::Continuation(_) => OutcomeKind::Continuation,
        }
    }

    /// The outcome a raised failure stands for under the given semantics.
    pub fn failure(kind: OutcomeKind) -> Self {
        match kind {
            OutcomeKind::Continuation => Self::Continuation(false),
            OutcomeKind::Count | OutcomeKind::CountErrors => Self::CountErrors {
                success: 0,
                errors: 1,
            },
        }
    }

    /// `(success, errors)` for count-bearing outcomes.
    pub fn counts(&self) -> Option<(u64, u64)> {
        match *self {
            Self::Count(n) => Some((n, 0)),
            Self::CountErrors { success, errors } => Some((success, errors)),
            Self::Continuation(_) => None,
        }
    }

    /// True for `Continuation(false)`.
    pub fn halts(&self) -> bool {
        matches!(self, Self::Continuation(false))
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "count({})", n),
            Self::CountErrors { success, errors } => {
                write!(f, "count_errors({}, {})", success, errors)
            }
            Self::Continuation(ok) => write!(f, "continuation({})", ok),
        }
    }
}
