//! Folding step outcomes into a run tally.

use serde::Serialize;

use crate::task::TaskOutcome;

/// Running `(primary, errors)` tally for one run.
///
/// `primary` is set by the first count-bearing outcome in execution order
/// and never overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub primary: Option<u64>,
    pub errors: u64,
}

impl Tally {
    /// Headline count; runs without a count-bearing step report 0.
    pub fn count(&self) -> u64 {
        self.primary.unwrap_or(0)
    }

    /// Fold using the sticky first-count-bearing rule.
    pub fn absorb(&mut self, outcome: &TaskOutcome) {
        *self = fold(*self, outcome, self.primary.is_none());
    }
}

/// Pure fold of one outcome into a tally.
pub fn fold(mut tally: Tally, outcome: &TaskOutcome, is_first_count_bearing: bool) -> Tally {
    match *outcome {
        TaskOutcome::Count(n) => {
            // Secondary Count carries no error figure.
            if is_first_count_bearing {
                tally.primary = Some(n);
            }
        }
        TaskOutcome::CountErrors { success, errors } => {
            if is_first_count_bearing {
                tally.primary = Some(success);
            }
            tally.errors += errors;
        }
        TaskOutcome::Continuation(_) => {}
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_count_bearing_wins() {
        let mut tally = Tally::default();
        for outcome in [
            TaskOutcome::CountErrors {
                success: 5,
                errors: 1,
            },
            TaskOutcome::Continuation(true),
            TaskOutcome::Count(3),
        ] {
            tally.absorb(&outcome);
        }
        assert_eq!(tally.primary, Some(5));
        assert_eq!(tally.errors, 1);
    }

    #[test]
    fn test_secondary_contributes_errors_only() {
        let mut tally = Tally::default();
        tally.absorb(&TaskOutcome::Count(8));
        tally.absorb(&TaskOutcome::CountErrors {
            success: 3,
            errors: 2,
        });
        assert_eq!(tally.primary, Some(8));
        assert_eq!(tally.errors, 2);
    }

    #[test]
    fn test_primary_is_sticky_at_zero() {
        let mut tally = Tally::default();
        tally.absorb(&TaskOutcome::CountErrors {
            success: 0,
            errors: 1,
        });
        tally.absorb(&TaskOutcome::Count(9));
        assert_eq!(tally.primary, Some(0));
        assert_eq!(tally.errors, 1);
    }

    #[test]
    fn test_continuation_only_defaults_to_zero() {
        let mut tally = Tally::default();
        tally.absorb(&TaskOutcome::Continuation(true));
        assert_eq!(tally.primary, None);
        assert_eq!(tally.count(), 0);
        assert_eq!(tally.errors, 0);
    }

    #[test]
    fn test_explicit_fold_flag() {
        let tally = fold(Tally::default(), &TaskOutcome::Count(4), false);
        assert_eq!(tally, Tally::default());
    }
}
