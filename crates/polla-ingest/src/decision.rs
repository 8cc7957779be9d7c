//! Publish / quarantine decision.

use crate::model::{ComparisonResult, Decision, Outcome, SourceId};

pub const REASON_FORCED: &str = "publication forced by operator";
pub const REASON_MISMATCH: &str = "field mismatch exceeds tolerance";
pub const REASON_AGREE: &str = "all compared fields within tolerance";
pub const REASON_SINGLE_SOURCE: &str = "single source available; no cross-check possible";

/// Operator flags that can affect a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionFlags {
    /// Only changes how source failures abort; never the decision itself.
    pub fail_fast: bool,
    pub force_publish: bool,
}

/// Decide from the reconciler's comparisons.
pub fn decide(comparisons: &[ComparisonResult], flags: DecisionFlags) -> Decision {
    let offending: Vec<ComparisonResult> = comparisons
        .iter()
        .filter(|c| c.exceeds_threshold)
        .cloned()
        .collect();

    let (outcome, reason) = if flags.force_publish {
        (Outcome::PublishForced, REASON_FORCED)
    } else if !offending.is_empty() {
        (Outcome::Quarantine, REASON_MISMATCH)
    } else {
        (Outcome::Publish, REASON_AGREE)
    };

    Decision {
        outcome,
        reason: reason.to_string(),
        offending,
        single_source: None,
    }
}

impl Decision {
    /// Mark a decision taken with only `source` available.
    ///
    /// A forced publication keeps its reason.
    pub fn single_source(mut self, source: SourceId) -> Self {
        if self.outcome == Outcome::Publish {
            self.reason = REASON_SINGLE_SOURCE.to_string();
        }
        self.single_source = Some(source);
        self
    }
}
