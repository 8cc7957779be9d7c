//! Cross-source comparison of numeric fields.

use crate::model::{ComparisonResult, FieldKey};
use crate::normalize::FieldObservations;

/// Relative deviation of two values, normalized by the larger magnitude.
pub fn relative_deviation(a: u64, b: u64) -> f64 {
    let diff = a.abs_diff(b) as f64;
    let scale = a.max(b).max(1) as f64;
    diff / scale
}

fn is_numeric(field: &FieldKey) -> bool {
    matches!(
        field,
        FieldKey::PrizeAmount(_) | FieldKey::Winners(_) | FieldKey::Jackpot(_)
    )
}

/// Compare every numeric field observed by at least two sources.
///
/// Only the first two observations by priority are compared. Results are
/// ordered by [`FieldKey`].
pub fn compare(observations: &FieldObservations, threshold: f64) -> Vec<ComparisonResult> {
    observations
        .iter()
        .filter(|(field, _)| is_numeric(field))
        .filter_map(|(field, values)| {
            let [(_, primary), (_, fallback), rest @ ..] = values.as_slice() else {
                return None;
            };
            if !rest.is_empty() {
                tracing::debug!(
                    "{field}: ignoring {} observation(s) beyond the first two",
                    rest.len()
                );
            }
            let deviation = relative_deviation(*primary, *fallback);
            Some(ComparisonResult {
                field: field.clone(),
                primary_value: *primary,
                fallback_value: *fallback,
                relative_deviation: deviation,
                exceeds_threshold: deviation > threshold,
            })
        })
        .collect()
}
