//! The pure assignment decision. `assign` is a function of its inputs
//! only: a fixed experiment and a fixed user identity produce the same
//! result on every call and across process restarts.

use shopsplit_core::types::{Experiment, UserContext, Variant};
use tracing::debug;

use crate::bucketing::{traffic_bucket, variant_bucket};
use crate::targeting;

/// Why a user was excluded from an experiment. Surfaced in logs only; the
/// caller just sees `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    TrafficAllocation,
    Targeting,
}

/// Decide the variant for `user` in `experiment`, or `None` when the user
/// is excluded. The caller is responsible for only passing experiments
/// that are currently running.
///
/// The traffic gate is checked before targeting rules; the inclusion
/// outcome is identical either way, the order only decides which exclusion
/// reason gets logged.
pub fn assign<'a>(user: &UserContext, experiment: &'a Experiment) -> Option<&'a Variant> {
    let traffic = traffic_bucket(&user.user_id, &experiment.id);
    if traffic >= experiment.traffic_allocation {
        debug!(
            user_id = %user.user_id,
            experiment_id = %experiment.id,
            traffic_bucket = traffic,
            reason = ?ExclusionReason::TrafficAllocation,
            "user excluded from experiment"
        );
        return None;
    }

    if !experiment.targeting_rules.is_empty()
        && !targeting::evaluate(user, &experiment.targeting_rules)
    {
        debug!(
            user_id = %user.user_id,
            experiment_id = %experiment.id,
            reason = ?ExclusionReason::Targeting,
            "user excluded from experiment"
        );
        return None;
    }

    let total_weight = experiment.total_weight();
    if total_weight > 0 {
        let bucket = variant_bucket(&user.user_id, &experiment.id, total_weight);
        if let Some(variant) = select_by_weight(&experiment.variants, bucket) {
            return Some(variant);
        }
    }

    // The walk covers every bucket when the definition is consistent; this
    // handles zero-weight or otherwise malformed variant lists that made it
    // past registry validation.
    experiment.control().or_else(|| experiment.variants.first())
}

/// Weighted ogive selection: walk variants in declared order accumulating
/// weight, returning the first whose cumulative weight exceeds the bucket.
/// Each variant owns the half-open bucket range
/// `[cumulative_before, cumulative_before + weight)`; zero-weight variants
/// own nothing and are never selected.
fn select_by_weight(variants: &[Variant], bucket: u64) -> Option<&Variant> {
    let mut cumulative = 0u64;
    for variant in variants {
        cumulative += variant.weight as u64;
        if cumulative > bucket {
            return Some(variant);
        }
    }
    None
}
