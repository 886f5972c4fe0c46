//! Funnel analysis: how users of each variant progress through a
//! multi-step conversion path, computed from experiment-scoped events.

use serde::Serialize;
use shopsplit_analytics::EventStore;
use shopsplit_core::types::EventType;
use std::collections::{BTreeMap, HashSet};

/// The storefront conversion path used when the caller doesn't supply one.
pub fn default_steps() -> Vec<EventType> {
    vec![
        EventType::PageView,
        EventType::AddToCart,
        EventType::CheckoutStart,
        EventType::Purchase,
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantFunnel {
    pub variant_id: String,
    pub steps: Vec<FunnelStepResult>,
    /// Last-step unique users over first-step unique users.
    pub overall_conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelStepResult {
    pub event_type: EventType,
    pub unique_users: u64,
    pub total_events: u64,
    /// Fraction of the previous step's users reaching this step; 1.0 for
    /// the first step.
    pub conversion_rate: f64,
}

/// Per-variant funnel counts for one experiment. Events are attributed to
/// a variant through the first entry of their assignment snapshot; events
/// without a snapshot never reach this computation. Variants are returned
/// in id order.
pub fn experiment_funnel(
    store: &EventStore,
    experiment_id: &str,
    steps: &[EventType],
) -> Vec<VariantFunnel> {
    let events = store.events_for_experiment(experiment_id);

    // variant -> (step -> (users, total))
    let mut grouped: BTreeMap<String, BTreeMap<usize, (HashSet<String>, u64)>> = BTreeMap::new();
    for event in &events {
        let Some(step) = steps.iter().position(|s| *s == event.event_type) else {
            continue;
        };
        let Some(snapshot) = event.experiment_assignments.first() else {
            continue;
        };
        let (users, total) = grouped
            .entry(snapshot.variant_id.clone())
            .or_default()
            .entry(step)
            .or_default();
        if let Some(user_id) = &event.user_id {
            users.insert(user_id.clone());
        }
        *total += 1;
    }

    grouped
        .into_iter()
        .map(|(variant_id, by_step)| {
            let mut results = Vec::with_capacity(steps.len());
            let mut previous_users: Option<u64> = None;
            for (index, event_type) in steps.iter().enumerate() {
                let (unique_users, total_events) = by_step
                    .get(&index)
                    .map(|(users, total)| (users.len() as u64, *total))
                    .unwrap_or((0, 0));
                let conversion_rate = match previous_users {
                    Some(prev) if prev > 0 => unique_users as f64 / prev as f64,
                    Some(_) => 0.0,
                    None => 1.0,
                };
                results.push(FunnelStepResult {
                    event_type: *event_type,
                    unique_users,
                    total_events,
                    conversion_rate,
                });
                previous_users = Some(unique_users);
            }

            let overall_conversion_rate = match (results.first(), results.last()) {
                (Some(first), Some(last)) if first.unique_users > 0 => {
                    last.unique_users as f64 / first.unique_users as f64
                }
                _ => 0.0,
            };

            VariantFunnel {
                variant_id,
                steps: results,
                overall_conversion_rate,
            }
        })
        .collect()
}
