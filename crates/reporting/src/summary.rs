//! Per-experiment conversion summary: assignment records joined to
//! conversion events, aggregated per variant. Statistical inference
//! (significance tests, confidence intervals) is deliberately out of
//! scope; the summary reports observed rates and relative lift only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shopsplit_analytics::EventStore;
use shopsplit_core::types::{EventType, UserAssignment};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    pub experiment_id: String,
    pub control_variant_id: Option<String>,
    pub variants: Vec<VariantSummary>,
    pub total_users: u64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantSummary {
    pub variant_id: String,
    /// Distinct users holding an assignment record for this variant.
    pub assigned_users: u64,
    /// Distinct assigned users with at least one conversion.
    pub converted_users: u64,
    /// Total conversion events, repeat conversions included.
    pub conversions: u64,
    pub conversion_rate: f64,
    pub total_revenue: f64,
    pub revenue_per_user: f64,
    /// Relative lift of this variant's conversion rate over the control's.
    /// `None` for the control itself, or when no control rate is available.
    pub lift_vs_control: Option<f64>,
}

/// Summarize one experiment. `assignments` carries the sticky records
/// (typically the per-user JSON export the engine persists); conversion
/// events are read from the store and joined to assignments by user id, so
/// a conversion from a user without a record is ignored. The control
/// defaults to the variant literally named `"control"` when present.
pub fn experiment_summary(
    assignments: &[UserAssignment],
    store: &EventStore,
    experiment_id: &str,
    control_variant_id: Option<&str>,
) -> ExperimentSummary {
    // user -> variant, deduplicated; the store guarantees one record per
    // pair, but the export format doesn't, so first record wins.
    let mut variant_of: HashMap<&str, &str> = HashMap::new();
    for assignment in assignments {
        if assignment.experiment_id == experiment_id {
            variant_of
                .entry(assignment.user_id.as_str())
                .or_insert(assignment.variant_id.as_str());
        }
    }

    #[derive(Default)]
    struct Tally {
        assigned: HashSet<String>,
        converted: HashSet<String>,
        conversions: u64,
        revenue: f64,
    }

    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for (user_id, variant_id) in &variant_of {
        tallies
            .entry((*variant_id).to_string())
            .or_default()
            .assigned
            .insert((*user_id).to_string());
    }

    for event in store.events_for_experiment(experiment_id) {
        if event.event_type != EventType::ExperimentConverted {
            continue;
        }
        let Some(user_id) = &event.user_id else { continue };
        let Some(variant_id) = variant_of.get(user_id.as_str()) else {
            continue;
        };
        let tally = tallies.entry((*variant_id).to_string()).or_default();
        tally.converted.insert(user_id.clone());
        tally.conversions += 1;
        if let Some(value) = event.properties.get("conversion_value").and_then(|v| v.as_f64()) {
            tally.revenue += value;
        }
    }

    let control = control_variant_id
        .map(str::to_string)
        .or_else(|| tallies.contains_key("control").then(|| "control".to_string()));
    let control_rate = control.as_deref().and_then(|id| {
        let tally = tallies.get(id)?;
        let assigned = tally.assigned.len();
        (assigned > 0).then(|| tally.converted.len() as f64 / assigned as f64)
    });

    let variants = tallies
        .into_iter()
        .map(|(variant_id, tally)| {
            let assigned_users = tally.assigned.len() as u64;
            let converted_users = tally.converted.len() as u64;
            let conversion_rate = if assigned_users > 0 {
                converted_users as f64 / assigned_users as f64
            } else {
                0.0
            };
            let revenue_per_user = if assigned_users > 0 {
                tally.revenue / assigned_users as f64
            } else {
                0.0
            };
            let lift_vs_control = match (&control, control_rate) {
                (Some(control_id), Some(rate)) if *control_id != variant_id && rate > 0.0 => {
                    Some((conversion_rate - rate) / rate)
                }
                _ => None,
            };
            VariantSummary {
                variant_id,
                assigned_users,
                converted_users,
                conversions: tally.conversions,
                conversion_rate,
                total_revenue: tally.revenue,
                revenue_per_user,
                lift_vs_control,
            }
        })
        .collect::<Vec<_>>();

    let total_users = variant_of.len() as u64;
    ExperimentSummary {
        experiment_id: experiment_id.to_string(),
        control_variant_id: control,
        variants,
        total_users,
        computed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shopsplit_core::sink::make_event;
    use shopsplit_core::types::ExperimentRef;
    use uuid::Uuid;

    fn assignment(user_id: &str, variant_id: &str) -> UserAssignment {
        UserAssignment {
            user_id: user_id.into(),
            experiment_id: "exp-1".into(),
            variant_id: variant_id.into(),
            assigned_at: Utc::now(),
            sticky: true,
        }
    }

    fn conversion(user_id: &str, variant_id: &str, value: f64) -> shopsplit_core::types::AnalyticsEvent {
        let mut e = make_event(
            EventType::ExperimentConverted,
            Some(user_id.to_string()),
            Uuid::new_v4(),
        );
        e.experiment_assignments = vec![ExperimentRef {
            experiment_id: "exp-1".into(),
            variant_id: variant_id.into(),
        }];
        e.properties.insert("conversion_value".into(), json!(value));
        e
    }

    #[test]
    fn test_summary_rates_revenue_and_lift() {
        let assignments = vec![
            assignment("u1", "control"),
            assignment("u2", "control"),
            assignment("u3", "control"),
            assignment("u4", "control"),
            assignment("u5", "hero-video"),
            assignment("u6", "hero-video"),
        ];
        let store = EventStore::new();
        store.insert(conversion("u1", "control", 10.0)).unwrap();
        store.insert(conversion("u5", "hero-video", 20.0)).unwrap();
        store.insert(conversion("u6", "hero-video", 29.99)).unwrap();

        let summary = experiment_summary(&assignments, &store, "exp-1", None);
        assert_eq!(summary.control_variant_id.as_deref(), Some("control"));
        assert_eq!(summary.total_users, 6);
        assert_eq!(summary.variants.len(), 2);

        let control = &summary.variants[0];
        assert_eq!(control.variant_id, "control");
        assert_eq!(control.assigned_users, 4);
        assert_eq!(control.converted_users, 1);
        assert!((control.conversion_rate - 0.25).abs() < 1e-9);
        assert!(control.lift_vs_control.is_none());

        let treatment = &summary.variants[1];
        assert_eq!(treatment.assigned_users, 2);
        assert_eq!(treatment.converted_users, 2);
        assert!((treatment.total_revenue - 49.99).abs() < 1e-9);
        assert!((treatment.revenue_per_user - 24.995).abs() < 1e-9);
        // (1.0 - 0.25) / 0.25 = 3.0
        assert!((treatment.lift_vs_control.unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_repeat_conversions_count_once_per_user() {
        let assignments = vec![assignment("u1", "control"), assignment("u2", "control")];
        let store = EventStore::new();
        store.insert(conversion("u1", "control", 5.0)).unwrap();
        store.insert(conversion("u1", "control", 7.0)).unwrap();

        let summary = experiment_summary(&assignments, &store, "exp-1", None);
        let control = &summary.variants[0];
        assert_eq!(control.converted_users, 1);
        assert_eq!(control.conversions, 2);
        assert!((control.total_revenue - 12.0).abs() < 1e-9);
        assert!((control.conversion_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_conversion_without_assignment_is_ignored() {
        let assignments = vec![assignment("u1", "control")];
        let store = EventStore::new();
        store.insert(conversion("stranger", "control", 100.0)).unwrap();

        let summary = experiment_summary(&assignments, &store, "exp-1", None);
        let control = &summary.variants[0];
        assert_eq!(control.converted_users, 0);
        assert_eq!(control.total_revenue, 0.0);
    }

    #[test]
    fn test_explicit_control_override() {
        let assignments = vec![assignment("u1", "a"), assignment("u2", "b")];
        let store = EventStore::new();
        store.insert(conversion("u1", "a", 1.0)).unwrap();

        let summary = experiment_summary(&assignments, &store, "exp-1", Some("a"));
        assert_eq!(summary.control_variant_id.as_deref(), Some("a"));
        let b = summary.variants.iter().find(|v| v.variant_id == "b").unwrap();
        // control converts at 1.0, b at 0.0: lift is -1.0
        assert!((b.lift_vs_control.unwrap() + 1.0).abs() < 1e-9);
    }
}
