//! Integration tests for the full assignment and tracking flow: registry,
//! service, sticky storage, event collection, and reporting.

use chrono::Utc;
use serde_json::json;
use shopsplit_analytics::{EventStore, StoreSink};
use shopsplit_core::sink::capture_sink;
use shopsplit_core::AppConfig;
use shopsplit_core::types::{
    EventType, Experiment, TargetingOperator, TargetingRule, UserContext, Variant,
};
use shopsplit_engine::ExperimentRegistry;
use shopsplit_reporting::{experiment_funnel, experiment_summary};
use shopsplit_sdk::ExperimentService;
use shopsplit_storage::{AssignmentStore, MemoryStorage};
use std::collections::HashMap;
use std::sync::Arc;

fn variant(id: &str, weight: u32, is_control: bool) -> Variant {
    Variant {
        id: id.into(),
        name: id.into(),
        weight,
        is_control,
        config: HashMap::new(),
    }
}

fn sample_experiment(id: &str, traffic_allocation: u8, weights: &[(&str, u32)]) -> Experiment {
    Experiment {
        id: id.into(),
        name: format!("Experiment {id}"),
        description: "integration fixture".into(),
        is_active: true,
        start_date: Utc::now() - chrono::Duration::days(1),
        end_date: None,
        traffic_allocation,
        variants: weights
            .iter()
            .enumerate()
            .map(|(i, (vid, w))| variant(vid, *w, i == 0))
            .collect(),
        targeting_rules: vec![],
    }
}

fn registry_with(experiments: Vec<Experiment>) -> Arc<ExperimentRegistry> {
    let registry = Arc::new(ExperimentRegistry::new());
    registry.load(experiments).unwrap();
    registry
}

// Scenario 1: full allocation, 50/50 split, repeated calls agree.
#[test]
fn test_full_allocation_is_deterministic() {
    let registry = registry_with(vec![sample_experiment(
        "exp-1",
        100,
        &[("control", 50), ("treatment", 50)],
    )]);
    let service = ExperimentService::new(registry);
    service.set_user(UserContext::anonymous("u1"));

    let first = service.get_variant("exp-1").unwrap();
    for _ in 0..50 {
        assert_eq!(service.get_variant("exp-1").unwrap().id, first.id);
    }
}

// Scenario 2: zero allocation excludes every user.
#[test]
fn test_zero_allocation_excludes_all() {
    let registry = registry_with(vec![sample_experiment(
        "exp-1",
        0,
        &[("control", 50), ("treatment", 50)],
    )]);
    let service = ExperimentService::new(registry);

    for i in 0..100 {
        service.set_user(UserContext::anonymous(format!("user-{i}")));
        assert!(service.get_variant("exp-1").is_none());
    }
}

// Scenario 3: a failing targeting rule excludes regardless of traffic.
#[test]
fn test_targeting_rule_excludes_despite_full_traffic() {
    let mut exp = sample_experiment("exp-1", 100, &[("control", 50), ("treatment", 50)]);
    exp.targeting_rules = vec![TargetingRule {
        property: "country".into(),
        operator: TargetingOperator::Equals,
        value: json!("DE"),
    }];
    let registry = registry_with(vec![exp]);
    let service = ExperimentService::new(registry);

    let mut user = UserContext::anonymous("u1");
    user.attributes.insert("country".into(), json!("FR"));
    service.set_user(user);
    for _ in 0..10 {
        assert!(service.get_variant("exp-1").is_none());
    }

    let mut eligible = UserContext::anonymous("u1");
    eligible.attributes.insert("country".into(), json!("DE"));
    service.set_user(eligible);
    assert!(service.get_variant("exp-1").is_some());
}

// Scenario 4: 33/33/34 weights hold across 10k synthetic users within 2%.
#[test]
fn test_three_way_split_converges() {
    let registry = registry_with(vec![sample_experiment(
        "exp-1",
        100,
        &[("a", 33), ("b", 33), ("c", 34)],
    )]);
    let service = ExperimentService::new(registry);

    let total = 10_000;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for i in 0..total {
        service.set_user(UserContext::anonymous(format!("synthetic-{i}")));
        let v = service.get_variant("exp-1").unwrap();
        *counts.entry(v.id).or_default() += 1;
    }

    for (id, expected) in [("a", 0.33), ("b", 0.33), ("c", 0.34)] {
        let observed = counts[id] as f64 / total as f64;
        assert!(
            (observed - expected).abs() < 0.02,
            "variant {id}: expected ~{expected}, observed {observed}"
        );
    }
}

// Scenario 5: a conversion tracked before any assignment is dropped.
#[test]
fn test_conversion_before_assignment_records_nothing() {
    let registry = registry_with(vec![sample_experiment(
        "exp-1",
        0,
        &[("control", 50), ("treatment", 50)],
    )]);
    let store = Arc::new(EventStore::new());
    let service = ExperimentService::new(registry)
        .with_sink(Arc::new(StoreSink::new(store.clone())));

    service.set_user(UserContext::anonymous("u1"));
    service.track_conversion("exp-1", Some(49.99), Some("purchase"));

    assert!(store.events_by_type(EventType::ExperimentConverted).is_empty());
    assert!(store.is_empty());
}

// Sticky invariant: a registry weight change never moves an assigned user.
#[test]
fn test_assignment_survives_weight_mutation() {
    let registry = registry_with(vec![sample_experiment(
        "exp-1",
        100,
        &[("control", 50), ("treatment", 50)],
    )]);
    let service = ExperimentService::new(registry.clone());
    service.set_user(UserContext::anonymous("u1"));
    let original = service.get_variant("exp-1").unwrap();

    // Flip all traffic toward the other variant
    let rigged = sample_experiment(
        "exp-1",
        100,
        if original.id == "control" {
            &[("control", 1), ("treatment", 999)]
        } else {
            &[("control", 999), ("treatment", 1)]
        },
    );
    registry.upsert(rigged).unwrap();

    for _ in 0..20 {
        assert_eq!(service.get_variant("exp-1").unwrap().id, original.id);
    }
}

// Sticky records survive a service restart over the same storage.
#[test]
fn test_assignment_survives_restart() {
    let config = AppConfig::default();
    let provider = Arc::new(MemoryStorage::new());
    let registry = registry_with(vec![sample_experiment(
        "exp-1",
        100,
        &[("control", 50), ("treatment", 50)],
    )]);

    let original = {
        let service = ExperimentService::new(registry.clone()).with_assignments(
            AssignmentStore::new(provider.clone())
                .with_key_prefix(config.storage.key_prefix.clone()),
        );
        service.set_user(UserContext::anonymous("u1"));
        service.get_variant("exp-1").unwrap()
    };

    let sink = capture_sink();
    let service = ExperimentService::new(registry)
        .with_assignments(
            AssignmentStore::new(provider).with_key_prefix(config.storage.key_prefix.clone()),
        )
        .with_sink(sink.clone());
    service.set_user(UserContext::anonymous("u1"));

    assert_eq!(service.get_variant("exp-1").unwrap().id, original.id);
    // Re-loading a persisted assignment is not a new assignment
    assert_eq!(sink.count_type(EventType::ExperimentAssigned), 0);
}

// Full pipeline: assignments and conversions flow into the store and come
// back out of the reporting layer with the right shape.
#[test]
fn test_assignment_to_report_pipeline() {
    let registry = registry_with(vec![sample_experiment(
        "checkout-flow-test",
        100,
        &[("control", 50), ("one-page", 50)],
    )]);
    let store = Arc::new(EventStore::new());
    let service = ExperimentService::new(registry)
        .with_sink(Arc::new(StoreSink::new(store.clone())));

    let mut assignments = Vec::new();
    for i in 0..200 {
        let user_id = format!("shopper-{i}");
        service.set_user(UserContext::anonymous(user_id.clone()));
        let variant = service.get_variant("checkout-flow-test").unwrap();

        service.track(EventType::PageView, HashMap::new());
        // Shoppers on the one-page flow convert far more often
        let converts = if variant.id == "one-page" { i % 3 == 0 } else { i % 10 == 0 };
        if converts {
            service.track(EventType::AddToCart, HashMap::new());
            service.track(EventType::Purchase, HashMap::new());
            service.track_conversion("checkout-flow-test", Some(25.0), Some("purchase"));
        }
        assignments.extend(service.get_active_assignments());
    }

    let summary = experiment_summary(&assignments, &store, "checkout-flow-test", None);
    assert_eq!(summary.total_users, 200);
    assert_eq!(summary.control_variant_id.as_deref(), Some("control"));
    assert_eq!(summary.variants.len(), 2);
    for v in &summary.variants {
        assert!(v.assigned_users > 0);
        assert!(v.converted_users > 0);
        assert!(v.total_revenue > 0.0);
        assert_eq!(v.conversions, v.converted_users);
    }
    let one_page = summary.variants.iter().find(|v| v.variant_id == "one-page").unwrap();
    assert!(one_page.lift_vs_control.unwrap() > 0.0);

    let funnels = experiment_funnel(&store, "checkout-flow-test", &shopsplit_reporting::funnel::default_steps());
    assert_eq!(funnels.len(), 2);
    for funnel in &funnels {
        let page_views = &funnel.steps[0];
        assert_eq!(page_views.event_type, EventType::PageView);
        assert!(page_views.unique_users > 0);
        // Nobody purchases without carting first in this scenario
        let purchases = funnel.steps.last().unwrap();
        assert!(purchases.unique_users <= page_views.unique_users);
    }
}
