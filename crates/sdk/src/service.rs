//! Experiment service orchestration.
//!
//! Per (user, experiment) the service walks a tiny state machine:
//! unevaluated, then either excluded or assigned, both terminal. An
//! assignment is sticky from the moment it is persisted; exclusion leaves
//! no record and is re-derived deterministically on every call. Re-entry
//! happens only through an identity switch.
//!
//! Nothing here ever panics or propagates storage failures to the caller:
//! a broken backend degrades to in-memory behavior and a log line.

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use shopsplit_core::sink::{make_event, noop_sink, AnalyticsSink};
use shopsplit_core::types::{
    EventType, Experiment, ExperimentRef, UserAssignment, UserContext, Variant,
};
use shopsplit_engine::{assign, ExperimentRegistry};
use shopsplit_storage::{AssignmentStore, MemoryStorage, StorageProvider};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ExperimentService {
    registry: Arc<ExperimentRegistry>,
    assignments: Arc<AssignmentStore>,
    sink: Arc<dyn AnalyticsSink>,
    current: RwLock<Option<UserContext>>,
    session_id: Uuid,
}

impl ExperimentService {
    /// Service over in-memory storage and a no-op sink. Use the `with_*`
    /// builders to attach real providers.
    pub fn new(registry: Arc<ExperimentRegistry>) -> Self {
        Self {
            registry,
            assignments: Arc::new(AssignmentStore::new(Arc::new(MemoryStorage::new()))),
            sink: noop_sink(),
            current: RwLock::new(None),
            session_id: Uuid::new_v4(),
        }
    }

    /// Persist sticky assignments through the given provider.
    pub fn with_storage(mut self, provider: Arc<dyn StorageProvider>) -> Self {
        self.assignments = Arc::new(AssignmentStore::new(provider));
        self
    }

    /// Use a pre-built assignment store (custom provider and key prefix).
    pub fn with_assignments(mut self, assignments: AssignmentStore) -> Self {
        self.assignments = Arc::new(assignments);
        self
    }

    /// Attach an analytics sink for assignment/conversion/storefront events.
    pub fn with_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the current subject and re-evaluate every active experiment
    /// for the new identity before returning. Assignments of the previous
    /// identity stay persisted but become unreachable until it returns.
    /// Holding the write lock for the whole switch means no `get_variant`
    /// for the old or new user can interleave with the recompute.
    pub fn set_user(&self, user: UserContext) {
        let mut current = self.current.write();
        info!(user_id = %user.user_id, "switching active user");

        // Drop any stale in-memory view, then recompute from storage.
        self.assignments.forget_user(&user.user_id);
        let now = Utc::now();
        for experiment in self.registry.active_at(now) {
            self.evaluate(&user, &experiment);
        }
        *current = Some(user);
    }

    /// The sticky variant for the current user in an experiment, assigning
    /// one on first evaluation. `None` when no user is set, the experiment
    /// is unknown or not running, or the user is excluded.
    pub fn get_variant(&self, experiment_id: &str) -> Option<Variant> {
        let current = self.current.read();
        let Some(user) = current.as_ref() else {
            debug!(experiment_id = experiment_id, "get_variant with no active user");
            return None;
        };
        let Some(experiment) = self.registry.get(experiment_id) else {
            debug!(experiment_id = experiment_id, "unknown experiment");
            return None;
        };
        if !experiment.is_running_at(Utc::now()) {
            debug!(experiment_id = experiment_id, "experiment not running");
            return None;
        }
        self.evaluate(user, &experiment)
    }

    /// Record a conversion against the current user's assignment. A
    /// conversion without a user or without an assignment is dropped with
    /// a log line; it never creates or mutates an assignment.
    pub fn track_conversion(
        &self,
        experiment_id: &str,
        value: Option<f64>,
        conversion_type: Option<&str>,
    ) {
        let current = self.current.read();
        let Some(user) = current.as_ref() else {
            debug!(experiment_id = experiment_id, "conversion with no active user ignored");
            return;
        };
        let Some(assignment) = self.assignments.get(&user.user_id, experiment_id) else {
            debug!(
                user_id = %user.user_id,
                experiment_id = experiment_id,
                "conversion without assignment ignored"
            );
            return;
        };

        let mut event = make_event(
            EventType::ExperimentConverted,
            Some(user.user_id.clone()),
            self.session_id,
        );
        event
            .properties
            .insert("experiment_id".into(), json!(experiment_id));
        event
            .properties
            .insert("variant_id".into(), json!(assignment.variant_id));
        event.properties.insert(
            "conversion_type".into(),
            json!(conversion_type.unwrap_or("conversion")),
        );
        if let Some(value) = value {
            event.properties.insert("conversion_value".into(), json!(value));
        }
        // Subject experiment first: experiment-scoped queries match on the
        // leading snapshot entry.
        let mut snapshot = vec![ExperimentRef {
            experiment_id: experiment_id.to_string(),
            variant_id: assignment.variant_id.clone(),
        }];
        snapshot.extend(
            self.active_assignments_for(user)
                .into_iter()
                .filter(|a| a.experiment_id != experiment_id)
                .map(|a| ExperimentRef {
                    experiment_id: a.experiment_id,
                    variant_id: a.variant_id,
                }),
        );
        event.experiment_assignments = snapshot;

        self.sink.track(event);
    }

    /// Record a storefront event (page view, add to cart, ...) stamped
    /// with the current active-assignment snapshot so it stays
    /// attributable to experiments after the fact.
    pub fn track(&self, event_type: EventType, properties: HashMap<String, serde_json::Value>) {
        let current = self.current.read();
        let user_id = current.as_ref().map(|u| u.user_id.clone());
        let mut event = make_event(event_type, user_id, self.session_id);
        event.properties = properties;
        if let Some(user) = current.as_ref() {
            event.experiment_assignments = self
                .active_assignments_for(user)
                .into_iter()
                .map(|a| ExperimentRef {
                    experiment_id: a.experiment_id,
                    variant_id: a.variant_id,
                })
                .collect();
        }
        self.sink.track(event);
    }

    /// The current user's assignments for experiments that are running now.
    pub fn get_active_assignments(&self) -> Vec<UserAssignment> {
        let current = self.current.read();
        current
            .as_ref()
            .map(|user| self.active_assignments_for(user))
            .unwrap_or_default()
    }

    pub fn current_user(&self) -> Option<UserContext> {
        self.current.read().clone()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Run the sticky-or-assign step for one experiment. Emits the
    /// `experiment_assigned` event exactly once, when the record is first
    /// created; an exclusion writes nothing and emits nothing.
    fn evaluate(&self, user: &UserContext, experiment: &Experiment) -> Option<Variant> {
        let created = Cell::new(false);
        let record = self
            .assignments
            .get_or_insert_with(&user.user_id, &experiment.id, || {
                let variant = assign(user, experiment)?;
                created.set(true);
                Some(variant.id.clone())
            })?;

        let Some(variant) = experiment.variant(&record.variant_id) else {
            // Sticky record survived a definition change that removed its
            // variant; absence routes the caller to the default UI path.
            warn!(
                user_id = %user.user_id,
                experiment_id = %experiment.id,
                variant_id = %record.variant_id,
                "sticky assignment references a variant no longer defined"
            );
            return None;
        };

        if created.get() {
            debug!(
                user_id = %user.user_id,
                experiment_id = %experiment.id,
                variant_id = %variant.id,
                "user assigned to variant"
            );
            let mut event = make_event(
                EventType::ExperimentAssigned,
                Some(user.user_id.clone()),
                self.session_id,
            );
            event
                .properties
                .insert("experiment_id".into(), json!(experiment.id));
            event
                .properties
                .insert("variant_id".into(), json!(variant.id));
            event
                .properties
                .insert("is_control".into(), json!(variant.is_control));
            event.experiment_assignments = vec![ExperimentRef {
                experiment_id: experiment.id.clone(),
                variant_id: variant.id.clone(),
            }];
            self.sink.track(event);
        }

        Some(variant.clone())
    }

    fn active_assignments_for(&self, user: &UserContext) -> Vec<UserAssignment> {
        let now = Utc::now();
        self.assignments
            .all_for_user(&user.user_id)
            .into_iter()
            .filter(|a| {
                self.registry
                    .get(&a.experiment_id)
                    .map_or(false, |e| e.is_running_at(now))
            })
            .collect()
    }
}
