//! Append-only analytics event log with indexed retrieval. Rows are
//! immutable after insert and keyed by a globally unique event id.
//! Timestamps, not insertion order, are authoritative for ordering:
//! cross-writer interleaving is not guaranteed beyond that.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shopsplit_core::error::{SplitError, SplitResult};
use shopsplit_core::types::{AnalyticsEvent, EventType};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    events: Vec<AnalyticsEvent>,
    ids: HashSet<Uuid>,
    by_user: HashMap<String, Vec<usize>>,
}

/// Thread-safe in-memory event log.
#[derive(Default)]
pub struct EventStore {
    inner: RwLock<Inner>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Append an event. Rejects a reused event id; nothing is ever updated
    /// or deleted.
    pub fn insert(&self, event: AnalyticsEvent) -> SplitResult<()> {
        let mut inner = self.inner.write();
        if !inner.ids.insert(event.event_id) {
            return Err(SplitError::Validation(format!(
                "duplicate event id {}",
                event.event_id
            )));
        }
        let index = inner.events.len();
        if let Some(user_id) = &event.user_id {
            inner
                .by_user
                .entry(user_id.clone())
                .or_default()
                .push(index);
        }
        inner.events.push(event);
        metrics::counter!("events.inserted").increment(1);
        Ok(())
    }

    /// A user's events, most recent first, bounded by `limit`.
    pub fn events_for_user(&self, user_id: &str, limit: usize) -> Vec<AnalyticsEvent> {
        let inner = self.inner.read();
        let mut events: Vec<AnalyticsEvent> = inner
            .by_user
            .get(user_id)
            .map(|indices| indices.iter().map(|&i| inner.events[i].clone()).collect())
            .unwrap_or_default();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        events
    }

    /// All events of one type, in insertion order.
    pub fn events_by_type(&self, event_type: EventType) -> Vec<AnalyticsEvent> {
        self.inner
            .read()
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Events with `from <= timestamp < to`, ascending by timestamp.
    pub fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<AnalyticsEvent> {
        let mut events: Vec<AnalyticsEvent> = self
            .inner
            .read()
            .events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp < to)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        events
    }

    /// Events attributable to an experiment, matched via the first entry of
    /// the embedded assignment snapshot. Events recorded under several
    /// concurrent experiments only surface here for the first one in their
    /// snapshot; events without a snapshot are excluded without error.
    pub fn events_for_experiment(&self, experiment_id: &str) -> Vec<AnalyticsEvent> {
        self.inner
            .read()
            .events
            .iter()
            .filter(|e| {
                e.experiment_assignments
                    .first()
                    .map_or(false, |a| a.experiment_id == experiment_id)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }
}
