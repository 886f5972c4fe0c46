//! Analytics sink: trait for emitting analytics events from any module.
//!
//! Components accept an `Arc<dyn AnalyticsSink>` and stay agnostic of where
//! events end up (embedded event store, remote collector, or nowhere).

use crate::types::{AnalyticsEvent, EventType};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Trait for emitting analytics events. Implementations must never block
/// the caller for long and must never panic on delivery failure.
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: AnalyticsEvent);
}

/// No-op sink for tests and callers that don't need event emission.
pub struct NoOpSink;

impl AnalyticsSink for NoOpSink {
    fn track(&self, _event: AnalyticsEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().expect("sink mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("sink mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("sink mutex poisoned").clear();
    }
}

impl AnalyticsSink for CaptureSink {
    fn track(&self, event: AnalyticsEvent) {
        self.events.lock().expect("sink mutex poisoned").push(event);
    }
}

/// Convenience builder for creating an `AnalyticsEvent` with minimal
/// boilerplate. Properties and assignment snapshots are filled by the caller.
pub fn make_event(
    event_type: EventType,
    user_id: Option<String>,
    session_id: Uuid,
) -> AnalyticsEvent {
    AnalyticsEvent {
        event_id: Uuid::new_v4(),
        event_type,
        user_id,
        session_id,
        timestamp: Utc::now(),
        properties: HashMap::new(),
        experiment_assignments: Vec::new(),
    }
}

/// Convenience: create a no-op sink for callers that don't need one.
pub fn noop_sink() -> Arc<dyn AnalyticsSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
