//! Experiment definitions, assignment records, and analytics events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A controlled experiment with weighted variants and inclusion rules.
/// Definitions are created by an administrative process and are read-only
/// to the assignment engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    /// Percentage of the eligible population included, 0-100.
    pub traffic_allocation: u8,
    /// Treatment arms in declaration order. Order matters: the weighted
    /// walk and all tie-breaks follow it.
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub targeting_rules: Vec<TargetingRule>,
}

impl Experiment {
    /// Sum of all variant weights.
    pub fn total_weight(&self) -> u64 {
        self.variants.iter().map(|v| v.weight as u64).sum()
    }

    /// The declared control variant, if any.
    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control)
    }

    /// Look up a variant by id.
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Whether the experiment is live at `now`: the active flag is set and
    /// `now` falls inside the scheduled window.
    pub fn is_running_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_date <= now
            && self.end_date.map_or(true, |end| end > now)
    }
}

/// One treatment arm of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    /// Unique within the owning experiment.
    pub id: String,
    pub name: String,
    pub weight: u32,
    #[serde(default)]
    pub is_control: bool,
    /// Opaque configuration handed to the UI for rendering this arm.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

/// A predicate over user attributes restricting experiment eligibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingRule {
    /// Dotted path into the user's attribute map, e.g. `"geo.country"`.
    pub property: String,
    pub operator: TargetingOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetingOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
}

/// The subject of an evaluation: a stable identity plus an immutable
/// snapshot of targeting attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl UserContext {
    pub fn anonymous(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            attributes: HashMap::new(),
        }
    }
}

/// A sticky variant decision for one (user, experiment) pair. At most one
/// record exists per pair; once written with `sticky = true` it is never
/// mutated, only superseded by an explicit identity reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAssignment {
    pub user_id: String,
    pub experiment_id: String,
    pub variant_id: String,
    pub assigned_at: DateTime<Utc>,
    pub sticky: bool,
}

/// Experiment context stamped onto analytics events so any event can be
/// attributed to the assignments in force when it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRef {
    pub experiment_id: String,
    pub variant_id: String,
}

/// An analytics event. Append-only and immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub user_id: Option<String>,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Snapshot of the user's active assignments at emission time.
    #[serde(default)]
    pub experiment_assignments: Vec<ExperimentRef>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Storefront events
    PageView,
    ProductView,
    AddToCart,
    CheckoutStart,
    Purchase,
    SessionStart,
    SessionEnd,
    Custom,
    // Engine events
    ExperimentAssigned,
    ExperimentConverted,
}
