//! In-memory experiment catalog. Read-mostly and safely read-concurrent;
//! definitions are replaced by a single administrative writer, and every
//! definition is validated on the way in so evaluation never sees a
//! malformed experiment.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shopsplit_core::error::{SplitError, SplitResult};
use shopsplit_core::types::Experiment;
use std::collections::HashSet;
use tracing::info;

pub struct ExperimentRegistry {
    experiments: DashMap<String, Experiment>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self {
            experiments: DashMap::new(),
        }
    }

    /// Replace the catalog wholesale. All definitions are validated before
    /// any of them become visible; a single bad definition rejects the load.
    pub fn load(&self, experiments: Vec<Experiment>) -> SplitResult<()> {
        for experiment in &experiments {
            validate(experiment)?;
        }
        self.experiments.clear();
        let count = experiments.len();
        for experiment in experiments {
            self.experiments.insert(experiment.id.clone(), experiment);
        }
        info!(count = count, "experiment registry loaded");
        Ok(())
    }

    /// Insert or replace a single definition.
    pub fn upsert(&self, experiment: Experiment) -> SplitResult<()> {
        validate(&experiment)?;
        self.experiments.insert(experiment.id.clone(), experiment);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Option<Experiment> {
        self.experiments.remove(id).map(|(_, e)| e)
    }

    pub fn get(&self, id: &str) -> Option<Experiment> {
        self.experiments.get(id).map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<Experiment> {
        self.experiments.iter().map(|e| e.value().clone()).collect()
    }

    /// All experiments running at `now`.
    pub fn active_at(&self, now: DateTime<Utc>) -> Vec<Experiment> {
        self.experiments
            .iter()
            .filter(|e| e.value().is_running_at(now))
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

impl Default for ExperimentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Definition-level checks. Rejected here, at load time, so the evaluation
/// path never has to handle malformed experiments.
fn validate(experiment: &Experiment) -> SplitResult<()> {
    if experiment.id.trim().is_empty() {
        return Err(SplitError::Validation("experiment id is empty".into()));
    }
    if experiment.traffic_allocation > 100 {
        return Err(SplitError::Validation(format!(
            "experiment {}: traffic allocation {} exceeds 100",
            experiment.id, experiment.traffic_allocation
        )));
    }
    if experiment.variants.is_empty() {
        return Err(SplitError::Validation(format!(
            "experiment {}: has no variants",
            experiment.id
        )));
    }
    if experiment.total_weight() == 0 {
        return Err(SplitError::Validation(format!(
            "experiment {}: total variant weight is zero",
            experiment.id
        )));
    }
    let mut seen = HashSet::new();
    for variant in &experiment.variants {
        if !seen.insert(variant.id.as_str()) {
            return Err(SplitError::Validation(format!(
                "experiment {}: duplicate variant id {}",
                experiment.id, variant.id
            )));
        }
    }
    if experiment.variants.iter().filter(|v| v.is_control).count() > 1 {
        return Err(SplitError::Validation(format!(
            "experiment {}: more than one control variant",
            experiment.id
        )));
    }
    Ok(())
}
