//! Sticky assignment store. Holds at most one record per (user, experiment)
//! pair, persisted through a [`StorageProvider`] as a JSON array under a
//! key derived from the user id, with a write-through in-memory view.
//!
//! Storage failures never reach the caller: reads fall back to the
//! in-memory view and writes degrade to in-memory-only for that call.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use shopsplit_core::types::UserAssignment;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::provider::StorageProvider;

pub struct AssignmentStore {
    provider: Arc<dyn StorageProvider>,
    key_prefix: String,
    /// Per-user record lists, also the fallback when the provider fails.
    cache: DashMap<String, Vec<UserAssignment>>,
    /// Per-(user, experiment) locks making check -> compute -> persist atomic.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AssignmentStore {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self {
            provider,
            key_prefix: "shopsplit:assignments:".to_string(),
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Override the storage key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The assignment for one (user, experiment) pair, if any.
    pub fn get(&self, user_id: &str, experiment_id: &str) -> Option<UserAssignment> {
        self.records_for(user_id)
            .into_iter()
            .find(|a| a.experiment_id == experiment_id)
    }

    /// All assignments held for a user.
    pub fn all_for_user(&self, user_id: &str) -> Vec<UserAssignment> {
        self.records_for(user_id)
    }

    /// Return the existing assignment for the pair, or run `compute` and
    /// persist its result as a new sticky record. The whole sequence runs
    /// under a per-pair lock: two concurrent callers can never both observe
    /// "no assignment" and persist different decisions. A `None` from
    /// `compute` writes nothing.
    pub fn get_or_insert_with<F>(
        &self,
        user_id: &str,
        experiment_id: &str,
        compute: F,
    ) -> Option<UserAssignment>
    where
        F: FnOnce() -> Option<String>,
    {
        let lock = self
            .locks
            .entry(pair_key(user_id, experiment_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        if let Some(existing) = self.get(user_id, experiment_id) {
            metrics::counter!("assignments.sticky_hit").increment(1);
            return Some(existing);
        }

        let variant_id = compute()?;
        let assignment = UserAssignment {
            user_id: user_id.to_string(),
            experiment_id: experiment_id.to_string(),
            variant_id,
            assigned_at: Utc::now(),
            sticky: true,
        };
        metrics::counter!("assignments.created").increment(1);

        let records = {
            let mut entry = self.cache.entry(user_id.to_string()).or_default();
            entry.push(assignment.clone());
            entry.clone()
        };
        self.persist(user_id, &records);

        Some(assignment)
    }

    /// Drop the in-memory view for a user. The persisted record survives
    /// and is reloaded when that identity returns.
    pub fn forget_user(&self, user_id: &str) {
        self.cache.remove(user_id);
    }

    /// Number of users with an in-memory view.
    pub fn cached_users(&self) -> usize {
        self.cache.len()
    }

    fn records_for(&self, user_id: &str) -> Vec<UserAssignment> {
        if let Some(records) = self.cache.get(user_id) {
            return records.clone();
        }
        let records = self.load(user_id);
        self.cache.insert(user_id.to_string(), records.clone());
        records
    }

    fn load(&self, user_id: &str) -> Vec<UserAssignment> {
        match self.provider.get(&self.storage_key(user_id)) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(records) => records,
                Err(e) => {
                    metrics::counter!("assignments.decode_errors").increment(1);
                    warn!(user_id = user_id, error = %e, "discarding undecodable assignment record");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                metrics::counter!("assignments.load_errors").increment(1);
                warn!(user_id = user_id, error = %e, "assignment load failed, starting empty");
                Vec::new()
            }
        }
    }

    fn persist(&self, user_id: &str, records: &[UserAssignment]) {
        let json = match serde_json::to_string(records) {
            Ok(json) => json,
            Err(e) => {
                warn!(user_id = user_id, error = %e, "assignment record serialization failed");
                return;
            }
        };
        if let Err(e) = self.provider.set(&self.storage_key(user_id), &json) {
            metrics::counter!("assignments.persist_errors").increment(1);
            warn!(
                user_id = user_id,
                error = %e,
                "assignment persistence failed, record held in memory only"
            );
        } else {
            debug!(user_id = user_id, count = records.len(), "assignments persisted");
        }
    }

    fn storage_key(&self, user_id: &str) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }
}

fn pair_key(user_id: &str, experiment_id: &str) -> String {
    format!("{user_id}\u{1f}{experiment_id}")
}
