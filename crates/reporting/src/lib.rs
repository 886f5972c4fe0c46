//! Reporting over collected experiment data: per-variant funnel
//! progression and per-experiment conversion summaries.

pub mod funnel;
pub mod summary;

pub use funnel::{experiment_funnel, FunnelStepResult, VariantFunnel};
pub use summary::{experiment_summary, ExperimentSummary, VariantSummary};
