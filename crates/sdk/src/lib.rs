//! The experiment service: the orchestrating surface consumed by the UI.
//! Owns the registry, the sticky assignment store, and the analytics sink,
//! and exposes variant lookup, conversion tracking, and identity switching.

pub mod service;

pub use service::ExperimentService;
