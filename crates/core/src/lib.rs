//! Core types shared across the ShopSplit experimentation engine:
//! experiment and variant definitions, assignment and analytics event
//! records, the error taxonomy, configuration, and the analytics sink trait.

pub mod config;
pub mod error;
pub mod sink;
pub mod types;

pub use config::AppConfig;
pub use error::{SplitError, SplitResult};
