//! Analytics collection: an append-only event store with indexed queries,
//! plus sinks that feed it synchronously or through a batching channel.

pub mod logger;
pub mod store;

pub use logger::{EventLogger, StoreSink};
pub use store::EventStore;
