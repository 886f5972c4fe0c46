//! Sinks that feed the event store. `EventLogger` batches through a
//! channel so tracking never blocks the caller; `StoreSink` writes
//! straight through for tests and single-threaded embedding.

use shopsplit_core::config::AnalyticsConfig;
use shopsplit_core::sink::AnalyticsSink;
use shopsplit_core::types::AnalyticsEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::store::EventStore;

/// Non-blocking analytics sink with a background batch writer. Delivery is
/// eventually durable: a full channel drops the event rather than blocking
/// or failing the caller.
pub struct EventLogger {
    sender: mpsc::Sender<AnalyticsEvent>,
}

impl EventLogger {
    /// Create the logger and spawn its background writer. Must be called
    /// from within a tokio runtime.
    pub fn new(store: Arc<EventStore>, config: &AnalyticsConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<AnalyticsEvent>(config.channel_capacity);

        let writer = BatchWriter { store };
        let batch_size = config.batch_size;
        let flush_interval = std::time::Duration::from_millis(config.flush_interval_ms);

        tokio::spawn(async move {
            writer.run(receiver, batch_size, flush_interval).await;
        });

        Self { sender }
    }
}

impl AnalyticsSink for EventLogger {
    fn track(&self, event: AnalyticsEvent) {
        if let Err(e) = self.sender.try_send(event) {
            metrics::counter!("analytics.dropped").increment(1);
            warn!("analytics event dropped: {}", e);
        } else {
            metrics::counter!("analytics.queued").increment(1);
        }
    }
}

/// Background writer that batches events and flushes them into the store.
struct BatchWriter {
    store: Arc<EventStore>,
}

impl BatchWriter {
    async fn run(
        self,
        mut receiver: mpsc::Receiver<AnalyticsEvent>,
        batch_size: usize,
        flush_interval: std::time::Duration,
    ) {
        let mut buffer: Vec<AnalyticsEvent> = Vec::with_capacity(batch_size);
        let mut interval = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                received = receiver.recv() => {
                    match received {
                        Some(event) => {
                            buffer.push(event);
                            if buffer.len() >= batch_size {
                                self.flush(&mut buffer);
                            }
                        }
                        // All senders dropped: final flush, then stop
                        None => {
                            self.flush(&mut buffer);
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer);
                    }
                }
            }
        }
    }

    fn flush(&self, buffer: &mut Vec<AnalyticsEvent>) {
        let count = buffer.len();
        for event in buffer.drain(..) {
            if let Err(e) = self.store.insert(event) {
                metrics::counter!("analytics.flush_errors").increment(1);
                warn!(error = %e, "event rejected by store");
            }
        }
        if count > 0 {
            metrics::counter!("analytics.flushed").increment(count as u64);
            debug!(count = count, "analytics batch flushed");
        }
    }
}

/// Synchronous sink writing directly into the store.
pub struct StoreSink {
    store: Arc<EventStore>,
}

impl StoreSink {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }
}

impl AnalyticsSink for StoreSink {
    fn track(&self, event: AnalyticsEvent) {
        if let Err(e) = self.store.insert(event) {
            warn!(error = %e, "event rejected by store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopsplit_core::sink::make_event;
    use shopsplit_core::types::EventType;
    use uuid::Uuid;

    fn config(batch_size: usize, flush_interval_ms: u64) -> AnalyticsConfig {
        AnalyticsConfig {
            channel_capacity: 64,
            batch_size,
            flush_interval_ms,
        }
    }

    #[test]
    fn test_store_sink_writes_through() {
        let store = Arc::new(EventStore::new());
        let sink = StoreSink::new(store.clone());

        sink.track(make_event(EventType::PageView, Some("u-1".into()), Uuid::new_v4()));
        assert_eq!(store.len(), 1);

        // Duplicate id is swallowed, not propagated
        let e = make_event(EventType::PageView, Some("u-1".into()), Uuid::new_v4());
        sink.track(e.clone());
        sink.track(e);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_logger_flushes_on_batch_size() {
        let store = Arc::new(EventStore::new());
        // Long interval so only the size threshold can trigger the flush
        let logger = EventLogger::new(store.clone(), &config(2, 60_000));

        logger.track(make_event(EventType::PageView, Some("u-1".into()), Uuid::new_v4()));
        logger.track(make_event(EventType::AddToCart, Some("u-1".into()), Uuid::new_v4()));

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_logger_flushes_on_interval() {
        let store = Arc::new(EventStore::new());
        let logger = EventLogger::new(store.clone(), &config(1000, 50));

        logger.track(make_event(EventType::Purchase, Some("u-1".into()), Uuid::new_v4()));

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_logger_flushes_on_shutdown() {
        let store = Arc::new(EventStore::new());
        let logger = EventLogger::new(store.clone(), &config(1000, 60_000));

        logger.track(make_event(EventType::Purchase, Some("u-1".into()), Uuid::new_v4()));
        drop(logger);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(store.len(), 1);
    }
}
