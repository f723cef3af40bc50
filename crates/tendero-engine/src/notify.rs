//! # Notification Relay
//!
//! Delivers outbox events to a [`NotificationSink`].
//!
//! ## Delivery Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  sale / catalog / credit transaction                                   │
//! │      └─ INSERT notification_outbox   (commits with the change)        │
//! │                                                                         │
//! │  OutboxRelay (own task, own pace)                                      │
//! │   1. Poll: pending rows with attempts < max_attempts, oldest first     │
//! │   2. Deliver each through the sink                                     │
//! │   3. Ok  → dispatched_at = now                                         │
//! │      Err → attempts += 1, last_error = message                        │
//! │                                                                         │
//! │  A failing sink never touches the sale that produced the event.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Once an hour the relay purges dispatched rows after 7 days and rows that
//! ran out of attempts after 30.
//!
//! Delivery is at-least-once from the relay's side: a crash between the
//! sink accepting an event and `mark_dispatched` delivers it again.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use tendero_core::NotificationEvent;
use tendero_db::Database;

/// Dispatched rows older than this are purged by the relay.
const DISPATCHED_RETENTION_DAYS: i64 = 7;

/// Rows that exhausted their attempts are kept this long for inspection.
const FAILED_RETENTION_DAYS: i64 = 30;

/// How often the relay purges old rows.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

// =============================================================================
// Sinks
// =============================================================================

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The receiving side refused the event; retrying may not help.
    #[error("Notification rejected: {0}")]
    Rejected(String),

    /// The receiving side could not be reached.
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Where outbox events go: push service, chat bot, email, ...
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Writes every event to the log. The default sink.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        info!(
            event_id = %event.id,
            store_id = %event.store_id,
            event_type = event.event_type.as_str(),
            payload = %event.payload,
            "Notification"
        );
        Ok(())
    }
}

// =============================================================================
// Relay
// =============================================================================

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Drains the outbox into a sink.
pub struct OutboxRelay {
    db: Database,
    sink: Arc<dyn NotificationSink>,
    batch_size: u32,
    max_attempts: i64,
    poll_interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Stops a running [`OutboxRelay`].
#[derive(Debug, Clone)]
pub struct RelayHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl RelayHandle {
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::conflict("outbox relay already stopped"))
    }
}

impl Engine {
    /// Builds a relay over this engine's database, configured from
    /// [`EngineConfig`](crate::EngineConfig).
    pub fn outbox_relay(&self, sink: Arc<dyn NotificationSink>) -> (OutboxRelay, RelayHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let relay = OutboxRelay {
            db: self.db.clone(),
            sink,
            batch_size: self.config.outbox_batch_size,
            max_attempts: self.config.outbox_max_attempts,
            poll_interval: self.config.outbox_poll_interval(),
            shutdown_rx,
        };

        (relay, RelayHandle { shutdown_tx })
    }
}

impl OutboxRelay {
    /// Delivers one batch of pending events.
    pub async fn drain_once(&self) -> EngineResult<RelayReport> {
        let events = self
            .db
            .outbox()
            .get_pending(self.batch_size, self.max_attempts)
            .await?;

        if events.is_empty() {
            debug!("No pending notifications");
            return Ok(RelayReport::default());
        }

        let mut report = RelayReport::default();

        for event in &events {
            match self.sink.deliver(event).await {
                Ok(()) => {
                    self.db.outbox().mark_dispatched(&event.id).await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        event_type = event.event_type.as_str(),
                        attempts = event.attempts + 1,
                        error = %e,
                        "Notification delivery failed"
                    );
                    self.db.outbox().mark_failed(&event.id, &e.to_string()).await?;
                    report.failed += 1;
                }
            }
        }

        info!(delivered = report.delivered, failed = report.failed, "Outbox batch processed");

        Ok(report)
    }

    /// Deletes dispatched rows past their retention and rows that gave up
    /// delivery past theirs. Returns how many rows went.
    pub async fn purge_expired(&self) -> EngineResult<u64> {
        let outbox = self.db.outbox();
        let dispatched = outbox.cleanup_dispatched(DISPATCHED_RETENTION_DAYS).await?;
        let failed = outbox
            .cleanup_failed(self.max_attempts, FAILED_RETENTION_DAYS)
            .await?;

        if failed > 0 {
            warn!(failed, "Purged notifications that were never delivered");
        }

        Ok(dispatched + failed)
    }

    /// Runs until [`RelayHandle::shutdown`] is called. Spawn it as a task.
    pub async fn run(mut self) {
        info!("Outbox relay starting");

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.drain_once().await {
                        error!(error = %e, "Failed to process outbox batch");
                    }
                }

                _ = cleanup.tick() => {
                    match self.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => debug!(purged, "Purged old notifications"),
                        Err(e) => error!(error = %e, "Failed to purge old notifications"),
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Outbox relay shutting down");
                    break;
                }
            }
        }

        info!("Outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{engine, engine_with, seed_product, seed_store};
    use crate::EngineConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tendero_core::EventType;

    /// Fails the first `failures` deliveries, then records the rest.
    #[derive(Default)]
    struct FlakySink {
        failures: usize,
        calls: AtomicUsize,
        delivered: Mutex<Vec<EventType>>,
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        async fn deliver(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(NotifyError::Unavailable("push gateway timed out".to_string()));
            }
            self.delivered.lock().unwrap().push(event.event_type);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drain_delivers_and_marks() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let sink = Arc::new(FlakySink::default());
        let (relay, _handle) = engine.outbox_relay(sink.clone());

        let report = relay.drain_once().await.unwrap();
        assert_eq!(report, RelayReport { delivered: 1, failed: 0 });
        assert_eq!(*sink.delivered.lock().unwrap(), vec![EventType::NewProduct]);
        assert_eq!(engine.db().outbox().count_pending().await.unwrap(), 0);

        let report = relay.drain_once().await.unwrap();
        assert_eq!(report, RelayReport::default());
    }

    #[tokio::test]
    async fn test_failures_are_counted_then_retried() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let sink = Arc::new(FlakySink {
            failures: 1,
            ..FlakySink::default()
        });
        let (relay, _handle) = engine.outbox_relay(sink.clone());

        let report = relay.drain_once().await.unwrap();
        assert_eq!(report, RelayReport { delivered: 0, failed: 1 });

        let events = engine.db().outbox().list_by_store(&store.id, 10).await.unwrap();
        assert_eq!(events[0].attempts, 1);
        assert!(events[0].last_error.as_deref().unwrap().contains("timed out"));
        assert!(events[0].dispatched_at.is_none());

        let report = relay.drain_once().await.unwrap();
        assert_eq!(report, RelayReport { delivered: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let config = EngineConfig {
            outbox_max_attempts: 2,
            ..EngineConfig::default()
        };
        let engine = engine_with(config).await;
        let store = seed_store(&engine).await;
        seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let sink = Arc::new(FlakySink {
            failures: usize::MAX,
            ..FlakySink::default()
        });
        let (relay, _handle) = engine.outbox_relay(sink.clone());

        relay.drain_once().await.unwrap();
        relay.drain_once().await.unwrap();
        let report = relay.drain_once().await.unwrap();
        assert_eq!(report, RelayReport::default());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);

        // the dead row is fresh, so it survives the purge for now
        assert_eq!(relay.purge_expired().await.unwrap(), 0);
        assert_eq!(engine.db().outbox().count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let sink = Arc::new(FlakySink::default());
        let (relay, handle) = engine.outbox_relay(sink.clone());
        let task = tokio::spawn(relay.run());

        // the first tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }
}
