//! # Notification Outbox Repository
//!
//! Events for the external notification dispatcher, written in the same
//! transaction as the change they describe.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  ENGINE OPERATION (e.g., create_sale)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. INSERT INTO sales ... / UPDATE products ...                 │   │
//! │  │  2. INSERT INTO notification_outbox (event_type, payload)      │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← the event exists iff the change exists                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            RELAY (tendero-engine::notify)                       │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT pending WHERE dispatched_at IS NULL                 │   │
//! │  │     AND attempts < max_attempts                                │   │
//! │  │  2. Deliver to the sink                                        │   │
//! │  │     a. ok:  dispatched_at = NOW()                              │   │
//! │  │     b. err: attempts += 1, last_error = ?                      │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  A delivery failure never touches the sale that produced the event.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use tendero_core::{EventType, NotificationEvent};

#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Queues an event inside the caller's transaction.
    ///
    /// ## Example
    /// ```rust,ignore
    /// db.outbox()
    ///     .enqueue(&mut tx, &store.id, EventType::SaleCompleted, &payload)
    ///     .await?;
    /// ```
    pub async fn enqueue<P: Serialize>(
        &self,
        conn: &mut SqliteConnection,
        store_id: &str,
        event_type: EventType,
        payload: &P,
    ) -> DbResult<NotificationEvent> {
        let event = NotificationEvent {
            id: Uuid::new_v4().to_string(),
            store_id: store_id.to_string(),
            event_type,
            payload: serde_json::to_string(payload)?,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            dispatched_at: None,
        };

        debug!(event_type = event_type.as_str(), store_id = %store_id, "Queuing notification");

        sqlx::query(
            r#"
            INSERT INTO notification_outbox (
                id, store_id, event_type, payload, attempts, last_error, created_at, dispatched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&event.id)
        .bind(&event.store_id)
        .bind(event.event_type)
        .bind(&event.payload)
        .bind(event.attempts)
        .bind(&event.last_error)
        .bind(event.created_at)
        .bind(event.dispatched_at)
        .execute(&mut *conn)
        .await?;

        Ok(event)
    }

    /// Undelivered events below `max_attempts`, oldest first.
    pub async fn get_pending(&self, limit: u32, max_attempts: i64) -> DbResult<Vec<NotificationEvent>> {
        let events = sqlx::query_as::<_, NotificationEvent>(
            r#"
            SELECT id, store_id, event_type, payload, attempts, last_error, created_at, dispatched_at
            FROM notification_outbox
            WHERE dispatched_at IS NULL AND attempts < ?2
            ORDER BY created_at ASC, id
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Events of one store, newest first.
    pub async fn list_by_store(&self, store_id: &str, limit: u32) -> DbResult<Vec<NotificationEvent>> {
        let events = sqlx::query_as::<_, NotificationEvent>(
            r#"
            SELECT id, store_id, event_type, payload, attempts, last_error, created_at, dispatched_at
            FROM notification_outbox
            WHERE store_id = ?1
            ORDER BY created_at DESC, id
            LIMIT ?2
            "#,
        )
        .bind(store_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    pub async fn mark_dispatched(&self, id: &str) -> DbResult<()> {
        sqlx::query("UPDATE notification_outbox SET dispatched_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE notification_outbox SET
                attempts = attempts + 1,
                last_error = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notification_outbox WHERE dispatched_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Deletes events dispatched more than `days_old` days ago.
    pub async fn cleanup_dispatched(&self, days_old: i64) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(days_old);

        let result = sqlx::query(
            "DELETE FROM notification_outbox WHERE dispatched_at IS NOT NULL AND dispatched_at < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes undelivered events that used up `max_attempts` and were
    /// queued more than `days_old` days ago.
    pub async fn cleanup_failed(&self, max_attempts: i64, days_old: i64) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(days_old);

        let result = sqlx::query(
            r#"
            DELETE FROM notification_outbox
            WHERE dispatched_at IS NULL AND attempts >= ?1 AND created_at < ?2
            "#,
        )
        .bind(max_attempts)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{seed_store, test_db};
    use serde_json::json;

    #[tokio::test]
    async fn test_failed_events_stop_at_max_attempts() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let repo = db.outbox();

        let mut tx = db.begin().await.unwrap();
        let event = repo
            .enqueue(&mut tx, &store.id, EventType::NewProduct, &json!({ "product": "Arroz" }))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(repo.get_pending(10, 2).await.unwrap().len(), 1);
        repo.mark_failed(&event.id, "smtp down").await.unwrap();
        repo.mark_failed(&event.id, "smtp down").await.unwrap();
        assert!(repo.get_pending(10, 2).await.unwrap().is_empty());
        assert_eq!(repo.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dispatched_events_leave_the_queue() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let repo = db.outbox();

        let mut tx = db.begin().await.unwrap();
        let event = repo
            .enqueue(&mut tx, &store.id, EventType::SaleCompleted, &json!({ "total_cents": 9200 }))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        repo.mark_dispatched(&event.id).await.unwrap();
        assert_eq!(repo.count_pending().await.unwrap(), 0);

        let stored = repo.list_by_store(&store.id, 10).await.unwrap();
        assert_eq!(stored[0].event_type, EventType::SaleCompleted);
        assert!(stored[0].dispatched_at.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_failed_only_drops_exhausted_events() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let repo = db.outbox();

        let mut tx = db.begin().await.unwrap();
        let dead = repo
            .enqueue(&mut tx, &store.id, EventType::NewProduct, &json!({ "product": "Arroz" }))
            .await
            .unwrap();
        let retrying = repo
            .enqueue(&mut tx, &store.id, EventType::NewProduct, &json!({ "product": "Frijol" }))
            .await
            .unwrap();
        let delivered = repo
            .enqueue(&mut tx, &store.id, EventType::SaleCompleted, &json!({ "total_cents": 9200 }))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        repo.mark_failed(&dead.id, "smtp down").await.unwrap();
        repo.mark_failed(&dead.id, "smtp down").await.unwrap();
        repo.mark_failed(&retrying.id, "smtp down").await.unwrap();
        repo.mark_dispatched(&delivered.id).await.unwrap();

        // still inside the retention window
        assert_eq!(repo.cleanup_failed(2, 30).await.unwrap(), 0);

        assert_eq!(repo.cleanup_failed(2, 0).await.unwrap(), 1);
        let left: Vec<String> = repo
            .list_by_store(&store.id, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(left.len(), 2);
        assert!(!left.contains(&dead.id));
    }
}
