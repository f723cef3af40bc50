//! # Report Repository
//!
//! Loads the completed-sale history that the analytics read models fold.
//! Only `completed` sales count: pending orders have not been accepted and
//! cancelled ones were compensated.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tendero_core::analytics::{CompletedSaleCost, SoldLine};

#[derive(Debug, Clone)]
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReportRepository { pool }
    }

    /// Completed sales since `since` with their cost at today's product cost.
    pub async fn completed_sale_costs(
        &self,
        store_id: &str,
        since: DateTime<Utc>,
    ) -> DbResult<Vec<CompletedSaleCost>> {
        debug!(store_id = %store_id, since = %since, "Loading completed sale costs");

        let rows = sqlx::query_as::<_, CompletedSaleCost>(
            r#"
            SELECT
                s.id AS sale_id,
                s.completed_at AS completed_at,
                s.total_cents AS total_cents,
                COALESCE(SUM(i.quantity * p.cost_cents), 0) AS cost_cents
            FROM sales s
            LEFT JOIN sale_items i ON i.sale_id = s.id
            LEFT JOIN products p ON p.id = i.product_id
            WHERE s.store_id = ?1
              AND s.status = 'completed'
              AND s.completed_at >= ?2
            GROUP BY s.id, s.completed_at, s.total_cents
            ORDER BY s.completed_at, s.id
            "#,
        )
        .bind(store_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Line items of completed sales with `from <= completed_at < to`.
    pub async fn sold_lines(
        &self,
        store_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<SoldLine>> {
        debug!(store_id = %store_id, "Loading sold lines");

        let rows = sqlx::query_as::<_, SoldLine>(
            r#"
            SELECT
                i.product_id AS product_id,
                i.name_snapshot AS name_snapshot,
                p.category AS category,
                i.quantity AS quantity,
                i.line_subtotal_cents AS line_subtotal_cents
            FROM sale_items i
            JOIN sales s ON s.id = i.sale_id
            JOIN products p ON p.id = i.product_id
            WHERE s.store_id = ?1
              AND s.status = 'completed'
              AND (?2 IS NULL OR s.completed_at >= ?2)
              AND (?3 IS NULL OR s.completed_at < ?3)
            ORDER BY s.completed_at, i.id
            "#,
        )
        .bind(store_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
