//! # Sale Repository
//!
//! Database operations for sales, online orders and their line items.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  POS:     insert() → Sale { status: Completed }                        │
//! │                                                                         │
//! │  ONLINE:  insert() → Sale { status: Pending }                          │
//! │              │                                                          │
//! │              ├── confirm_pending() → Completed                          │
//! │              └── cancel_pending()  → Cancelled                          │
//! │                                                                         │
//! │  Both transitions are `UPDATE ... WHERE status = 'pending'`, so of two  │
//! │  concurrent confirm/reject calls exactly one matches a row.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use tendero_core::{Sale, SaleLineItem, SaleStatus};

const SALE_COLUMNS: &str = r#"
    id, store_id, customer_id, user_id, channel, payment_method, status,
    subtotal_cents, tax_cents, total_cents, notes, idempotency_key,
    cancel_reason, created_at, completed_at, cancelled_at
"#;

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {} FROM sales WHERE id = ?1",
            SALE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    pub async fn get_by_id_in(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {} FROM sales WHERE id = ?1",
            SALE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(sale)
    }

    /// Id of the sale submitted earlier under `key`, if any.
    pub async fn find_by_idempotency_key(&self, store_id: &str, key: &str) -> DbResult<Option<String>> {
        let id = sqlx::query_scalar::<_, String>(
            "SELECT id FROM sales WHERE store_id = ?1 AND idempotency_key = ?2",
        )
        .bind(store_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    /// Lists a store's sales, newest first.
    pub async fn list_by_store(
        &self,
        store_id: &str,
        status: Option<SaleStatus>,
        limit: u32,
    ) -> DbResult<Vec<Sale>> {
        let sales = sqlx::query_as::<_, Sale>(&format!(
            r#"
            SELECT {} FROM sales
            WHERE store_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC, id
            LIMIT ?3
            "#,
            SALE_COLUMNS
        ))
        .bind(store_id)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(sales)
    }

    /// Ids of the store's online orders still awaiting confirmation.
    pub async fn pending_ids(&self, store_id: &str) -> DbResult<HashSet<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM sales WHERE store_id = ?1 AND status = ?2",
        )
        .bind(store_id)
        .bind(SaleStatus::Pending)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    /// Inserts the sale header. Must precede its items (foreign key).
    pub async fn insert(&self, conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, store_id = %sale.store_id, status = sale.status.as_str(), "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, store_id, customer_id, user_id, channel, payment_method, status,
                subtotal_cents, tax_cents, total_cents, notes, idempotency_key,
                cancel_reason, created_at, completed_at, cancelled_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16
            )
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.store_id)
        .bind(&sale.customer_id)
        .bind(&sale.user_id)
        .bind(sale.channel)
        .bind(sale.payment_method)
        .bind(sale.status)
        .bind(sale.subtotal_cents)
        .bind(sale.tax_cents)
        .bind(sale.total_cents)
        .bind(&sale.notes)
        .bind(&sale.idempotency_key)
        .bind(&sale.cancel_reason)
        .bind(sale.created_at)
        .bind(sale.completed_at)
        .bind(sale.cancelled_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Adds a line item. The product name is a snapshot taken at sale time.
    pub async fn insert_item(&self, conn: &mut SqliteConnection, item: &SaleLineItem) -> DbResult<()> {
        debug!(sale_id = %item.sale_id, product_id = %item.product_id, "Adding sale item");

        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id, name_snapshot,
                quantity, unit_price_cents, line_subtotal_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(&item.name_snapshot)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.line_subtotal_cents)
        .bind(item.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleLineItem>> {
        let items = sqlx::query_as::<_, SaleLineItem>(
            r#"
            SELECT id, sale_id, product_id, name_snapshot,
                   quantity, unit_price_cents, line_subtotal_cents, created_at
            FROM sale_items
            WHERE sale_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Moves a pending online order to completed.
    ///
    /// ## Returns
    /// * `Ok(Some(Sale))` - the order as it is after the transition
    /// * `Ok(None)` - no pending online order with that id; nothing written
    pub async fn confirm_pending(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<Option<Sale>> {
        debug!(sale_id = %sale_id, "Confirming order");

        let sale = sqlx::query_as::<_, Sale>(&format!(
            r#"
            UPDATE sales SET status = 'completed', completed_at = ?2
            WHERE id = ?1 AND status = 'pending' AND channel = 'online'
            RETURNING {}
            "#,
            SALE_COLUMNS
        ))
        .bind(sale_id)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(sale)
    }

    /// Moves a pending online order to cancelled.
    ///
    /// Same contract as [`confirm_pending`](Self::confirm_pending).
    pub async fn cancel_pending(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DbResult<Option<Sale>> {
        debug!(sale_id = %sale_id, "Cancelling order");

        let sale = sqlx::query_as::<_, Sale>(&format!(
            r#"
            UPDATE sales SET status = 'cancelled', cancelled_at = ?3, cancel_reason = ?2
            WHERE id = ?1 AND status = 'pending' AND channel = 'online'
            RETURNING {}
            "#,
            SALE_COLUMNS
        ))
        .bind(sale_id)
        .bind(reason)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(sale)
    }
}

/// Generates a new sale ID.
pub fn generate_sale_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a new sale item ID.
pub fn generate_sale_item_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::test_support::{seed_store, test_db};
    use tendero_core::{PaymentMethod, SaleChannel};

    fn sale(store_id: &str, channel: SaleChannel, key: Option<&str>) -> Sale {
        Sale {
            id: generate_sale_id(),
            store_id: store_id.to_string(),
            customer_id: None,
            user_id: "cashier".to_string(),
            channel,
            payment_method: PaymentMethod::Cash,
            status: channel.initial_status(),
            subtotal_cents: 8000,
            tax_cents: 1200,
            total_cents: 9200,
            notes: None,
            idempotency_key: key.map(str::to_string),
            cancel_reason: None,
            created_at: Utc::now(),
            completed_at: None,
            cancelled_at: None,
        }
    }

    #[tokio::test]
    async fn test_idempotency_key_unique_per_store() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let repo = db.sales();

        let first = sale(&store.id, SaleChannel::Pos, Some("k-1"));
        let mut tx = db.begin().await.unwrap();
        repo.insert(&mut tx, &first).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let err = repo
            .insert(&mut tx, &sale(&store.id, SaleChannel::Pos, Some("k-1")))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("sales.idempotency_key"));
        drop(tx);

        assert_eq!(
            repo.find_by_idempotency_key(&store.id, "k-1").await.unwrap(),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn test_pending_transitions_happen_once() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let repo = db.sales();
        let order = sale(&store.id, SaleChannel::Online, None);

        let mut tx = db.begin().await.unwrap();
        repo.insert(&mut tx, &order).await.unwrap();
        let confirmed = repo
            .confirm_pending(&mut tx, &order.id, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.status, SaleStatus::Completed);
        assert!(confirmed.completed_at.is_some());

        assert!(repo
            .cancel_pending(&mut tx, &order.id, "too late", Utc::now())
            .await
            .unwrap()
            .is_none());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_ids_only_lists_open_orders() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let repo = db.sales();
        let open = sale(&store.id, SaleChannel::Online, None);
        let settled = sale(&store.id, SaleChannel::Online, None);
        let counter = sale(&store.id, SaleChannel::Pos, None);

        let mut tx = db.begin().await.unwrap();
        for s in [&open, &settled, &counter] {
            repo.insert(&mut tx, s).await.unwrap();
        }
        repo.confirm_pending(&mut tx, &settled.id, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let pending = repo.pending_ids(&store.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending.contains(&open.id));
    }

    #[tokio::test]
    async fn test_pos_sale_cannot_be_pending() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let mut bad = sale(&store.id, SaleChannel::Pos, None);
        bad.status = SaleStatus::Pending;

        let mut tx = db.begin().await.unwrap();
        let err = db.sales().insert(&mut tx, &bad).await.unwrap_err();
        assert!(matches!(err, DbError::CheckViolation(_)));
    }
}
