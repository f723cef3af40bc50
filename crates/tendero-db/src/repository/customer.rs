//! # Customer Repository
//!
//! Customer records and their purchase statistics.
//!
//! ## Statistics Update
//! ```text
//! UPDATE customers SET
//!     purchase_count       = purchase_count + 1,
//!     total_purchase_cents = total_purchase_cents + :amount,
//!     last_purchase_at     = :now
//! ```
//! Delta updates only, so concurrent sales for the same customer never
//! overwrite each other. The engine runs this inside the sale transaction,
//! which makes it at-most-once per sale.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tendero_core::Customer;

const CUSTOMER_COLUMNS: &str = r#"
    id, store_id, name, phone,
    total_purchase_cents, purchase_count, last_purchase_at, created_at
"#;

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    pub async fn insert(&self, customer: &Customer) -> DbResult<()> {
        debug!(id = %customer.id, store_id = %customer.store_id, "Inserting customer");

        sqlx::query(
            r#"
            INSERT INTO customers (
                id, store_id, name, phone,
                total_purchase_cents, purchase_count, last_purchase_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.store_id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(customer.total_purchase_cents)
        .bind(customer.purchase_count)
        .bind(customer.last_purchase_at)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE id = ?1",
            CUSTOMER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    pub async fn list_by_store(&self, store_id: &str) -> DbResult<Vec<Customer>> {
        let customers = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {} FROM customers WHERE store_id = ?1 ORDER BY name, id",
            CUSTOMER_COLUMNS
        ))
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(customers)
    }

    /// Adds one purchase of `amount_cents` to the customer's statistics.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - customer doesn't exist
    pub async fn record_purchase(
        &self,
        conn: &mut SqliteConnection,
        customer_id: &str,
        amount_cents: i64,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(customer_id = %customer_id, amount = %amount_cents, "Recording purchase");

        let result = sqlx::query(
            r#"
            UPDATE customers SET
                purchase_count = purchase_count + 1,
                total_purchase_cents = total_purchase_cents + ?2,
                last_purchase_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(customer_id)
        .bind(amount_cents)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", customer_id));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{seed_customer, seed_store, test_db};

    #[tokio::test]
    async fn test_record_purchase_accumulates() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let customer = seed_customer(&db, &store.id).await;

        let mut tx = db.begin().await.unwrap();
        let now = Utc::now();
        db.customers()
            .record_purchase(&mut tx, &customer.id, 9200, now)
            .await
            .unwrap();
        db.customers()
            .record_purchase(&mut tx, &customer.id, 800, now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = db.customers().get_by_id(&customer.id).await.unwrap().unwrap();
        assert_eq!(stored.purchase_count, 2);
        assert_eq!(stored.total_purchase_cents, 10000);
        assert!(stored.last_purchase_at.is_some());
    }

    #[tokio::test]
    async fn test_record_purchase_unknown_customer() {
        let db = test_db().await;
        let mut tx = db.begin().await.unwrap();
        let err = db
            .customers()
            .record_purchase(&mut tx, "missing", 100, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
