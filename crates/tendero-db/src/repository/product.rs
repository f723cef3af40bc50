//! # Product Repository
//!
//! Database operations for products.
//!
//! ## Stock Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Stock Update Strategy                                │
//! │                                                                         │
//! │  ❌ WRONG: read, compute, write back (lost update under concurrency)   │
//! │     SELECT quantity ... → 10                                           │
//! │     UPDATE products SET quantity = 4                                   │
//! │                                                                         │
//! │  ✅ CORRECT: one conditional statement                                  │
//! │     UPDATE products SET quantity = quantity - 6                        │
//! │     WHERE id = ? AND quantity >= 6                                     │
//! │     RETURNING quantity                                                 │
//! │                                                                         │
//! │  Sale A (6 units) and Sale B (7 units) on 10 in stock:                 │
//! │  whichever writes second matches zero rows and is rejected.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `state` is recomputed in the same statement: `out_of_stock` at zero,
//! `active` above zero, `inactive` untouched.
//!
//! Catalog edits (price, delete) use optimistic concurrency on `version`.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use tendero_core::{Product, ProductState};

const PRODUCT_COLUMNS: &str = r#"
    id, store_id, name, category, price_cents, cost_cents,
    quantity, state, created_at, updated_at, version
"#;

/// Stock levels around one conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub name: String,
    pub stock_before: i64,
    pub stock_after: i64,
}

#[derive(sqlx::FromRow)]
struct StockRow {
    name: String,
    quantity: i64,
}

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by its ID, including inactive ones.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = ?1",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Same as [`get_by_id`](Self::get_by_id) on a transaction's connection.
    pub async fn get_by_id_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = ?1",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(product)
    }

    /// Lists a store's products, inactive ones included.
    pub async fn list_by_store(&self, store_id: &str) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE store_id = ?1 ORDER BY id",
            PRODUCT_COLUMNS
        ))
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Live products of every store in the given categories.
    pub async fn list_live_in_categories(&self, categories: &[String]) -> DbResult<Vec<Product>> {
        if categories.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; categories.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM products WHERE state != 'inactive' AND category IN ({}) ORDER BY id",
            PRODUCT_COLUMNS, placeholders
        );

        let mut query = sqlx::query_as::<_, Product>(&sql);
        for category in categories {
            query = query.bind(category);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Inserts a new product with zero stock.
    ///
    /// Stock arrives through the inventory ledger so that the product's
    /// quantity always matches its latest movement.
    pub async fn insert(&self, conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, name = %product.name, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, store_id, name, category, price_cents, cost_cents,
                quantity, state, created_at, updated_at, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&product.id)
        .bind(&product.store_id)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.price_cents)
        .bind(product.cost_cents)
        .bind(ProductState::OutOfStock)
        .bind(product.created_at)
        .bind(product.updated_at)
        .bind(product.version)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Takes `quantity` units from a sellable product.
    ///
    /// ## Returns
    /// * `Ok(Some(StockChange))` - stock decremented
    /// * `Ok(None)` - product missing, inactive, in another store, or short
    ///   on stock; nothing was written
    pub async fn decrement_stock(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        store_id: &str,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> DbResult<Option<StockChange>> {
        debug!(product_id = %product_id, quantity = %quantity, "Decrementing stock");

        let row = sqlx::query_as::<_, StockRow>(
            r#"
            UPDATE products SET
                quantity = quantity - ?3,
                state = CASE WHEN quantity - ?3 = 0 THEN 'out_of_stock' ELSE 'active' END,
                updated_at = ?4,
                version = version + 1
            WHERE id = ?1
              AND store_id = ?2
              AND state != 'inactive'
              AND quantity >= ?3
            RETURNING name, quantity
            "#,
        )
        .bind(product_id)
        .bind(store_id)
        .bind(quantity)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| StockChange {
            name: r.name,
            stock_before: r.quantity + quantity,
            stock_after: r.quantity,
        }))
    }

    /// Adds `quantity` units to a product of `store_id`, whatever its state.
    ///
    /// Inactive products stay inactive. Returns `None` if the product does
    /// not exist in that store.
    pub async fn increment_stock(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        store_id: &str,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> DbResult<Option<StockChange>> {
        debug!(product_id = %product_id, quantity = %quantity, "Incrementing stock");

        let row = sqlx::query_as::<_, StockRow>(
            r#"
            UPDATE products SET
                quantity = quantity + ?3,
                state = CASE WHEN state = 'inactive' THEN 'inactive' ELSE 'active' END,
                updated_at = ?4,
                version = version + 1
            WHERE id = ?1 AND store_id = ?2
            RETURNING name, quantity
            "#,
        )
        .bind(product_id)
        .bind(store_id)
        .bind(quantity)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| StockChange {
            name: r.name,
            stock_before: r.quantity - quantity,
            stock_after: r.quantity,
        }))
    }

    /// Changes the selling price if the product is still at `expected_version`.
    ///
    /// Returns `false` when the version moved on or the product is inactive.
    pub async fn update_price(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        expected_version: i64,
        price_cents: i64,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug!(product_id = %product_id, price = %price_cents, "Updating price");

        let result = sqlx::query(
            r#"
            UPDATE products SET
                price_cents = ?3,
                updated_at = ?4,
                version = version + 1
            WHERE id = ?1 AND version = ?2 AND state != 'inactive'
            "#,
        )
        .bind(product_id)
        .bind(expected_version)
        .bind(price_cents)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Soft-deletes a product if it is still at `expected_version`.
    ///
    /// History (sale items, movements) keeps referencing the row.
    pub async fn soft_delete(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug!(product_id = %product_id, "Soft-deleting product");

        let result = sqlx::query(
            r#"
            UPDATE products SET
                state = 'inactive',
                updated_at = ?3,
                version = version + 1
            WHERE id = ?1 AND version = ?2 AND state != 'inactive'
            "#,
        )
        .bind(product_id)
        .bind(expected_version)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Generates a new product ID.
pub fn generate_product_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{seed_product, seed_store, test_db};

    #[tokio::test]
    async fn test_decrement_stops_at_available_stock() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let product = seed_product(&db, &store.id, 10).await;
        let repo = db.products();

        let mut tx = db.begin().await.unwrap();
        let first = repo
            .decrement_stock(&mut tx, &product.id, &store.id, 6, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((first.stock_before, first.stock_after), (10, 4));

        let second = repo
            .decrement_stock(&mut tx, &product.id, &store.id, 7, Utc::now())
            .await
            .unwrap();
        assert!(second.is_none());
        tx.commit().await.unwrap();

        let stored = repo.get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 4);
    }

    #[tokio::test]
    async fn test_state_follows_stock() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let product = seed_product(&db, &store.id, 3).await;
        let repo = db.products();

        let mut tx = db.begin().await.unwrap();
        repo.decrement_stock(&mut tx, &product.id, &store.id, 3, Utc::now())
            .await
            .unwrap();
        let empty = repo.get_by_id_in(&mut tx, &product.id).await.unwrap().unwrap();
        assert_eq!(empty.state, ProductState::OutOfStock);

        repo.increment_stock(&mut tx, &product.id, &store.id, 2, Utc::now())
            .await
            .unwrap();
        let restocked = repo.get_by_id_in(&mut tx, &product.id).await.unwrap().unwrap();
        assert_eq!(restocked.state, ProductState::Active);
        assert_eq!(restocked.quantity, 2);
    }

    #[tokio::test]
    async fn test_other_store_cannot_sell() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let other = seed_store(&db).await;
        let product = seed_product(&db, &store.id, 5).await;

        let mut tx = db.begin().await.unwrap();
        let change = db
            .products()
            .decrement_stock(&mut tx, &product.id, &other.id, 1, Utc::now())
            .await
            .unwrap();
        assert!(change.is_none());
    }

    #[tokio::test]
    async fn test_version_guards_price_update() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let product = seed_product(&db, &store.id, 5).await;
        let repo = db.products();

        let mut tx = db.begin().await.unwrap();
        assert!(repo
            .update_price(&mut tx, &product.id, product.version, 1500, Utc::now())
            .await
            .unwrap());
        // stale version
        assert!(!repo
            .update_price(&mut tx, &product.id, product.version, 1700, Utc::now())
            .await
            .unwrap());
        tx.commit().await.unwrap();

        let stored = repo.get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.price_cents, 1500);
    }

    #[tokio::test]
    async fn test_inactive_product_is_not_sellable() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let product = seed_product(&db, &store.id, 5).await;
        let repo = db.products();

        let mut tx = db.begin().await.unwrap();
        assert!(repo
            .soft_delete(&mut tx, &product.id, product.version, Utc::now())
            .await
            .unwrap());
        let change = repo
            .decrement_stock(&mut tx, &product.id, &store.id, 1, Utc::now())
            .await
            .unwrap();
        assert!(change.is_none());
    }
}
