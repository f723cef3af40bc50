//! # Inventory Repository
//!
//! The append-only inventory ledger.
//!
//! ## Ledger Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  inventory_movements                                                    │
//! │                                                                         │
//! │  id │ product │ type │ qty │ before │ after │ sale │ reverses          │
//! │  ───┼─────────┼──────┼─────┼────────┼───────┼──────┼─────────          │
//! │   1 │ P       │ IN   │  10 │      0 │    10 │      │                   │
//! │   2 │ P       │ OUT  │   6 │     10 │     4 │ S1   │                   │
//! │   3 │ P       │ IN   │   6 │      4 │    10 │ S1   │ 2   ← S1 rejected │
//! │                                                                         │
//! │  • INSERT only; no UPDATE or DELETE statement exists for this table    │
//! │  • products.quantity == stock_after of the highest id per product      │
//! │  • reverses is UNIQUE: a movement is compensated at most once          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tendero_core::{InventoryMovement, MovementType, SALE_MOVEMENT_REASON};

const MOVEMENT_COLUMNS: &str = r#"
    id, product_id, store_id, movement_type, quantity,
    stock_before, stock_after, reason, sale_id, reverses_movement_id, created_at
"#;

/// A movement about to be appended. The id is assigned by SQLite.
#[derive(Debug, Clone)]
pub struct NewMovement<'a> {
    pub product_id: &'a str,
    pub store_id: &'a str,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub stock_before: i64,
    pub stock_after: i64,
    pub reason: &'a str,
    pub sale_id: Option<&'a str>,
    pub reverses_movement_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Appends a movement and returns its id.
    pub async fn append(&self, conn: &mut SqliteConnection, movement: &NewMovement<'_>) -> DbResult<i64> {
        debug!(
            product_id = %movement.product_id,
            movement_type = movement.movement_type.as_str(),
            quantity = %movement.quantity,
            "Appending inventory movement"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO inventory_movements (
                product_id, store_id, movement_type, quantity,
                stock_before, stock_after, reason, sale_id,
                reverses_movement_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(movement.product_id)
        .bind(movement.store_id)
        .bind(movement.movement_type)
        .bind(movement.quantity)
        .bind(movement.stock_before)
        .bind(movement.stock_after)
        .bind(movement.reason)
        .bind(movement.sale_id)
        .bind(movement.reverses_movement_id)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<InventoryMovement>> {
        let movement = sqlx::query_as::<_, InventoryMovement>(&format!(
            "SELECT {} FROM inventory_movements WHERE id = ?1",
            MOVEMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(movement)
    }

    /// Id of the movement that compensates `id`, if any.
    pub async fn reversal_of(&self, id: i64) -> DbResult<Option<i64>> {
        let reversal = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM inventory_movements WHERE reverses_movement_id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reversal)
    }

    /// OUT movements made by a sale itself that no movement has compensated
    /// yet. Manual movements that merely reference the sale are excluded.
    pub async fn open_sale_outs(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<Vec<InventoryMovement>> {
        let movements = sqlx::query_as::<_, InventoryMovement>(&format!(
            r#"
            SELECT {} FROM inventory_movements m
            WHERE m.sale_id = ?1
              AND m.movement_type = 'OUT'
              AND m.reason = ?2
              AND m.reverses_movement_id IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM inventory_movements r WHERE r.reverses_movement_id = m.id
              )
            ORDER BY m.id
            "#,
            MOVEMENT_COLUMNS
        ))
        .bind(sale_id)
        .bind(SALE_MOVEMENT_REASON)
        .fetch_all(&mut *conn)
        .await?;

        Ok(movements)
    }

    /// Full history of one product, oldest first.
    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<InventoryMovement>> {
        let movements = sqlx::query_as::<_, InventoryMovement>(&format!(
            "SELECT {} FROM inventory_movements WHERE product_id = ?1 ORDER BY id",
            MOVEMENT_COLUMNS
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// A store's movements with `from <= created_at < to`, oldest first.
    pub async fn list_for_store(
        &self,
        store_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<InventoryMovement>> {
        let movements = sqlx::query_as::<_, InventoryMovement>(&format!(
            r#"
            SELECT {} FROM inventory_movements
            WHERE store_id = ?1
              AND (?2 IS NULL OR created_at >= ?2)
              AND (?3 IS NULL OR created_at < ?3)
            ORDER BY created_at, id
            "#,
            MOVEMENT_COLUMNS
        ))
        .bind(store_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Most recent movement of a product (highest id).
    pub async fn latest_for_product(&self, product_id: &str) -> DbResult<Option<InventoryMovement>> {
        let movement = sqlx::query_as::<_, InventoryMovement>(&format!(
            "SELECT {} FROM inventory_movements WHERE product_id = ?1 ORDER BY id DESC LIMIT 1",
            MOVEMENT_COLUMNS
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(movement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::test_support::{seed_product, seed_store, test_db};

    #[tokio::test]
    async fn test_append_and_reverse_once() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let product = seed_product(&db, &store.id, 10).await;
        let repo = db.inventory();
        let now = Utc::now();

        let mut tx = db.begin().await.unwrap();
        let out = NewMovement {
            product_id: &product.id,
            store_id: &store.id,
            movement_type: MovementType::Out,
            quantity: 2,
            stock_before: 10,
            stock_after: 8,
            reason: "adjustment",
            sale_id: None,
            reverses_movement_id: None,
            created_at: now,
        };
        let out_id = repo.append(&mut tx, &out).await.unwrap();

        let back = NewMovement {
            movement_type: MovementType::In,
            stock_before: 8,
            stock_after: 10,
            reverses_movement_id: Some(out_id),
            ..out.clone()
        };
        let back_id = repo.append(&mut tx, &back).await.unwrap();
        assert!(back_id > out_id);

        let err = repo.append(&mut tx, &back).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        tx.commit().await.unwrap();

        assert_eq!(repo.reversal_of(out_id).await.unwrap(), Some(back_id));
        let latest = repo.latest_for_product(&product.id).await.unwrap().unwrap();
        assert_eq!(latest.id, back_id);
        assert!(latest.is_consistent());
    }

    #[tokio::test]
    async fn test_check_rejects_inconsistent_movement() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let product = seed_product(&db, &store.id, 10).await;

        let mut tx = db.begin().await.unwrap();
        let bad = NewMovement {
            product_id: &product.id,
            store_id: &store.id,
            movement_type: MovementType::Out,
            quantity: 2,
            stock_before: 10,
            stock_after: 9,
            reason: "typo",
            sale_id: None,
            reverses_movement_id: None,
            created_at: Utc::now(),
        };
        let err = db.inventory().append(&mut tx, &bad).await.unwrap_err();
        assert!(matches!(err, DbError::CheckViolation(_)));
    }
}
