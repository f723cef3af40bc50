//! # Store Repository
//!
//! Stores and the (store, user, role) membership table used for
//! authorization.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tendero_core::{Role, Store};

#[derive(Debug, Clone)]
pub struct StoreRepository {
    pool: SqlitePool,
}

impl StoreRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StoreRepository { pool }
    }

    pub async fn insert(&self, store: &Store) -> DbResult<()> {
        debug!(id = %store.id, name = %store.name, "Inserting store");

        sqlx::query(
            r#"
            INSERT INTO stores (id, name, tax_rate_bps, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&store.id)
        .bind(&store.name)
        .bind(store.tax_rate_bps)
        .bind(store.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Store>> {
        let store = sqlx::query_as::<_, Store>(
            r#"
            SELECT id, name, tax_rate_bps, created_at
            FROM stores
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(store)
    }

    /// Adds a member or changes the role of an existing one.
    pub async fn upsert_member(&self, store_id: &str, user_id: &str, role: Role) -> DbResult<()> {
        debug!(store_id = %store_id, user_id = %user_id, role = %role, "Setting store member");

        sqlx::query(
            r#"
            INSERT INTO store_members (store_id, user_id, role, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (store_id, user_id) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(store_id)
        .bind(user_id)
        .bind(role)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Role of `user_id` in `store_id`, or `None` when not a member.
    pub async fn member_role(&self, store_id: &str, user_id: &str) -> DbResult<Option<Role>> {
        let role = sqlx::query_scalar::<_, Role>(
            r#"
            SELECT role FROM store_members
            WHERE store_id = ?1 AND user_id = ?2
            "#,
        )
        .bind(store_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }
}
