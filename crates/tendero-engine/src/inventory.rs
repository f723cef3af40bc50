//! # Inventory Ledger
//!
//! Every change to `products.quantity` goes through here and leaves one
//! movement row behind.
//!
//! ## One Movement, One Compare-and-Swap
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  take_stock(P, 6)                                                      │
//! │                                                                         │
//! │  1. UPDATE products SET quantity = quantity - 6                        │
//! │     WHERE id = P AND quantity >= 6 AND state != 'inactive'             │
//! │     RETURNING quantity                       → 4   (before = 10)       │
//! │                                                                         │
//! │  2. INSERT inventory_movements (OUT, 6, before 10, after 4)            │
//! │                                                                         │
//! │  Zero rows in step 1: read P inside the same transaction and explain   │
//! │  why (missing / inactive / other store → NotFound, else               │
//! │  InsufficientStock with the quantity actually available).             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both steps run on the caller's connection, so a sale with several lines
//! either moves all of them or none.
//!
//! ## Reversal
//! A movement is never edited. `reverse_movement` appends the opposite
//! movement with `reverses_movement_id` pointing at the original; the
//! column is UNIQUE, so a second reversal of the same movement fails even
//! when two requests race past the pre-check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use tendero_core::validation::{validate_quantity, validate_reason};
use tendero_core::{InventoryMovement, MovementType, Permission, ProductState, SaleStatus};
use tendero_db::{NewMovement, StockChange};

/// A manual stock movement: restock, shrinkage, count correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: String,
    pub store_id: String,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub reason: String,
    /// Sale the movement belongs to, e.g. a customer return.
    pub sale_id: Option<String>,
}

impl Engine {
    /// Applies a manual movement and returns its id.
    ///
    /// ## Errors
    /// * `Validation` - quantity out of range or blank reason
    /// * `NotFound` - product (or referenced sale) not in the store
    /// * `Conflict` - the referenced sale is a pending online order
    /// * `InsufficientStock` - an OUT larger than the current stock
    #[instrument(skip_all, fields(product_id = %request.product_id, movement_type = request.movement_type.as_str()))]
    pub async fn apply_movement(&self, user_id: &str, request: MovementRequest) -> EngineResult<i64> {
        self.authorize(&request.store_id, user_id, Permission::ManageInventory)
            .await?;

        validate_quantity(request.quantity)?;
        validate_reason(&request.reason)?;

        if let Some(sale_id) = request.sale_id.as_deref() {
            let sale = self
                .db
                .sales()
                .get_by_id(sale_id)
                .await?
                .filter(|s| s.store_id == request.store_id)
                .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;

            // reject_order compensates every OUT carrying the order's id
            if sale.status == SaleStatus::Pending {
                return Err(EngineError::conflict(format!(
                    "sale {} is a pending order; confirm or reject it first",
                    sale_id
                )));
            }
        }

        let now = Utc::now();
        let reason = request.reason.trim();
        let mut tx = self.db.begin().await?;

        let (movement_id, change) = match request.movement_type {
            MovementType::In => {
                self.put_stock(
                    &mut tx,
                    &request.product_id,
                    &request.store_id,
                    request.quantity,
                    reason,
                    request.sale_id.as_deref(),
                    None,
                    now,
                )
                .await?
            }
            MovementType::Out => {
                self.take_stock(
                    &mut tx,
                    &request.product_id,
                    &request.store_id,
                    request.quantity,
                    reason,
                    request.sale_id.as_deref(),
                    None,
                    now,
                )
                .await?
            }
        };

        tx.commit().await?;

        info!(
            movement_id,
            product = %change.name,
            stock_before = change.stock_before,
            stock_after = change.stock_after,
            "Movement applied"
        );

        Ok(movement_id)
    }

    /// Appends the compensating movement of `movement_id` and returns its id.
    ///
    /// ## Errors
    /// * `NotFound` - unknown movement
    /// * `Conflict` - already reversed, itself a reversal, or part of an
    ///   order that is still pending (reject the order instead)
    /// * `InsufficientStock` - reversing an IN whose units were already sold
    #[instrument(skip(self, user_id, reason))]
    pub async fn reverse_movement(&self, user_id: &str, movement_id: i64, reason: &str) -> EngineResult<i64> {
        let original = self
            .db
            .inventory()
            .get_by_id(movement_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Movement", movement_id.to_string()))?;

        self.authorize(&original.store_id, user_id, Permission::ManageInventory)
            .await?;

        validate_reason(reason)?;

        if original.reverses_movement_id.is_some() {
            return Err(EngineError::conflict(format!(
                "movement {} is itself a reversal",
                movement_id
            )));
        }

        if let Some(reversal) = self.db.inventory().reversal_of(movement_id).await? {
            return Err(EngineError::conflict(format!(
                "movement {} was already reversed by movement {}",
                movement_id, reversal
            )));
        }

        if let Some(sale_id) = original.sale_id.as_deref() {
            let pending = self
                .db
                .sales()
                .get_by_id(sale_id)
                .await?
                .map(|s| s.status == SaleStatus::Pending)
                .unwrap_or(false);
            if pending {
                return Err(EngineError::conflict(format!(
                    "movement {} belongs to pending order {}; reject the order instead",
                    movement_id, sale_id
                )));
            }
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let reversal_id = self
            .compensate(&mut tx, &original, reason.trim(), now)
            .await?;

        tx.commit().await?;

        info!(movement_id, reversal_id, "Movement reversed");

        Ok(reversal_id)
    }

    /// Movement history of one product, oldest first.
    pub async fn product_history(&self, user_id: &str, product_id: &str) -> EngineResult<Vec<InventoryMovement>> {
        let product = self
            .db
            .products()
            .get_by_id(product_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Product", product_id))?;

        self.authorize(&product.store_id, user_id, Permission::ViewReports)
            .await?;

        Ok(self.db.inventory().list_for_product(product_id).await?)
    }

    // =========================================================================
    // In-transaction helpers
    // =========================================================================

    /// OUT movement: conditional decrement plus ledger row.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn take_stock(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        store_id: &str,
        quantity: i64,
        reason: &str,
        sale_id: Option<&str>,
        reverses_movement_id: Option<i64>,
        at: DateTime<Utc>,
    ) -> EngineResult<(i64, StockChange)> {
        let change = match self
            .db
            .products()
            .decrement_stock(&mut *conn, product_id, store_id, quantity, at)
            .await?
        {
            Some(change) => change,
            None => return Err(self.stock_shortfall(conn, product_id, store_id, quantity).await),
        };

        let movement_id = self
            .db
            .inventory()
            .append(
                conn,
                &NewMovement {
                    product_id,
                    store_id,
                    movement_type: MovementType::Out,
                    quantity,
                    stock_before: change.stock_before,
                    stock_after: change.stock_after,
                    reason,
                    sale_id,
                    reverses_movement_id,
                    created_at: at,
                },
            )
            .await?;

        Ok((movement_id, change))
    }

    /// IN movement: increment plus ledger row. Inactive products accept
    /// stock (returns, order rejections) but stay inactive.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn put_stock(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        store_id: &str,
        quantity: i64,
        reason: &str,
        sale_id: Option<&str>,
        reverses_movement_id: Option<i64>,
        at: DateTime<Utc>,
    ) -> EngineResult<(i64, StockChange)> {
        let change = self
            .db
            .products()
            .increment_stock(&mut *conn, product_id, store_id, quantity, at)
            .await?
            .ok_or_else(|| EngineError::not_found("Product", product_id))?;

        let movement_id = self
            .db
            .inventory()
            .append(
                conn,
                &NewMovement {
                    product_id,
                    store_id,
                    movement_type: MovementType::In,
                    quantity,
                    stock_before: change.stock_before,
                    stock_after: change.stock_after,
                    reason,
                    sale_id,
                    reverses_movement_id,
                    created_at: at,
                },
            )
            .await?;

        Ok((movement_id, change))
    }

    /// Appends the opposite of `original`, linked to it.
    pub(crate) async fn compensate(
        &self,
        conn: &mut SqliteConnection,
        original: &InventoryMovement,
        reason: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<i64> {
        let (movement_id, _) = match original.movement_type.opposite() {
            MovementType::In => {
                self.put_stock(
                    conn,
                    &original.product_id,
                    &original.store_id,
                    original.quantity,
                    reason,
                    original.sale_id.as_deref(),
                    Some(original.id),
                    at,
                )
                .await?
            }
            MovementType::Out => {
                self.take_stock(
                    conn,
                    &original.product_id,
                    &original.store_id,
                    original.quantity,
                    reason,
                    original.sale_id.as_deref(),
                    Some(original.id),
                    at,
                )
                .await?
            }
        };

        Ok(movement_id)
    }

    /// Explains a decrement that matched no row.
    async fn stock_shortfall(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        store_id: &str,
        requested: i64,
    ) -> EngineError {
        match self.db.products().get_by_id_in(conn, product_id).await {
            Ok(Some(product))
                if product.store_id == store_id && product.state != ProductState::Inactive =>
            {
                EngineError::InsufficientStock {
                    product_id: product.id,
                    name: product.name,
                    available: product.quantity,
                    requested,
                }
            }
            Ok(_) => EngineError::not_found("Product", product_id),
            Err(e) => e.into(),
        }
    }
}
