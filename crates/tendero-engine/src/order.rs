//! # Order Lifecycle Controller
//!
//! Online orders take stock (and credit, when deferred) at placement and
//! wait in `pending`. The store then settles them exactly once.
//!
//! ```text
//!                 confirm_order
//!   ┌─────────┐ ─────────────────► ┌───────────┐  customer stats
//!   │ PENDING │                    │ COMPLETED │  + sale_completed event
//!   └─────────┘ ─────────────────► └───────────┘
//!                 reject_order
//!                                  ┌───────────┐  IN movement per open OUT
//!                                  │ CANCELLED │  + reversal per open charge
//!                                  └───────────┘
//! ```
//!
//! The transition itself is a conditional `UPDATE ... WHERE status =
//! 'pending'` and is the first write of its transaction. A second confirm or
//! reject (or one racing the first) matches no row and gets `Conflict`, so a
//! compensation can never be applied twice.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use tendero_core::lifecycle::{check_order_transition, OrderAction};
use tendero_core::validation::validate_reason;
use tendero_core::{Permission, Sale};

const REJECTION_MOVEMENT_REASON: &str = "order rejected";

impl Engine {
    /// Accepts a pending online order.
    ///
    /// No stock moves: it was taken when the order was placed.
    #[instrument(skip(self, user_id))]
    pub async fn confirm_order(&self, user_id: &str, sale_id: &str) -> EngineResult<Sale> {
        let order = self.order(sale_id).await?;

        self.authorize(&order.store_id, user_id, Permission::ManageOrders)
            .await?;

        check_order_transition(&order, OrderAction::Confirm)?;

        let store = self.store(&order.store_id).await?;
        let customer = match order.customer_id.as_deref() {
            Some(customer_id) => Some(self.store_customer(&store.id, customer_id).await?),
            None => None,
        };
        let units = self
            .db
            .sales()
            .get_items(sale_id)
            .await?
            .iter()
            .map(|item| item.quantity)
            .sum();

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let confirmed = match self.db.sales().confirm_pending(&mut tx, sale_id, now).await? {
            Some(sale) => sale,
            None => return Err(self.refused(&mut tx, sale_id, OrderAction::Confirm).await),
        };

        self.record_completion(&mut tx, &store, &confirmed, customer.as_ref(), units, now)
            .await?;

        tx.commit().await?;

        info!(sale_id = %sale_id, total = confirmed.total_cents, "Order confirmed");

        Ok(confirmed)
    }

    /// Cancels a pending online order and undoes its effects.
    ///
    /// Every OUT movement of the order gets a compensating IN movement and
    /// every credit charge gets a reversal, all in the transaction that
    /// flips the status. Product quantities and credit balances end exactly
    /// where they were before the order was placed (net of other activity).
    ///
    /// ## Errors
    /// * `Validation` - blank reason
    /// * `NotFound` - unknown order
    /// * `Conflict` - the order is not pending (already confirmed, already
    ///   rejected, or a POS sale)
    #[instrument(skip(self, user_id, reason))]
    pub async fn reject_order(&self, user_id: &str, sale_id: &str, reason: &str) -> EngineResult<Sale> {
        validate_reason(reason)?;

        let order = self.order(sale_id).await?;

        self.authorize(&order.store_id, user_id, Permission::ManageOrders)
            .await?;

        check_order_transition(&order, OrderAction::Reject)?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let cancelled = match self
            .db
            .sales()
            .cancel_pending(&mut tx, sale_id, reason.trim(), now)
            .await?
        {
            Some(sale) => sale,
            None => return Err(self.refused(&mut tx, sale_id, OrderAction::Reject).await),
        };

        let outs = self.db.inventory().open_sale_outs(&mut tx, sale_id).await?;
        for movement in &outs {
            self.compensate(&mut tx, movement, REJECTION_MOVEMENT_REASON, now)
                .await?;
        }

        let credit_reversed = self.reverse_sale_charges(&mut tx, sale_id, now).await?;

        tx.commit().await?;

        info!(
            sale_id = %sale_id,
            movements_reversed = outs.len(),
            credit_reversed,
            "Order rejected"
        );

        Ok(cancelled)
    }

    async fn order(&self, sale_id: &str) -> EngineResult<Sale> {
        self.db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", sale_id))
    }

    /// Explains a transition that matched no row, reading the order as the
    /// transaction sees it.
    async fn refused(&self, conn: &mut SqliteConnection, sale_id: &str, action: OrderAction) -> EngineError {
        match self.db.sales().get_by_id_in(conn, sale_id).await {
            Ok(Some(current)) => match check_order_transition(&current, action) {
                Err(err) => err.into(),
                Ok(_) => EngineError::conflict(format!("order {} changed concurrently", sale_id)),
            },
            Ok(None) => EngineError::not_found("Order", sale_id),
            Err(err) => err.into(),
        }
    }
}
