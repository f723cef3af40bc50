//! # Sale Aggregator
//!
//! Turns a submitted cart into a persisted sale, in one transaction.
//!
//! ## Sale Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        create_sale / place_order                        │
//! │                                                                         │
//! │  authorize(Sell) ─► validate_cart ─► store / customer / replay lookups │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    INSERT sales              ◄── first statement is a write           │
//! │    for each line:                                                       │
//! │      take_stock (CAS)  ─► OUT movement ─► INSERT sale_items           │
//! │    deferred?  ─► charge credit account                                 │
//! │    POS?       ─► customer statistics ─► outbox: sale_completed        │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Online orders stop after the credit charge: they are `pending` until  │
//! │  confirm_order / reject_order.                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotency
//! A request with an idempotency key that was already used in the store
//! returns the original sale id and writes nothing. Two concurrent requests
//! with the same key both pass the pre-check; the UNIQUE index lets only one
//! insert win and the loser returns the winner's id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use tendero_core::cart::{validate_cart, CartLine, CartTotals};
use tendero_core::validation::{validate_idempotency_key, validate_notes};
use tendero_core::{
    Customer, EventType, PaymentMethod, Permission, Sale, SaleChannel, SaleLineItem, SaleStatus, Store,
    SALE_MOVEMENT_REASON,
};
use tendero_db::repository::sale::{generate_sale_id, generate_sale_item_id};

// =============================================================================
// Request / Response Types
// =============================================================================

/// A cart submitted for sale, with the totals the client computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRequest {
    pub store_id: String,
    pub customer_id: Option<String>,
    pub lines: Vec<CartLine>,
    pub payment_method: PaymentMethod,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
    /// Client-generated key, unique per store.
    pub idempotency_key: Option<String>,
}

impl SaleRequest {
    fn supplied_totals(&self) -> CartTotals {
        CartTotals {
            subtotal_cents: self.subtotal_cents,
            tax_cents: self.tax_cents,
            total_cents: self.total_cents,
        }
    }
}

/// A sale with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct SaleDetail {
    pub sale: Sale,
    pub items: Vec<SaleLineItem>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SaleCompletedPayload<'a> {
    pub store_name: &'a str,
    pub sale_id: &'a str,
    pub customer_name: Option<&'a str>,
    pub channel: SaleChannel,
    pub payment_method: PaymentMethod,
    pub units: i64,
    pub total_cents: i64,
}

impl Engine {
    // =========================================================================
    // Submission
    // =========================================================================

    /// Records a point-of-sale sale and returns its id.
    ///
    /// ## Errors
    /// * `Validation` - empty cart, bad quantities or prices, totals that do
    ///   not add up, deferred payment without a customer
    /// * `NotFound` - store, customer or a product (missing, inactive, other
    ///   store)
    /// * `InsufficientStock` - a line asks for more than is on the shelf
    /// * `Conflict` - the database stayed locked past the busy timeout
    ///
    /// Any error leaves no trace: no sale, no movement, no stock change.
    #[instrument(skip_all, fields(store_id = %request.store_id, user_id = %user_id, lines = request.lines.len()))]
    pub async fn create_sale(&self, user_id: &str, request: SaleRequest) -> EngineResult<String> {
        self.submit(user_id, request, SaleChannel::Pos).await
    }

    /// Places an online order: stock and credit are taken now, the order
    /// waits in `pending` for the store to confirm or reject it.
    #[instrument(skip_all, fields(store_id = %request.store_id, user_id = %user_id, lines = request.lines.len()))]
    pub async fn place_order(&self, user_id: &str, request: SaleRequest) -> EngineResult<String> {
        self.submit(user_id, request, SaleChannel::Online).await
    }

    async fn submit(&self, user_id: &str, request: SaleRequest, channel: SaleChannel) -> EngineResult<String> {
        self.authorize(&request.store_id, user_id, Permission::Sell)
            .await?;

        let totals = validate_cart(&request.lines, &request.supplied_totals())?;

        if request.payment_method == PaymentMethod::Deferred && request.customer_id.is_none() {
            return Err(EngineError::validation(
                "deferred payment requires a customer",
            ));
        }

        validate_notes(request.notes.as_deref())?;
        validate_idempotency_key(request.idempotency_key.as_deref())?;

        let store = self.store(&request.store_id).await?;
        let idempotency_key = request.idempotency_key.as_deref().map(str::trim);

        if let Some(key) = idempotency_key {
            if let Some(existing) = self.db.sales().find_by_idempotency_key(&store.id, key).await? {
                info!(sale_id = %existing, "Replayed sale request");
                return Ok(existing);
            }
        }

        let customer = match request.customer_id.as_deref() {
            Some(customer_id) => Some(self.store_customer(&store.id, customer_id).await?),
            None => None,
        };

        let now = Utc::now();
        let status = channel.initial_status();
        let sale = Sale {
            id: generate_sale_id(),
            store_id: store.id.clone(),
            customer_id: customer.as_ref().map(|c| c.id.clone()),
            user_id: user_id.to_string(),
            channel,
            payment_method: request.payment_method,
            status,
            subtotal_cents: totals.subtotal_cents,
            tax_cents: totals.tax_cents,
            total_cents: totals.total_cents,
            notes: request
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            idempotency_key: idempotency_key.map(str::to_string),
            cancel_reason: None,
            created_at: now,
            completed_at: (status == SaleStatus::Completed).then_some(now),
            cancelled_at: None,
        };

        let mut tx = self.db.begin().await?;

        if let Err(err) = self.db.sales().insert(&mut tx, &sale).await {
            if err.is_unique_violation_on("idempotency_key") {
                drop(tx);
                return self.replayed_sale_id(&store.id, idempotency_key).await;
            }
            return Err(err.into());
        }

        for line in &request.lines {
            let (_, change) = self
                .take_stock(
                    &mut tx,
                    &line.product_id,
                    &store.id,
                    line.quantity,
                    SALE_MOVEMENT_REASON,
                    Some(&sale.id),
                    None,
                    now,
                )
                .await?;

            self.db
                .sales()
                .insert_item(
                    &mut tx,
                    &SaleLineItem {
                        id: generate_sale_item_id(),
                        sale_id: sale.id.clone(),
                        product_id: line.product_id.clone(),
                        name_snapshot: change.name,
                        quantity: line.quantity,
                        unit_price_cents: line.unit_price_cents,
                        line_subtotal_cents: line.line_subtotal().cents(),
                        created_at: now,
                    },
                )
                .await?;
        }

        if sale.payment_method == PaymentMethod::Deferred {
            let customer = customer
                .as_ref()
                .ok_or_else(|| EngineError::validation("deferred payment requires a customer"))?;
            self.charge(&mut tx, &store, customer, &sale.id, sale.total_cents, now)
                .await?;
        }

        if sale.status == SaleStatus::Completed {
            let units = request.lines.iter().map(|l| l.quantity).sum();
            self.record_completion(&mut tx, &store, &sale, customer.as_ref(), units, now)
                .await?;
        }

        tx.commit().await?;

        info!(
            sale_id = %sale.id,
            channel = ?sale.channel,
            payment_method = sale.payment_method.as_str(),
            total = sale.total_cents,
            "Sale recorded"
        );

        Ok(sale.id)
    }

    /// Customer statistics and the `sale_completed` event for a sale that
    /// just reached `completed`.
    pub(crate) async fn record_completion(
        &self,
        conn: &mut SqliteConnection,
        store: &Store,
        sale: &Sale,
        customer: Option<&Customer>,
        units: i64,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        if let Some(customer) = customer {
            self.record_purchase(&mut *conn, &customer.id, sale.total_cents, at)
                .await?;
        }

        self.db
            .outbox()
            .enqueue(
                conn,
                &store.id,
                EventType::SaleCompleted,
                &SaleCompletedPayload {
                    store_name: &store.name,
                    sale_id: &sale.id,
                    customer_name: customer.map(|c| c.name.as_str()),
                    channel: sale.channel,
                    payment_method: sale.payment_method,
                    units,
                    total_cents: sale.total_cents,
                },
            )
            .await?;

        Ok(())
    }

    async fn replayed_sale_id(&self, store_id: &str, key: Option<&str>) -> EngineResult<String> {
        let key = key.ok_or_else(|| EngineError::conflict("sale already exists"))?;

        let existing = self
            .db
            .sales()
            .find_by_idempotency_key(store_id, key)
            .await?
            .ok_or_else(|| EngineError::conflict(format!("idempotency key {} is in use", key)))?;

        info!(sale_id = %existing, "Replayed sale request after losing the insert race");

        Ok(existing)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn sale_detail(&self, user_id: &str, sale_id: &str) -> EngineResult<SaleDetail> {
        let sale = self
            .db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;

        self.authorize(&sale.store_id, user_id, Permission::Sell)
            .await?;

        let items = self.db.sales().get_items(sale_id).await?;

        Ok(SaleDetail { sale, items })
    }

    /// Most recent sales of a store, optionally filtered by status.
    pub async fn list_sales(
        &self,
        user_id: &str,
        store_id: &str,
        status: Option<SaleStatus>,
        limit: u32,
    ) -> EngineResult<Vec<Sale>> {
        self.authorize(store_id, user_id, Permission::Sell).await?;

        Ok(self.db.sales().list_by_store(store_id, status, limit).await?)
    }

    pub(crate) async fn store(&self, store_id: &str) -> EngineResult<Store> {
        self.db
            .stores()
            .get_by_id(store_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Store", store_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{engine, seed_customer, seed_product, seed_store, OWNER};
    use tendero_core::types::TaxRate;
    use tendero_core::MovementType;

    fn request(store_id: &str, lines: Vec<CartLine>, method: PaymentMethod) -> SaleRequest {
        let totals = CartTotals::compute(&lines, TaxRate::from_bps(1500));
        SaleRequest {
            store_id: store_id.to_string(),
            customer_id: None,
            lines,
            payment_method: method,
            subtotal_cents: totals.subtotal_cents,
            tax_cents: totals.tax_cents,
            total_cents: totals.total_cents,
            notes: None,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_cash_sale_two_lines() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;
        let aceite = seed_product(&engine, &store.id, "Aceite 1L", 3_000, 5).await;

        let mut req = request(
            &store.id,
            vec![CartLine::new(&arroz.id, 2, 2_500), CartLine::new(&aceite.id, 1, 3_000)],
            PaymentMethod::Cash,
        );
        req.customer_id = Some(customer.id.clone());
        assert_eq!((req.subtotal_cents, req.tax_cents, req.total_cents), (8_000, 1_200, 9_200));

        let sale_id = engine.create_sale(OWNER, req).await.unwrap();

        let detail = engine.sale_detail(OWNER, &sale_id).await.unwrap();
        assert_eq!(detail.sale.status, SaleStatus::Completed);
        assert_eq!(detail.sale.total_cents, 9_200);
        assert!(detail.sale.completed_at.is_some());
        assert_eq!(detail.items.len(), 2);
        assert!(detail.items.iter().any(|i| i.name_snapshot == "Arroz 1kg" && i.line_subtotal_cents == 5_000));

        let arroz_after = engine.db().products().get_by_id(&arroz.id).await.unwrap().unwrap();
        assert_eq!(arroz_after.quantity, 8);
        let latest = engine.db().inventory().latest_for_product(&arroz.id).await.unwrap().unwrap();
        assert_eq!(latest.movement_type, MovementType::Out);
        assert_eq!(latest.sale_id.as_deref(), Some(sale_id.as_str()));
        assert_eq!(latest.stock_after, 8);

        let stats = engine.store_customer(&store.id, &customer.id).await.unwrap();
        assert_eq!(stats.purchase_count, 1);
        assert_eq!(stats.total_purchase_cents, 9_200);
        assert!(stats.last_purchase_at.is_some());

        let events = engine.db().outbox().list_by_store(&store.id, 50).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == EventType::SaleCompleted));
    }

    #[tokio::test]
    async fn test_totals_mismatch_writes_nothing() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let mut req = request(&store.id, vec![CartLine::new(&arroz.id, 2, 2_500)], PaymentMethod::Cash);
        req.total_cents += 1;

        let err = engine.create_sale(OWNER, req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(engine.list_sales(OWNER, &store.id, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_validation_errors() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let mut req = request(&store.id, vec![CartLine::new(&arroz.id, 3, i64::MAX / 2)], PaymentMethod::Cash);
        req.subtotal_cents = 0;
        req.tax_cents = 0;
        req.total_cents = 0;
        let err = engine.create_sale(OWNER, req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut req = request(&store.id, vec![CartLine::new(&arroz.id, 2, 2_500)], PaymentMethod::Cash);
        req.tax_cents = i64::MAX;
        req.total_cents = i64::MIN;
        let err = engine.create_sale(OWNER, req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let arroz_after = engine.db().products().get_by_id(&arroz.id).await.unwrap().unwrap();
        assert_eq!(arroz_after.quantity, 10);
    }

    #[tokio::test]
    async fn test_empty_cart_and_deferred_without_customer() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let err = engine
            .create_sale(OWNER, request(&store.id, vec![], PaymentMethod::Cash))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .create_sale(
                OWNER,
                request(&store.id, vec![CartLine::new(&arroz.id, 1, 2_500)], PaymentMethod::Deferred),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unknown_customer_is_not_found() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let mut req = request(&store.id, vec![CartLine::new(&arroz.id, 1, 2_500)], PaymentMethod::Deferred);
        req.customer_id = Some("nobody".to_string());

        let err = engine.create_sale(OWNER, req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_idempotent_replay_returns_the_same_sale() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let mut req = request(&store.id, vec![CartLine::new(&arroz.id, 3, 2_500)], PaymentMethod::Cash);
        req.customer_id = Some(customer.id.clone());
        req.idempotency_key = Some("pos-01-000123".to_string());

        let first = engine.create_sale(OWNER, req.clone()).await.unwrap();
        let second = engine.create_sale(OWNER, req).await.unwrap();
        assert_eq!(first, second);

        let arroz_after = engine.db().products().get_by_id(&arroz.id).await.unwrap().unwrap();
        assert_eq!(arroz_after.quantity, 7);
        assert_eq!(engine.list_sales(OWNER, &store.id, None, 10).await.unwrap().len(), 1);

        let stats = engine.store_customer(&store.id, &customer.id).await.unwrap();
        assert_eq!(stats.purchase_count, 1);
    }

    #[tokio::test]
    async fn test_shortfall_on_second_line_rolls_back_the_first() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;
        let aceite = seed_product(&engine, &store.id, "Aceite 1L", 3_000, 1).await;
        let movements_before = engine.db().inventory().list_for_store(&store.id, None, None).await.unwrap().len();

        let req = request(
            &store.id,
            vec![CartLine::new(&arroz.id, 2, 2_500), CartLine::new(&aceite.id, 4, 3_000)],
            PaymentMethod::Cash,
        );

        let err = engine.create_sale(OWNER, req).await.unwrap_err();
        match &err {
            EngineError::InsufficientStock { available, requested, name, .. } => {
                assert_eq!((*available, *requested), (1, 4));
                assert_eq!(name, "Aceite 1L");
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert!(err.is_retryable());

        let arroz_after = engine.db().products().get_by_id(&arroz.id).await.unwrap().unwrap();
        assert_eq!(arroz_after.quantity, 10);
        let movements_after = engine.db().inventory().list_for_store(&store.id, None, None).await.unwrap().len();
        assert_eq!(movements_before, movements_after);
        assert!(engine.list_sales(OWNER, &store.id, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_product_cannot_be_sold() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;
        engine.delete_product(OWNER, &arroz.id).await.unwrap();

        let err = engine
            .create_sale(
                OWNER,
                request(&store.id, vec![CartLine::new(&arroz.id, 1, 2_500)], PaymentMethod::Cash),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_placed_order_is_pending_and_holds_stock() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        let mut req = request(&store.id, vec![CartLine::new(&arroz.id, 4, 2_500)], PaymentMethod::Cash);
        req.customer_id = Some(customer.id.clone());

        let order_id = engine.place_order(OWNER, req).await.unwrap();

        let detail = engine.sale_detail(OWNER, &order_id).await.unwrap();
        assert_eq!(detail.sale.status, SaleStatus::Pending);
        assert_eq!(detail.sale.channel, SaleChannel::Online);
        assert!(detail.sale.completed_at.is_none());

        let arroz_after = engine.db().products().get_by_id(&arroz.id).await.unwrap().unwrap();
        assert_eq!(arroz_after.quantity, 6);

        let stats = engine.store_customer(&store.id, &customer.id).await.unwrap();
        assert_eq!(stats.purchase_count, 0);

        let events = engine.db().outbox().list_by_store(&store.id, 50).await.unwrap();
        assert!(!events.iter().any(|e| e.event_type == EventType::SaleCompleted));
    }
}
