//! # Customer Statistics
//!
//! Customer registration and the per-sale statistics update.
//!
//! `record_purchase` only ever runs inside the transaction of the sale (or
//! order confirmation) it describes. If that transaction rolls back, the
//! statistics never moved; an idempotent replay of the sale returns before
//! opening a transaction, so a sale is counted at most once.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use tendero_core::validation::{validate_display_name, validate_phone};
use tendero_core::{Customer, Permission};

impl Engine {
    /// Registers a customer of `store_id`.
    #[instrument(skip_all, fields(store_id = %store_id, user_id = %user_id))]
    pub async fn register_customer(
        &self,
        user_id: &str,
        store_id: &str,
        name: &str,
        phone: Option<&str>,
    ) -> EngineResult<Customer> {
        self.authorize(store_id, user_id, Permission::ManageCustomers).await?;

        validate_display_name(name)?;
        validate_phone(phone)?;

        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            store_id: store_id.to_string(),
            name: name.trim().to_string(),
            phone: phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            total_purchase_cents: 0,
            purchase_count: 0,
            last_purchase_at: None,
            created_at: Utc::now(),
        };

        self.db.customers().insert(&customer).await?;

        info!(customer_id = %customer.id, "Customer registered");

        Ok(customer)
    }

    /// Customer of `store_id`; customers of other stores are not found.
    pub(crate) async fn store_customer(&self, store_id: &str, customer_id: &str) -> EngineResult<Customer> {
        self.db
            .customers()
            .get_by_id(customer_id)
            .await?
            .filter(|c| c.store_id == store_id)
            .ok_or_else(|| EngineError::not_found("Customer", customer_id))
    }

    /// One more purchase of `amount_cents` for the customer, inside `conn`.
    pub(crate) async fn record_purchase(
        &self,
        conn: &mut SqliteConnection,
        customer_id: &str,
        amount_cents: i64,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.db
            .customers()
            .record_purchase(conn, customer_id, amount_cents, at)
            .await?;
        Ok(())
    }
}
