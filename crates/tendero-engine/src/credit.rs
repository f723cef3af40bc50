//! # Credit Account Manager
//!
//! Deferred ("fiado") sales owe the store money. Each customer has at most
//! one active account per store; the first deferred sale opens it.
//!
//! ## Balance Invariant
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  current_balance = Σ credit_charges.amount − Σ credit_payments.amount  │
//! │                                                                         │
//! │  deferred sale  → +charge   (same transaction as the sale)             │
//! │  rejected order → −reversal (same transaction as the rejection)        │
//! │  payment        → +payment  (conditional UPDATE on the balance)        │
//! │                                                                         │
//! │  The balance column and the ledger row are always written together.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Policies
//! * [`CreditLimitPolicy::Soft`] (default) accepts a charge past the limit,
//!   logs a warning and flags the `credit_charge` event; `Enforce` refuses
//!   the sale.
//! * [`OverpaymentPolicy::Reject`] (default) refuses a payment larger than
//!   the balance; `Allow` lets the balance go negative.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, instrument, warn};

use crate::config::{CreditLimitPolicy, OverpaymentPolicy};
use crate::error::{EngineError, EngineResult};
use crate::Engine;
use tendero_core::lifecycle::{check_credit_transition, CreditAction};
use tendero_core::validation::{validate_credit_payment_method, validate_notes, validate_payment_amount};
use tendero_core::{
    CreditAccount, CreditAccountStatus, CreditCharge, CreditChargeKind, CreditPayment, CreditStanding,
    Customer, EventType, Money, PaymentMethod, Permission, Store,
};
use tendero_db::repository::credit::generate_account_id;
use tendero_db::BalanceChange;

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub account_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub payment: CreditPayment,
    pub balance_cents: i64,
    pub standing: CreditStanding,
}

/// Account with its full ledger.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatement {
    pub account: CreditAccount,
    pub standing: CreditStanding,
    pub charges: Vec<CreditCharge>,
    pub payments: Vec<CreditPayment>,
    /// Balance recomputed from the ledger rows.
    pub ledger_balance_cents: i64,
    pub over_limit: bool,
}

#[derive(Debug, Serialize)]
struct CreditChargePayload<'a> {
    store_name: &'a str,
    customer_name: &'a str,
    sale_id: &'a str,
    amount_cents: i64,
    balance_cents: i64,
    credit_limit_cents: i64,
    over_limit: bool,
}

impl Engine {
    // =========================================================================
    // Charge (inside the sale transaction)
    // =========================================================================

    /// Adds `amount_cents` to the customer's active account, opening one if
    /// needed, and records the charge against `sale_id`.
    pub(crate) async fn charge(
        &self,
        conn: &mut SqliteConnection,
        store: &Store,
        customer: &Customer,
        sale_id: &str,
        amount_cents: i64,
        at: chrono::DateTime<Utc>,
    ) -> EngineResult<BalanceChange> {
        let credit = self.db.credit();

        let change = match credit
            .add_to_active_balance(&mut *conn, &customer.id, &store.id, amount_cents, at)
            .await?
        {
            Some(change) => change,
            None => {
                let account = CreditAccount {
                    id: generate_account_id(),
                    customer_id: customer.id.clone(),
                    store_id: store.id.clone(),
                    credit_limit_cents: self.config.default_credit_limit_cents,
                    current_balance_cents: amount_cents,
                    status: CreditAccountStatus::Active,
                    due_date: Some(at + Duration::days(self.config.credit_term_days)),
                    opened_at: at,
                    closed_at: None,
                    updated_at: at,
                };
                credit.open(&mut *conn, &account).await?;

                info!(account_id = %account.id, customer_id = %customer.id, "Credit account opened");

                BalanceChange {
                    account_id: account.id,
                    balance_cents: account.current_balance_cents,
                    credit_limit_cents: account.credit_limit_cents,
                }
            }
        };

        let over_limit = change.balance_cents > change.credit_limit_cents;
        if over_limit {
            match self.config.credit_limit_policy {
                CreditLimitPolicy::Enforce => {
                    return Err(EngineError::validation(format!(
                        "credit limit of {} exceeded: balance would be {}",
                        Money::from_cents(change.credit_limit_cents),
                        Money::from_cents(change.balance_cents)
                    )));
                }
                CreditLimitPolicy::Soft => {
                    warn!(
                        account_id = %change.account_id,
                        balance = change.balance_cents,
                        limit = change.credit_limit_cents,
                        "Credit limit exceeded"
                    );
                }
            }
        }

        credit
            .insert_charge(&mut *conn, &change.account_id, sale_id, CreditChargeKind::Charge, amount_cents, at)
            .await?;

        self.db
            .outbox()
            .enqueue(
                conn,
                &store.id,
                EventType::CreditCharge,
                &CreditChargePayload {
                    store_name: &store.name,
                    customer_name: &customer.name,
                    sale_id,
                    amount_cents,
                    balance_cents: change.balance_cents,
                    credit_limit_cents: change.credit_limit_cents,
                    over_limit,
                },
            )
            .await?;

        Ok(change)
    }

    /// Posts a reversal for every charge of `sale_id` not yet reversed.
    ///
    /// Reversals apply to the account even if it was closed since.
    pub(crate) async fn reverse_sale_charges(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
        at: chrono::DateTime<Utc>,
    ) -> EngineResult<i64> {
        let credit = self.db.credit();
        let charges = credit.open_charges_for_sale(&mut *conn, sale_id).await?;
        let mut reversed = 0;

        for charge in charges {
            credit
                .adjust_balance(&mut *conn, &charge.account_id, -charge.amount_cents, at)
                .await?
                .ok_or_else(|| EngineError::not_found("Credit account", &charge.account_id))?;
            credit
                .insert_charge(
                    &mut *conn,
                    &charge.account_id,
                    sale_id,
                    CreditChargeKind::Reversal,
                    -charge.amount_cents,
                    at,
                )
                .await?;
            reversed += charge.amount_cents;
        }

        Ok(reversed)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Registers a payment against a credit account.
    ///
    /// ## Errors
    /// * `Validation` - non-positive amount, deferred method, or (under
    ///   [`OverpaymentPolicy::Reject`]) more than the balance
    /// * `NotFound` - unknown account
    /// * `Conflict` - account closed
    #[instrument(skip_all, fields(account_id = %request.account_id, amount = request.amount_cents))]
    pub async fn register_payment(&self, user_id: &str, request: PaymentRequest) -> EngineResult<PaymentReceipt> {
        validate_payment_amount(request.amount_cents)?;
        validate_credit_payment_method(request.method)?;
        validate_notes(request.notes.as_deref())?;

        let account = self.account(&request.account_id).await?;

        self.authorize(&account.store_id, user_id, Permission::RegisterPayment)
            .await?;

        check_credit_transition(&account, CreditAction::Pay)?;

        let allow_overpayment = self.config.overpayment_policy == OverpaymentPolicy::Allow;
        let now = Utc::now();
        let notes = request.notes.as_deref().map(str::trim).filter(|n| !n.is_empty());

        let mut tx = self.db.begin().await?;

        let change = match self
            .db
            .credit()
            .subtract_payment(&mut tx, &account.id, request.amount_cents, allow_overpayment, now)
            .await?
        {
            Some(change) => change,
            None => {
                let current = self
                    .db
                    .credit()
                    .get_by_id_in(&mut tx, &account.id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("Credit account", &account.id))?;
                check_credit_transition(&current, CreditAction::Pay)?;
                return Err(EngineError::validation(format!(
                    "payment of {} exceeds the outstanding balance of {}",
                    Money::from_cents(request.amount_cents),
                    current.balance()
                )));
            }
        };

        let payment = self
            .db
            .credit()
            .insert_payment(&mut tx, &account.id, request.amount_cents, request.method, notes, now)
            .await?;

        tx.commit().await?;

        info!(
            account_id = %account.id,
            payment_id = %payment.id,
            balance = change.balance_cents,
            "Credit payment registered"
        );

        let standing = CreditAccount {
            current_balance_cents: change.balance_cents,
            ..account
        }
        .standing(now);

        Ok(PaymentReceipt {
            payment,
            balance_cents: change.balance_cents,
            standing,
        })
    }

    // =========================================================================
    // Account maintenance
    // =========================================================================

    /// Closes a settled account. The next deferred sale opens a new one.
    #[instrument(skip(self, user_id))]
    pub async fn close_account(&self, user_id: &str, account_id: &str) -> EngineResult<CreditAccount> {
        let account = self.account(account_id).await?;

        self.authorize(&account.store_id, user_id, Permission::ManageCredit)
            .await?;

        check_credit_transition(&account, CreditAction::Close)?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !self.db.credit().close(&mut tx, account_id, now).await? {
            let current = self
                .db
                .credit()
                .get_by_id_in(&mut tx, account_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Credit account", account_id))?;
            check_credit_transition(&current, CreditAction::Close)?;
            return Err(EngineError::conflict(format!(
                "credit account {} changed while closing",
                account_id
            )));
        }

        let closed = self
            .db
            .credit()
            .get_by_id_in(&mut tx, account_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Credit account", account_id))?;

        tx.commit().await?;

        info!(account_id = %account_id, "Credit account closed");

        Ok(closed)
    }

    /// Account, derived standing and the full charge/payment ledger.
    pub async fn account_statement(&self, user_id: &str, account_id: &str) -> EngineResult<AccountStatement> {
        let account = self.account(account_id).await?;

        self.authorize(&account.store_id, user_id, Permission::RegisterPayment)
            .await?;

        let credit = self.db.credit();
        let charges = credit.list_charges(account_id).await?;
        let payments = credit.list_payments(account_id).await?;
        let ledger_balance_cents = credit.ledger_balance(account_id).await?;

        Ok(AccountStatement {
            standing: account.standing(Utc::now()),
            over_limit: account.is_over_limit(),
            account,
            charges,
            payments,
            ledger_balance_cents,
        })
    }

    /// The customer's active account in `store_id`, if any.
    pub async fn active_account(
        &self,
        user_id: &str,
        store_id: &str,
        customer_id: &str,
    ) -> EngineResult<Option<CreditAccount>> {
        self.authorize(store_id, user_id, Permission::RegisterPayment)
            .await?;

        Ok(self.db.credit().find_active(customer_id, store_id).await?)
    }

    async fn account(&self, account_id: &str) -> EngineResult<CreditAccount> {
        self.db
            .credit()
            .get_by_id(account_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Credit account", account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sale::SaleRequest;
    use crate::test_support::{engine, engine_with, seed_customer, seed_product, seed_store, OWNER};
    use crate::EngineConfig;
    use tendero_core::cart::CartLine;

    /// One deferred sale of `units` × 100.00 at 0% tax.
    async fn deferred_sale(engine: &Engine, store: &Store, customer: &Customer, product_id: &str, units: i64) -> String {
        let subtotal = units * 10_000;
        engine
            .create_sale(
                OWNER,
                SaleRequest {
                    store_id: store.id.clone(),
                    customer_id: Some(customer.id.clone()),
                    lines: vec![CartLine::new(product_id, units, 10_000)],
                    payment_method: PaymentMethod::Deferred,
                    subtotal_cents: subtotal,
                    tax_cents: 0,
                    total_cents: subtotal,
                    notes: None,
                    idempotency_key: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_deferred_500_then_payment_200_leaves_300() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let product = seed_product(&engine, &store.id, "Cemento 50kg", 10_000, 20).await;

        deferred_sale(&engine, &store, &customer, &product.id, 5).await;

        let account = engine
            .active_account(OWNER, &store.id, &customer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.current_balance_cents, 50_000);

        let receipt = engine
            .register_payment(
                OWNER,
                PaymentRequest {
                    account_id: account.id.clone(),
                    amount_cents: 20_000,
                    method: PaymentMethod::Cash,
                    notes: Some("abono".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.balance_cents, 30_000);
        assert_eq!(receipt.standing, CreditStanding::Active);

        let statement = engine.account_statement(OWNER, &account.id).await.unwrap();
        assert_eq!(statement.account.current_balance_cents, 30_000);
        assert_eq!(statement.ledger_balance_cents, 30_000);
        assert_eq!(statement.charges.len(), 1);
        assert_eq!(statement.payments.len(), 1);
        assert!(!statement.over_limit);
    }

    #[tokio::test]
    async fn test_second_deferred_sale_reuses_the_account() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let product = seed_product(&engine, &store.id, "Cemento 50kg", 10_000, 20).await;

        deferred_sale(&engine, &store, &customer, &product.id, 1).await;
        deferred_sale(&engine, &store, &customer, &product.id, 2).await;

        let accounts = engine.db().credit().list_by_store(&store.id).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].current_balance_cents, 30_000);
        assert!(accounts[0].due_date.is_some());
    }

    #[tokio::test]
    async fn test_overpayment_rejected_by_default() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let product = seed_product(&engine, &store.id, "Cemento 50kg", 10_000, 20).await;
        deferred_sale(&engine, &store, &customer, &product.id, 1).await;
        let account = engine.active_account(OWNER, &store.id, &customer.id).await.unwrap().unwrap();

        let err = engine
            .register_payment(
                OWNER,
                PaymentRequest {
                    account_id: account.id.clone(),
                    amount_cents: 10_001,
                    method: PaymentMethod::Cash,
                    notes: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let statement = engine.account_statement(OWNER, &account.id).await.unwrap();
        assert!(statement.payments.is_empty());
        assert_eq!(statement.account.current_balance_cents, 10_000);
    }

    #[tokio::test]
    async fn test_overpayment_allowed_by_policy() {
        let config = EngineConfig {
            overpayment_policy: OverpaymentPolicy::Allow,
            ..EngineConfig::default()
        };
        let engine = engine_with(config).await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let product = seed_product(&engine, &store.id, "Cemento 50kg", 10_000, 20).await;
        deferred_sale(&engine, &store, &customer, &product.id, 1).await;
        let account = engine.active_account(OWNER, &store.id, &customer.id).await.unwrap().unwrap();

        let receipt = engine
            .register_payment(
                OWNER,
                PaymentRequest {
                    account_id: account.id,
                    amount_cents: 12_000,
                    method: PaymentMethod::Transfer,
                    notes: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt.balance_cents, -2_000);
    }

    #[tokio::test]
    async fn test_payment_validation() {
        let engine = engine().await;

        let err = engine
            .register_payment(
                OWNER,
                PaymentRequest {
                    account_id: "missing".to_string(),
                    amount_cents: 0,
                    method: PaymentMethod::Cash,
                    notes: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .register_payment(
                OWNER,
                PaymentRequest {
                    account_id: "missing".to_string(),
                    amount_cents: 100,
                    method: PaymentMethod::Cash,
                    notes: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_enforced_limit_refuses_the_sale() {
        let config = EngineConfig {
            credit_limit_policy: CreditLimitPolicy::Enforce,
            default_credit_limit_cents: 15_000,
            ..EngineConfig::default()
        };
        let engine = engine_with(config).await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let product = seed_product(&engine, &store.id, "Cemento 50kg", 10_000, 20).await;

        let err = engine
            .create_sale(
                OWNER,
                SaleRequest {
                    store_id: store.id.clone(),
                    customer_id: Some(customer.id.clone()),
                    lines: vec![CartLine::new(&product.id, 2, 10_000)],
                    payment_method: PaymentMethod::Deferred,
                    subtotal_cents: 20_000,
                    tax_cents: 0,
                    total_cents: 20_000,
                    notes: None,
                    idempotency_key: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let stored = engine.db().products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 20);
        assert!(engine.db().credit().list_by_store(&store.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_soft_limit_flags_the_event() {
        let config = EngineConfig {
            default_credit_limit_cents: 15_000,
            ..EngineConfig::default()
        };
        let engine = engine_with(config).await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let product = seed_product(&engine, &store.id, "Cemento 50kg", 10_000, 20).await;

        deferred_sale(&engine, &store, &customer, &product.id, 2).await;

        let events = engine.db().outbox().list_by_store(&store.id, 20).await.unwrap();
        let charge = events
            .iter()
            .find(|e| e.event_type == EventType::CreditCharge)
            .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&charge.payload).unwrap();
        assert_eq!(payload["over_limit"], true);
        assert_eq!(payload["balance_cents"], 20_000);

        let account = engine.active_account(OWNER, &store.id, &customer.id).await.unwrap().unwrap();
        let statement = engine.account_statement(OWNER, &account.id).await.unwrap();
        assert!(statement.over_limit);
    }

    #[tokio::test]
    async fn test_close_requires_zero_balance() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let product = seed_product(&engine, &store.id, "Cemento 50kg", 10_000, 20).await;
        deferred_sale(&engine, &store, &customer, &product.id, 1).await;
        let account = engine.active_account(OWNER, &store.id, &customer.id).await.unwrap().unwrap();

        let err = engine.close_account(OWNER, &account.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        engine
            .register_payment(
                OWNER,
                PaymentRequest {
                    account_id: account.id.clone(),
                    amount_cents: 10_000,
                    method: PaymentMethod::Cash,
                    notes: None,
                },
            )
            .await
            .unwrap();

        let closed = engine.close_account(OWNER, &account.id).await.unwrap();
        assert_eq!(closed.status, CreditAccountStatus::Closed);
        assert_eq!(closed.standing(Utc::now()), CreditStanding::Closed);

        let err = engine
            .register_payment(
                OWNER,
                PaymentRequest {
                    account_id: account.id.clone(),
                    amount_cents: 100,
                    method: PaymentMethod::Cash,
                    notes: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // next deferred sale opens a fresh account
        deferred_sale(&engine, &store, &customer, &product.id, 1).await;
        let fresh = engine.active_account(OWNER, &store.id, &customer.id).await.unwrap().unwrap();
        assert_ne!(fresh.id, account.id);
    }
}
