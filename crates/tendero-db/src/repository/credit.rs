//! # Credit Repository
//!
//! Credit accounts and their append-only charge and payment ledgers.
//!
//! ## Balance Invariant
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  current_balance_cents == Σ credit_charges.amount_cents                 │
//! │                         − Σ credit_payments.amount_cents                │
//! │                                                                         │
//! │  Every balance change is one delta UPDATE paired with one ledger        │
//! │  INSERT in the same transaction. Reversals are negative charges.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use tendero_core::{CreditAccount, CreditCharge, CreditChargeKind, CreditPayment, PaymentMethod};

const ACCOUNT_COLUMNS: &str = r#"
    id, customer_id, store_id, credit_limit_cents, current_balance_cents,
    status, due_date, opened_at, closed_at, updated_at
"#;

/// Balance snapshot after a delta update.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BalanceChange {
    pub account_id: String,
    pub balance_cents: i64,
    pub credit_limit_cents: i64,
}

#[derive(Debug, Clone)]
pub struct CreditRepository {
    pool: SqlitePool,
}

impl CreditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CreditRepository { pool }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CreditAccount>> {
        let account = sqlx::query_as::<_, CreditAccount>(&format!(
            "SELECT {} FROM credit_accounts WHERE id = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn get_by_id_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<CreditAccount>> {
        let account = sqlx::query_as::<_, CreditAccount>(&format!(
            "SELECT {} FROM credit_accounts WHERE id = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(account)
    }

    /// The active account of a customer at a store.
    pub async fn find_active(&self, customer_id: &str, store_id: &str) -> DbResult<Option<CreditAccount>> {
        let account = sqlx::query_as::<_, CreditAccount>(&format!(
            "SELECT {} FROM credit_accounts WHERE customer_id = ?1 AND store_id = ?2 AND status = 'active'",
            ACCOUNT_COLUMNS
        ))
        .bind(customer_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Accounts of a store, active first.
    pub async fn list_by_store(&self, store_id: &str) -> DbResult<Vec<CreditAccount>> {
        let accounts = sqlx::query_as::<_, CreditAccount>(&format!(
            "SELECT {} FROM credit_accounts WHERE store_id = ?1 ORDER BY status, opened_at, id",
            ACCOUNT_COLUMNS
        ))
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    /// Opens a new active account with the given opening balance.
    ///
    /// Fails with a unique violation on `credit_accounts.customer_id` if the
    /// customer already has an active account at the store.
    pub async fn open(&self, conn: &mut SqliteConnection, account: &CreditAccount) -> DbResult<()> {
        debug!(id = %account.id, customer_id = %account.customer_id, "Opening credit account");

        sqlx::query(
            r#"
            INSERT INTO credit_accounts (
                id, customer_id, store_id, credit_limit_cents, current_balance_cents,
                status, due_date, opened_at, closed_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&account.id)
        .bind(&account.customer_id)
        .bind(&account.store_id)
        .bind(account.credit_limit_cents)
        .bind(account.current_balance_cents)
        .bind(account.status)
        .bind(account.due_date)
        .bind(account.opened_at)
        .bind(account.closed_at)
        .bind(account.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Adds `amount_cents` to the customer's active account.
    ///
    /// Returns `None` when the customer has no active account at the store.
    pub async fn add_to_active_balance(
        &self,
        conn: &mut SqliteConnection,
        customer_id: &str,
        store_id: &str,
        amount_cents: i64,
        at: DateTime<Utc>,
    ) -> DbResult<Option<BalanceChange>> {
        debug!(customer_id = %customer_id, amount = %amount_cents, "Charging active credit account");

        let change = sqlx::query_as::<_, BalanceChange>(
            r#"
            UPDATE credit_accounts SET
                current_balance_cents = current_balance_cents + ?3,
                updated_at = ?4
            WHERE customer_id = ?1 AND store_id = ?2 AND status = 'active'
            RETURNING id AS account_id, current_balance_cents AS balance_cents, credit_limit_cents
            "#,
        )
        .bind(customer_id)
        .bind(store_id)
        .bind(amount_cents)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(change)
    }

    /// Applies a signed delta to one account regardless of its status.
    ///
    /// Used by compensations, which must land on the account that was
    /// charged even if it has been closed since.
    pub async fn adjust_balance(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        delta_cents: i64,
        at: DateTime<Utc>,
    ) -> DbResult<Option<BalanceChange>> {
        debug!(account_id = %account_id, delta = %delta_cents, "Adjusting credit balance");

        let change = sqlx::query_as::<_, BalanceChange>(
            r#"
            UPDATE credit_accounts SET
                current_balance_cents = current_balance_cents + ?2,
                updated_at = ?3
            WHERE id = ?1
            RETURNING id AS account_id, current_balance_cents AS balance_cents, credit_limit_cents
            "#,
        )
        .bind(account_id)
        .bind(delta_cents)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(change)
    }

    /// Subtracts a payment from an active account.
    ///
    /// With `allow_overpayment == false` the update only matches while the
    /// balance covers the amount. Returns `None` if nothing matched: unknown
    /// id, closed account, or (when disallowed) an overpayment.
    pub async fn subtract_payment(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        amount_cents: i64,
        allow_overpayment: bool,
        at: DateTime<Utc>,
    ) -> DbResult<Option<BalanceChange>> {
        debug!(account_id = %account_id, amount = %amount_cents, "Applying credit payment");

        let change = sqlx::query_as::<_, BalanceChange>(
            r#"
            UPDATE credit_accounts SET
                current_balance_cents = current_balance_cents - ?2,
                updated_at = ?4
            WHERE id = ?1
              AND status = 'active'
              AND (?3 OR current_balance_cents >= ?2)
            RETURNING id AS account_id, current_balance_cents AS balance_cents, credit_limit_cents
            "#,
        )
        .bind(account_id)
        .bind(amount_cents)
        .bind(allow_overpayment)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(change)
    }

    /// Closes an active account with a zero balance.
    ///
    /// Returns `false` when the account is unknown, already closed, or still
    /// owes money.
    pub async fn close(&self, conn: &mut SqliteConnection, account_id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        debug!(account_id = %account_id, "Closing credit account");

        let result = sqlx::query(
            r#"
            UPDATE credit_accounts SET status = 'closed', closed_at = ?2, updated_at = ?2
            WHERE id = ?1 AND status = 'active' AND current_balance_cents = 0
            "#,
        )
        .bind(account_id)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Ledgers
    // =========================================================================

    pub async fn insert_charge(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        sale_id: &str,
        kind: CreditChargeKind,
        amount_cents: i64,
        at: DateTime<Utc>,
    ) -> DbResult<CreditCharge> {
        let charge = CreditCharge {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            sale_id: sale_id.to_string(),
            kind,
            amount_cents,
            created_at: at,
        };

        sqlx::query(
            r#"
            INSERT INTO credit_charges (id, account_id, sale_id, kind, amount_cents, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&charge.id)
        .bind(&charge.account_id)
        .bind(&charge.sale_id)
        .bind(charge.kind)
        .bind(charge.amount_cents)
        .bind(charge.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(charge)
    }

    pub async fn insert_payment(
        &self,
        conn: &mut SqliteConnection,
        account_id: &str,
        amount_cents: i64,
        method: PaymentMethod,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> DbResult<CreditPayment> {
        let payment = CreditPayment {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            amount_cents,
            method,
            notes: notes.map(str::to_string),
            created_at: at,
        };

        sqlx::query(
            r#"
            INSERT INTO credit_payments (id, account_id, amount_cents, method, notes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.account_id)
        .bind(payment.amount_cents)
        .bind(payment.method)
        .bind(&payment.notes)
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(payment)
    }

    /// Charges posted for a sale that have not been reversed yet.
    pub async fn open_charges_for_sale(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<Vec<CreditCharge>> {
        let charges = sqlx::query_as::<_, CreditCharge>(
            r#"
            SELECT c.id, c.account_id, c.sale_id, c.kind, c.amount_cents, c.created_at
            FROM credit_charges c
            WHERE c.sale_id = ?1
              AND c.kind = 'charge'
              AND NOT EXISTS (
                  SELECT 1 FROM credit_charges r
                  WHERE r.sale_id = c.sale_id AND r.account_id = c.account_id AND r.kind = 'reversal'
              )
            ORDER BY c.created_at, c.id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(charges)
    }

    pub async fn list_charges(&self, account_id: &str) -> DbResult<Vec<CreditCharge>> {
        let charges = sqlx::query_as::<_, CreditCharge>(
            r#"
            SELECT id, account_id, sale_id, kind, amount_cents, created_at
            FROM credit_charges
            WHERE account_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(charges)
    }

    pub async fn list_payments(&self, account_id: &str) -> DbResult<Vec<CreditPayment>> {
        let payments = sqlx::query_as::<_, CreditPayment>(
            r#"
            SELECT id, account_id, amount_cents, method, notes, created_at
            FROM credit_payments
            WHERE account_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    /// `Σ charges − Σ payments` recomputed from the ledgers.
    pub async fn ledger_balance(&self, account_id: &str) -> DbResult<i64> {
        let balance: i64 = sqlx::query_scalar(
            r#"
            SELECT
                (SELECT COALESCE(SUM(amount_cents), 0) FROM credit_charges WHERE account_id = ?1)
              - (SELECT COALESCE(SUM(amount_cents), 0) FROM credit_payments WHERE account_id = ?1)
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }
}

/// Generates a new credit account ID.
pub fn generate_account_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{seed_customer, seed_store, test_db};
    use tendero_core::CreditAccountStatus;

    fn new_account(customer_id: &str, store_id: &str, balance: i64) -> CreditAccount {
        let now = Utc::now();
        CreditAccount {
            id: generate_account_id(),
            customer_id: customer_id.to_string(),
            store_id: store_id.to_string(),
            credit_limit_cents: 50_000,
            current_balance_cents: balance,
            status: CreditAccountStatus::Active,
            due_date: None,
            opened_at: now,
            closed_at: None,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_one_active_account_per_customer() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let customer = seed_customer(&db, &store.id).await;
        let repo = db.credit();

        let mut tx = db.begin().await.unwrap();
        repo.open(&mut tx, &new_account(&customer.id, &store.id, 0)).await.unwrap();
        let err = repo
            .open(&mut tx, &new_account(&customer.id, &store.id, 0))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("credit_accounts.customer_id"));
    }

    #[tokio::test]
    async fn test_overpayment_guard() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let customer = seed_customer(&db, &store.id).await;
        let repo = db.credit();
        let account = new_account(&customer.id, &store.id, 300);
        let now = Utc::now();

        let mut tx = db.begin().await.unwrap();
        repo.open(&mut tx, &account).await.unwrap();

        assert!(repo
            .subtract_payment(&mut tx, &account.id, 400, false, now)
            .await
            .unwrap()
            .is_none());

        let change = repo
            .subtract_payment(&mut tx, &account.id, 300, false, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.balance_cents, 0);

        let change = repo
            .subtract_payment(&mut tx, &account.id, 50, true, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.balance_cents, -50);
    }

    #[tokio::test]
    async fn test_close_requires_zero_balance() {
        let db = test_db().await;
        let store = seed_store(&db).await;
        let customer = seed_customer(&db, &store.id).await;
        let repo = db.credit();
        let account = new_account(&customer.id, &store.id, 100);
        let now = Utc::now();

        let mut tx = db.begin().await.unwrap();
        repo.open(&mut tx, &account).await.unwrap();
        assert!(!repo.close(&mut tx, &account.id, now).await.unwrap());

        repo.subtract_payment(&mut tx, &account.id, 100, false, now)
            .await
            .unwrap();
        assert!(repo.close(&mut tx, &account.id, now).await.unwrap());
        assert!(repo
            .subtract_payment(&mut tx, &account.id, 1, true, now)
            .await
            .unwrap()
            .is_none());
    }
}
