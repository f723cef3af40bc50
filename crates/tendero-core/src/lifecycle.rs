//! # Lifecycle Transition Tables
//!
//! Explicit state machines for sales/orders and credit accounts. The
//! database layer applies a transition with a conditional `UPDATE`; these
//! tables decide which transitions exist at all and produce the error the
//! caller sees when one is refused.
//!
//! ## Order State Machine
//! ```text
//!                  confirm
//!   ┌─────────┐ ───────────► ┌───────────┐
//!   │ PENDING │              │ COMPLETED │  (terminal)
//!   └─────────┘ ───────────► └───────────┘
//!        │         reject
//!        │                   ┌───────────┐
//!        └──────────────────►│ CANCELLED │  (terminal)
//!                            └───────────┘
//!
//!   POS sales are born COMPLETED and never pass through PENDING.
//! ```
//!
//! ## Credit Account State Machine
//! ```text
//!   ┌────────┐  charge / pay   ┌────────┐
//!   │ ACTIVE │ ◄──────────────►│ ACTIVE │
//!   └───┬────┘                 └────────┘
//!       │ close (balance == 0)
//!       ▼
//!   ┌────────┐
//!   │ CLOSED │  (terminal; the next deferred sale opens a new account)
//!   └────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{CreditAccount, CreditAccountStatus, Sale, SaleChannel, SaleStatus};

// =============================================================================
// Order Transitions
// =============================================================================

/// Actions that move an online order out of `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Confirm,
    Reject,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Confirm => "confirm",
            OrderAction::Reject => "reject",
        }
    }
}

/// Target state for `action` from `(channel, status)`, or `None` if the
/// table has no such edge.
pub fn order_transition(
    channel: SaleChannel,
    status: SaleStatus,
    action: OrderAction,
) -> Option<SaleStatus> {
    match (channel, status, action) {
        (SaleChannel::Online, SaleStatus::Pending, OrderAction::Confirm) => {
            Some(SaleStatus::Completed)
        }
        (SaleChannel::Online, SaleStatus::Pending, OrderAction::Reject) => {
            Some(SaleStatus::Cancelled)
        }
        _ => None,
    }
}

/// Checks that `action` is allowed on `sale`.
///
/// ```rust
/// use tendero_core::lifecycle::{check_order_transition, OrderAction};
/// # use tendero_core::types::*;
/// # let mut sale = Sale {
/// #     id: "s1".into(), store_id: "st".into(), customer_id: None, user_id: "u".into(),
/// #     channel: SaleChannel::Online, payment_method: PaymentMethod::Cash,
/// #     status: SaleStatus::Pending, subtotal_cents: 100, tax_cents: 0, total_cents: 100,
/// #     notes: None, idempotency_key: None, cancel_reason: None,
/// #     created_at: chrono::Utc::now(), completed_at: None, cancelled_at: None,
/// # };
/// assert!(check_order_transition(&sale, OrderAction::Confirm).is_ok());
///
/// sale.status = SaleStatus::Cancelled;
/// assert!(check_order_transition(&sale, OrderAction::Confirm).is_err());
/// ```
pub fn check_order_transition(sale: &Sale, action: OrderAction) -> CoreResult<SaleStatus> {
    order_transition(sale.channel, sale.status, action).ok_or_else(|| {
        CoreError::InvalidTransition {
            entity: "Order",
            id: sale.id.clone(),
            from: describe_sale(sale),
            action: action.as_str(),
        }
    })
}

fn describe_sale(sale: &Sale) -> String {
    match sale.channel {
        SaleChannel::Pos => format!("a {} point-of-sale sale", sale.status.as_str()),
        SaleChannel::Online => sale.status.as_str().to_string(),
    }
}

// =============================================================================
// Credit Account Transitions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditAction {
    Charge,
    Pay,
    Close,
}

impl CreditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditAction::Charge => "charge",
            CreditAction::Pay => "register payment",
            CreditAction::Close => "close",
        }
    }
}

/// Checks that `action` is allowed on `account`.
///
/// Closing additionally requires a zero balance.
pub fn check_credit_transition(
    account: &CreditAccount,
    action: CreditAction,
) -> CoreResult<CreditAccountStatus> {
    let refused = |from: String| CoreError::InvalidTransition {
        entity: "Credit account",
        id: account.id.clone(),
        from,
        action: action.as_str(),
    };

    match (account.status, action) {
        (CreditAccountStatus::Closed, _) => Err(refused("closed".to_string())),
        (CreditAccountStatus::Active, CreditAction::Close) if account.current_balance_cents != 0 => {
            Err(refused(format!(
                "active with balance {}",
                account.balance()
            )))
        }
        (CreditAccountStatus::Active, CreditAction::Close) => Ok(CreditAccountStatus::Closed),
        (CreditAccountStatus::Active, _) => Ok(CreditAccountStatus::Active),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaymentMethod;
    use chrono::Utc;

    fn sale(channel: SaleChannel, status: SaleStatus) -> Sale {
        Sale {
            id: "sale-1".to_string(),
            store_id: "store".to_string(),
            customer_id: None,
            user_id: "user".to_string(),
            channel,
            payment_method: PaymentMethod::Cash,
            status,
            subtotal_cents: 1000,
            tax_cents: 0,
            total_cents: 1000,
            notes: None,
            idempotency_key: None,
            cancel_reason: None,
            created_at: Utc::now(),
            completed_at: None,
            cancelled_at: None,
        }
    }

    fn account(status: CreditAccountStatus, balance: i64) -> CreditAccount {
        let now = Utc::now();
        CreditAccount {
            id: "acc-1".to_string(),
            customer_id: "cust".to_string(),
            store_id: "store".to_string(),
            credit_limit_cents: 50_000,
            current_balance_cents: balance,
            status,
            due_date: None,
            opened_at: now,
            closed_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_pending_order_transitions() {
        let pending = sale(SaleChannel::Online, SaleStatus::Pending);
        assert_eq!(
            check_order_transition(&pending, OrderAction::Confirm).unwrap(),
            SaleStatus::Completed
        );
        assert_eq!(
            check_order_transition(&pending, OrderAction::Reject).unwrap(),
            SaleStatus::Cancelled
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        for status in [SaleStatus::Completed, SaleStatus::Cancelled] {
            for action in [OrderAction::Confirm, OrderAction::Reject] {
                assert!(order_transition(SaleChannel::Online, status, action).is_none());
            }
        }
    }

    #[test]
    fn test_pos_sale_cannot_be_rejected() {
        let pos = sale(SaleChannel::Pos, SaleStatus::Completed);
        let err = check_order_transition(&pos, OrderAction::Reject).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Order sale-1 is a completed point-of-sale sale, cannot reject"
        );
    }

    #[test]
    fn test_credit_close_requires_zero_balance() {
        assert!(check_credit_transition(&account(CreditAccountStatus::Active, 300), CreditAction::Close).is_err());
        assert_eq!(
            check_credit_transition(&account(CreditAccountStatus::Active, 0), CreditAction::Close).unwrap(),
            CreditAccountStatus::Closed
        );
    }

    #[test]
    fn test_closed_account_refuses_everything() {
        let closed = account(CreditAccountStatus::Closed, 0);
        for action in [CreditAction::Charge, CreditAction::Pay, CreditAction::Close] {
            assert!(check_credit_transition(&closed, action).is_err());
        }
    }
}
