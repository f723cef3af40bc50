//! # Domain Types
//!
//! Core domain types used throughout Tendero.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │    Product      │   │      Sale       │   │  InventoryMovement  │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  quantity       │◄──│  lines          │──►│  IN / OUT           │   │
//! │  │  state          │   │  status         │   │  stock_before/after │   │
//! │  │  price / cost   │   │  payment_method │   │  (append-only)      │   │
//! │  └─────────────────┘   └────────┬────────┘   └─────────────────────┘   │
//! │                                 │ deferred                              │
//! │                                 ▼                                       │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │    Customer     │   │  CreditAccount  │   │ CreditCharge /      │   │
//! │  │  ─────────────  │   │  ─────────────  │   │ CreditPayment       │   │
//! │  │  purchase stats │   │  balance, limit │◄──│ (append-only)       │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entities use UUID v4 string ids, except inventory movements which use an
//! autoincrement integer so that insertion order breaks timestamp ties.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so 1500 bps = 15%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Store
// =============================================================================

/// A retail store. Every product, sale and credit account belongs to one.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Store {
    pub id: String,
    pub name: String,
    /// Default tax rate for carts built by the UI, in basis points.
    pub tax_rate_bps: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Store {
    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps.clamp(0, u32::MAX as i64) as u32)
    }
}

// =============================================================================
// Product
// =============================================================================

/// Lifecycle state of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ProductState {
    Active,
    /// Soft-deleted. Never sold again, kept for history.
    Inactive,
    OutOfStock,
}

impl ProductState {
    /// State after the stock level changes to `quantity`.
    ///
    /// Inactive products stay inactive; everything else follows the stock.
    pub fn after_stock_change(self, quantity: i64) -> Self {
        match self {
            ProductState::Inactive => ProductState::Inactive,
            _ if quantity <= 0 => ProductState::OutOfStock,
            _ => ProductState::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductState::Active => "active",
            ProductState::Inactive => "inactive",
            ProductState::OutOfStock => "out_of_stock",
        }
    }
}

/// A product available for sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub category: String,
    /// Selling price in cents.
    pub price_cents: i64,
    /// Purchase cost in cents.
    pub cost_cents: i64,
    /// Current stock. Written only by the inventory ledger.
    pub quantity: i64,
    pub state: ProductState,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    #[inline]
    pub fn cost(&self) -> Money {
        Money::from_cents(self.cost_cents)
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.state == ProductState::Inactive
    }

    /// Checks if `quantity` units can be taken from stock.
    pub fn can_sell(&self, quantity: i64) -> bool {
        !self.is_deleted() && self.quantity >= quantity
    }
}

// =============================================================================
// Sale
// =============================================================================

/// The status of a sale or online order.
///
/// See [`crate::lifecycle`] for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Online order waiting for the store to confirm or reject it.
    Pending,
    Completed,
    Cancelled,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Completed => "completed",
            SaleStatus::Cancelled => "cancelled",
        }
    }
}

/// Where the sale originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleChannel {
    /// Counter sale, completed synchronously.
    Pos,
    /// Store-to-customer order, pending until confirmed or rejected.
    Online,
}

impl SaleChannel {
    /// Status a new sale starts in.
    pub fn initial_status(&self) -> SaleStatus {
        match self {
            SaleChannel::Pos => SaleStatus::Completed,
            SaleChannel::Online => SaleStatus::Pending,
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    /// Fiado: the customer owes the store and pays later.
    Deferred,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Deferred => "deferred",
        }
    }
}

/// A sale transaction or online order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub store_id: String,
    pub customer_id: Option<String>,
    /// Cashier or user who submitted the sale.
    pub user_id: String,
    pub channel: SaleChannel,
    pub payment_method: PaymentMethod,
    pub status: SaleStatus,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
    pub cancel_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// `total == subtotal + tax`.
    pub fn totals_consistent(&self) -> bool {
        self.total_cents == self.subtotal_cents + self.tax_cents
    }
}

/// A line item in a sale. The product name is frozen at sale time.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleLineItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub name_snapshot: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// `quantity × unit_price_cents`.
    pub line_subtotal_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SaleLineItem {
    #[inline]
    pub fn line_subtotal(&self) -> Money {
        Money::from_cents(self.line_subtotal_cents)
    }
}

// =============================================================================
// Inventory Movement
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    /// Stock added (ENTRADA).
    In,
    /// Stock removed (SALIDA).
    Out,
}

impl MovementType {
    /// The movement type that undoes this one.
    pub fn opposite(&self) -> Self {
        match self {
            MovementType::In => MovementType::Out,
            MovementType::Out => MovementType::In,
        }
    }

    /// Signed stock delta for `quantity` units.
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            MovementType::In => quantity,
            MovementType::Out => -quantity,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
        }
    }
}

/// One append-only entry of the inventory ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InventoryMovement {
    pub id: i64,
    pub product_id: String,
    pub store_id: String,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub stock_before: i64,
    pub stock_after: i64,
    pub reason: String,
    pub sale_id: Option<String>,
    /// Set on compensating movements.
    pub reverses_movement_id: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    /// `stock_after == stock_before ± quantity` according to the type.
    pub fn is_consistent(&self) -> bool {
        self.quantity > 0
            && self.stock_after >= 0
            && self.stock_after == self.stock_before + self.movement_type.signed(self.quantity)
    }
}

// =============================================================================
// Customer
// =============================================================================

/// A store customer with running purchase statistics.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub total_purchase_cents: i64,
    pub purchase_count: i64,
    #[ts(as = "Option<String>")]
    pub last_purchase_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Credit
// =============================================================================

/// Persisted status of a credit account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CreditAccountStatus {
    Active,
    Closed,
}

impl CreditAccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditAccountStatus::Active => "active",
            CreditAccountStatus::Closed => "closed",
        }
    }
}

/// Status derived at read time, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CreditStanding {
    Active,
    Overdue,
    Paid,
    Closed,
}

/// A customer's deferred-payment account at one store.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditAccount {
    pub id: String,
    pub customer_id: String,
    pub store_id: String,
    pub credit_limit_cents: i64,
    /// `Σ charges − Σ payments`.
    pub current_balance_cents: i64,
    pub status: CreditAccountStatus,
    #[ts(as = "Option<String>")]
    pub due_date: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    #[inline]
    pub fn balance(&self) -> Money {
        Money::from_cents(self.current_balance_cents)
    }

    #[inline]
    pub fn limit(&self) -> Money {
        Money::from_cents(self.credit_limit_cents)
    }

    /// Derived status at `now`: overdue, paid or active.
    pub fn standing(&self, now: DateTime<Utc>) -> CreditStanding {
        if self.status == CreditAccountStatus::Closed {
            return CreditStanding::Closed;
        }
        if self.current_balance_cents == 0 {
            return CreditStanding::Paid;
        }
        match self.due_date {
            Some(due) if due < now && self.current_balance_cents > 0 => CreditStanding::Overdue,
            _ => CreditStanding::Active,
        }
    }

    /// Whether the balance is above the configured limit.
    pub fn is_over_limit(&self) -> bool {
        self.current_balance_cents > self.credit_limit_cents
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CreditChargeKind {
    /// Deferred sale total added to the balance.
    Charge,
    /// Compensation for a rejected order; amount is negative.
    Reversal,
}

/// The charge side of the credit ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditCharge {
    pub id: String,
    pub account_id: String,
    pub sale_id: String,
    pub kind: CreditChargeKind,
    /// Signed amount in cents.
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A payment towards a credit account.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditPayment {
    pub id: String,
    pub account_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Notification Events
// =============================================================================

/// Events published to the notification dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SaleCompleted,
    NewProduct,
    PriceDecreased,
    PriceIncreased,
    ProductDeleted,
    CreditCharge,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SaleCompleted => "sale_completed",
            EventType::NewProduct => "new_product",
            EventType::PriceDecreased => "price_decreased",
            EventType::PriceIncreased => "price_increased",
            EventType::ProductDeleted => "product_deleted",
            EventType::CreditCharge => "credit_charge",
        }
    }
}

/// An entry in the notification outbox.
///
/// Written in the same transaction as the change it describes; delivered
/// later by the relay. Delivery failures only touch `attempts`/`last_error`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct NotificationEvent {
    pub id: String,
    pub store_id: String,
    pub event_type: EventType,
    /// JSON payload with the minimal fields for a human-readable message.
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub dispatched_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Unit Tests
// =============================================================================
