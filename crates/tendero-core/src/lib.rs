//! # tendero-core: Pure Business Logic for Tendero
//!
//! The rules of the sales and credit-ledger engine as pure functions with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tendero Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Callers (POS UI, online shop, back office)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tendero-engine                               │   │
//! │  │   create_sale, register_payment, confirm_order, rotation ...   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ tendero-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌───────────┐ ┌────────┐ │   │
//! │  │   │  types  │ │  money  │ │  cart   │ │ lifecycle │ │  auth  │ │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └───────────┘ └────────┘ │   │
//! │  │   ┌────────────┐ ┌───────────┐                                 │   │
//! │  │   │ validation │ │ analytics │                                 │   │
//! │  │   └────────────┘ └───────────┘                                 │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  tendero-db (Database Layer)                    │   │
//! │  │              SQLite queries, migrations, repositories           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Sale, InventoryMovement, CreditAccount, etc.)
//! - [`money`] - Money type with integer arithmetic
//! - [`cart`] - Cart totals and tamper checks
//! - [`lifecycle`] - Transition tables for orders and credit accounts
//! - [`auth`] - Store roles and the permission matrix
//! - [`analytics`] - Read models replayed from ledger history
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use tendero_core::cart::{CartLine, CartTotals};
//! use tendero_core::types::TaxRate;
//!
//! let lines = vec![CartLine::new("p1", 2, 2500), CartLine::new("p2", 1, 3000)];
//! let totals = CartTotals::compute(&lines, TaxRate::from_bps(1500));
//!
//! assert_eq!(totals.total().to_string(), "92.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod analytics;
pub mod auth;
pub mod cart;
pub mod error;
pub mod lifecycle;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use auth::{Permission, Role};
pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single cart.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single line or movement.
pub const MAX_ITEM_QUANTITY: i64 = 9_999;

/// Largest price, cost or tax amount accepted, in cents (100,000,000.00).
pub const MAX_PRICE_CENTS: i64 = 10_000_000_000;

/// Reason recorded on the OUT movements a sale or order makes.
pub const SALE_MOVEMENT_REASON: &str = "sale";

/// Days without a sale before a product is reported as stagnant.
pub const DEFAULT_STAGNANT_DAYS: i64 = 14;
