//! # Repository Module
//!
//! Database repository implementations for Tendero.
//!
//! ## Read/Write Split
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Reads:   repo.get_by_id(&self, id)            → pool connection       │
//! │  Writes:  repo.decrement_stock(&self, conn, …) → caller's transaction  │
//! │                                                                         │
//! │  Writes never commit on their own. The engine opens one transaction    │
//! │  per operation and passes it to every repository involved, so a sale   │
//! │  with N lines, a credit charge and an outbox event commits or rolls    │
//! │  back as a unit.                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StoreRepository`](store::StoreRepository) - Stores and members
//! - [`CustomerRepository`](customer::CustomerRepository) - Customers and purchase stats
//! - [`ProductRepository`](product::ProductRepository) - Products and conditional stock updates
//! - [`InventoryRepository`](inventory::InventoryRepository) - Movement ledger
//! - [`SaleRepository`](sale::SaleRepository) - Sales, orders and line items
//! - [`CreditRepository`](credit::CreditRepository) - Credit accounts, charges, payments
//! - [`OutboxRepository`](outbox::OutboxRepository) - Notification outbox
//! - [`ReportRepository`](report::ReportRepository) - History for read models

pub mod credit;
pub mod customer;
pub mod inventory;
pub mod outbox;
pub mod product;
pub mod report;
pub mod sale;
pub mod store;
