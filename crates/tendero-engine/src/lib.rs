//! # tendero-engine: Sales Transaction and Credit-Ledger Engine
//!
//! Orchestrates every state change of a small retail store: point-of-sale
//! sales, online orders, stock movements, deferred-payment credit and the
//! notifications they produce.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        tendero-engine                                   │
//! │                                                                         │
//! │  caller ──► Engine::create_sale(user, request)                          │
//! │               │                                                         │
//! │               ├─ authorize (role matrix, once)                          │
//! │               ├─ validate (tendero-core, no I/O)                        │
//! │               ├─ pre-reads through the pool (store, customer, replay)  │
//! │               │                                                         │
//! │               ▼                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 ONE DATABASE TRANSACTION                        │   │
//! │  │                                                                 │   │
//! │  │  INSERT sale ─► per line: stock CAS + OUT movement + line item │   │
//! │  │             ─► deferred: credit charge                         │   │
//! │  │             ─► customer statistics                             │   │
//! │  │             ─► outbox event                                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │               │                                                         │
//! │               ▼                                                         │
//! │  COMMIT (all of it) or DROP (none of it)                                │
//! │                                                                         │
//! │  OutboxRelay ──► NotificationSink   (separately, best effort)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`sale`] - Sale aggregator (`create_sale`, `place_order`)
//! - [`inventory`] - Inventory ledger (`apply_movement`, `reverse_movement`)
//! - [`credit`] - Credit accounts (`register_payment`, `close_account`, statements)
//! - [`customer`] - Customer registration and purchase statistics
//! - [`order`] - Online order lifecycle (`confirm_order`, `reject_order`)
//! - [`catalog`] - Stores, members and products
//! - [`reports`] - Analytics read models
//! - [`notify`] - Outbox relay and notification sinks
//! - [`config`] / [`error`] / [`telemetry`] - Ambient concerns
//!
//! ## Transactions
//! While a transaction is open an operation never touches the pool: an
//! in-memory database has a single connection, and a file database would
//! read outside the transaction's snapshot. Everything needed from outside
//! the transaction is read before `begin()`.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod catalog;
pub mod config;
pub mod credit;
pub mod customer;
pub mod error;
pub mod inventory;
pub mod notify;
pub mod order;
pub mod reports;
pub mod sale;
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use catalog::NewProduct;
pub use config::{ConfigError, CreditLimitPolicy, EngineConfig, OverpaymentPolicy};
pub use credit::{AccountStatement, PaymentReceipt, PaymentRequest};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use inventory::MovementRequest;
pub use notify::{NotificationSink, NotifyError, OutboxRelay, RelayReport, TracingSink};
pub use sale::SaleRequest;

use tendero_db::Database;

// =============================================================================
// Engine
// =============================================================================

/// Entry point for every operation.
///
/// Cheap to clone: the database handle is a pool.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Database,
    config: EngineConfig,
}

impl Engine {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        Engine { db, config }
    }

    /// Opens the database described by `config` and runs migrations.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        let db = Database::new(config.db_config()).await?;
        Ok(Engine::new(db, config))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use tendero_core::{Customer, Product, Store};
    use tendero_db::{Database, DbConfig};

    use crate::catalog::NewProduct;
    use crate::{Engine, EngineConfig};

    pub const OWNER: &str = "owner-1";

    pub async fn engine() -> Engine {
        engine_with(EngineConfig::default()).await
    }

    pub async fn engine_with(config: EngineConfig) -> Engine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Engine::new(db, config)
    }

    /// A store taxed at 15% owned by [`OWNER`].
    pub async fn seed_store(engine: &Engine) -> Store {
        engine
            .register_store(OWNER, "Abarrotes Don Pepe", 1500)
            .await
            .unwrap()
    }

    pub async fn seed_product(
        engine: &Engine,
        store_id: &str,
        name: &str,
        price_cents: i64,
        stock: i64,
    ) -> Product {
        engine
            .create_product(
                OWNER,
                NewProduct {
                    store_id: store_id.to_string(),
                    name: name.to_string(),
                    category: "Abarrotes".to_string(),
                    price_cents,
                    cost_cents: price_cents / 2,
                    initial_stock: stock,
                },
            )
            .await
            .unwrap()
    }

    pub async fn seed_customer(engine: &Engine, store_id: &str) -> Customer {
        engine
            .register_customer(OWNER, store_id, "María López", Some("555-0101"))
            .await
            .unwrap()
    }
}
