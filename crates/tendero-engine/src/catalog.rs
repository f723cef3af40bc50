//! # Catalog
//!
//! Stores, their members and their products.
//!
//! A product is born with zero stock; its opening quantity is booked as an
//! `IN` movement ("initial stock") in the same transaction, so the ledger
//! explains every unit from day one. Price changes and deletions are
//! guarded by the product's `version` column and each emits a catalog event.
//!
//! | Operation        | Event                                   |
//! |------------------|-----------------------------------------|
//! | `create_product` | `new_product`                           |
//! | `update_price`   | `price_decreased` / `price_increased`   |
//! | `delete_product` | `product_deleted`                       |

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use tendero_core::validation::{
    validate_category, validate_display_name, validate_price_cents, validate_product_name,
    validate_quantity, validate_tax_rate_bps,
};
use tendero_core::{EventType, Permission, Product, ProductState, Role, Store};
use tendero_db::repository::product::generate_product_id;

const INITIAL_STOCK_REASON: &str = "initial stock";

/// Input for [`Engine::create_product`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub store_id: String,
    pub name: String,
    pub category: String,
    pub price_cents: i64,
    pub cost_cents: i64,
    /// Units on the shelf when the product is created. May be zero.
    pub initial_stock: i64,
}

#[derive(Debug, Serialize)]
struct ProductEventPayload<'a> {
    store_name: &'a str,
    product_id: &'a str,
    product_name: &'a str,
    price_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_price_cents: Option<i64>,
}

impl Engine {
    // =========================================================================
    // Stores and members
    // =========================================================================

    /// Creates a store owned by `owner_user_id`.
    #[instrument(skip(self))]
    pub async fn register_store(&self, owner_user_id: &str, name: &str, tax_rate_bps: i64) -> EngineResult<Store> {
        validate_display_name(name)?;
        validate_tax_rate_bps(tax_rate_bps)?;

        let store = Store {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            tax_rate_bps,
            created_at: Utc::now(),
        };

        self.db.stores().insert(&store).await?;
        self.db
            .stores()
            .upsert_member(&store.id, owner_user_id, Role::Owner)
            .await?;

        info!(store_id = %store.id, "Store registered");

        Ok(store)
    }

    /// Adds `member_user_id` to the store, or changes their role.
    ///
    /// Only an owner may hand out the owner role.
    #[instrument(skip(self, user_id))]
    pub async fn add_member(
        &self,
        user_id: &str,
        store_id: &str,
        member_user_id: &str,
        role: Role,
    ) -> EngineResult<()> {
        let granter = self
            .authorize(store_id, user_id, Permission::ManageMembers)
            .await?;

        if role == Role::Owner && granter != Role::Owner {
            return Err(EngineError::Unauthorized {
                user_id: user_id.to_string(),
                store_id: store_id.to_string(),
                action: "grant the owner role",
            });
        }

        self.db
            .stores()
            .upsert_member(store_id, member_user_id, role)
            .await?;

        info!(store_id = %store_id, member = %member_user_id, role = %role, "Member updated");

        Ok(())
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Creates a product and books its opening stock.
    ///
    /// ## Errors
    /// * `Validation` - blank name or category, negative price, cost or stock
    /// * `NotFound` - unknown store
    #[instrument(skip_all, fields(store_id = %product.store_id, name = %product.name))]
    pub async fn create_product(&self, user_id: &str, product: NewProduct) -> EngineResult<Product> {
        self.authorize(&product.store_id, user_id, Permission::ManageCatalog)
            .await?;

        validate_product_name(&product.name)?;
        validate_category(&product.category)?;
        validate_price_cents("price", product.price_cents)?;
        validate_price_cents("cost", product.cost_cents)?;
        if product.initial_stock != 0 {
            validate_quantity(product.initial_stock)?;
        }

        let store = self.store(&product.store_id).await?;
        let now = Utc::now();
        let row = Product {
            id: generate_product_id(),
            store_id: store.id.clone(),
            name: product.name.trim().to_string(),
            category: product.category.trim().to_string(),
            price_cents: product.price_cents,
            cost_cents: product.cost_cents,
            quantity: 0,
            state: ProductState::OutOfStock,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let mut tx = self.db.begin().await?;

        self.db.products().insert(&mut tx, &row).await?;

        if product.initial_stock > 0 {
            self.put_stock(
                &mut tx,
                &row.id,
                &store.id,
                product.initial_stock,
                INITIAL_STOCK_REASON,
                None,
                None,
                now,
            )
            .await?;
        }

        self.db
            .outbox()
            .enqueue(
                &mut tx,
                &store.id,
                EventType::NewProduct,
                &ProductEventPayload {
                    store_name: &store.name,
                    product_id: &row.id,
                    product_name: &row.name,
                    price_cents: row.price_cents,
                    previous_price_cents: None,
                },
            )
            .await?;

        tx.commit().await?;

        info!(product_id = %row.id, initial_stock = product.initial_stock, "Product created");

        self.product(&row.id).await
    }

    /// Changes a product's selling price. Setting the current price is a
    /// no-op and emits nothing.
    #[instrument(skip(self, user_id))]
    pub async fn update_price(&self, user_id: &str, product_id: &str, price_cents: i64) -> EngineResult<Product> {
        let current = self.live_product(product_id).await?;

        self.authorize(&current.store_id, user_id, Permission::ManageCatalog)
            .await?;

        validate_price_cents("price", price_cents)?;

        if current.price_cents == price_cents {
            return Ok(current);
        }

        let store = self.store(&current.store_id).await?;
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !self
            .db
            .products()
            .update_price(&mut tx, product_id, current.version, price_cents, now)
            .await?
        {
            return Err(EngineError::conflict(format!(
                "product {} was modified concurrently; reload and retry",
                product_id
            )));
        }

        let event_type = if price_cents < current.price_cents {
            EventType::PriceDecreased
        } else {
            EventType::PriceIncreased
        };

        self.db
            .outbox()
            .enqueue(
                &mut tx,
                &store.id,
                event_type,
                &ProductEventPayload {
                    store_name: &store.name,
                    product_id,
                    product_name: &current.name,
                    price_cents,
                    previous_price_cents: Some(current.price_cents),
                },
            )
            .await?;

        tx.commit().await?;

        info!(
            product_id = %product_id,
            from = current.price_cents,
            to = price_cents,
            "Price updated"
        );

        self.product(product_id).await
    }

    /// Soft-deletes a product. Its history stays; it can no longer be sold.
    #[instrument(skip(self, user_id))]
    pub async fn delete_product(&self, user_id: &str, product_id: &str) -> EngineResult<Product> {
        let current = self.product(product_id).await?;

        self.authorize(&current.store_id, user_id, Permission::ManageCatalog)
            .await?;

        if current.is_deleted() {
            return Err(EngineError::conflict(format!(
                "product {} is already deleted",
                product_id
            )));
        }

        let store = self.store(&current.store_id).await?;
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !self
            .db
            .products()
            .soft_delete(&mut tx, product_id, current.version, now)
            .await?
        {
            return Err(EngineError::conflict(format!(
                "product {} was modified concurrently; reload and retry",
                product_id
            )));
        }

        self.db
            .outbox()
            .enqueue(
                &mut tx,
                &store.id,
                EventType::ProductDeleted,
                &ProductEventPayload {
                    store_name: &store.name,
                    product_id,
                    product_name: &current.name,
                    price_cents: current.price_cents,
                    previous_price_cents: None,
                },
            )
            .await?;

        tx.commit().await?;

        info!(product_id = %product_id, "Product deleted");

        self.product(product_id).await
    }

    /// Products of a store, deleted ones included.
    pub async fn list_products(&self, user_id: &str, store_id: &str) -> EngineResult<Vec<Product>> {
        self.authorize(store_id, user_id, Permission::Sell).await?;

        Ok(self.db.products().list_by_store(store_id).await?)
    }

    async fn product(&self, product_id: &str) -> EngineResult<Product> {
        self.db
            .products()
            .get_by_id(product_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Product", product_id))
    }

    /// A product that has not been deleted.
    async fn live_product(&self, product_id: &str) -> EngineResult<Product> {
        let product = self.product(product_id).await?;
        if product.is_deleted() {
            return Err(EngineError::not_found("Product", product_id));
        }
        Ok(product)
    }
}
