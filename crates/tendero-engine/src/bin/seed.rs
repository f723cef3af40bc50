//! # Demo Store Generator
//!
//! Builds a demo store through the engine, so every row it creates went
//! through the same checks, ledgers and events as real traffic.
//!
//! ## Usage
//! ```bash
//! # Demo store in ./tendero_dev.db with 40 counter sales (default)
//! cargo run -p tendero-engine --bin seed
//!
//! # More sales
//! cargo run -p tendero-engine --bin seed -- --sales 200
//!
//! # Specify database path
//! cargo run -p tendero-engine --bin seed -- --db ./data/tendero.db
//! ```
//!
//! ## Generated Data
//! - One store (15% tax) with an owner, an admin and a seller
//! - Products across groceries, cleaning and hardware, with opening stock
//! - Customers, counter sales paid cash/card/transfer/deferred
//! - Credit payments, one confirmed and one rejected online order
//! - Outbox drained once through the tracing sink

use std::env;
use std::sync::Arc;

use tendero_core::cart::{CartLine, CartTotals};
use tendero_core::{Customer, PaymentMethod, Product, Role};
use tendero_engine::telemetry::init_tracing;
use tendero_engine::{
    Engine, EngineConfig, EngineError, NewProduct, PaymentRequest, SaleRequest, TracingSink,
};

const OWNER: &str = "owner-demo";

/// (category, name, price in cents, opening stock)
const CATALOG: &[(&str, &str, i64, i64)] = &[
    ("Abarrotes", "Arroz 1kg", 2_500, 80),
    ("Abarrotes", "Frijol negro 1kg", 3_200, 60),
    ("Abarrotes", "Aceite vegetal 1L", 4_500, 40),
    ("Abarrotes", "Azúcar estándar 1kg", 2_800, 70),
    ("Abarrotes", "Sal de mesa 1kg", 1_200, 30),
    ("Abarrotes", "Café soluble 200g", 8_900, 15),
    ("Limpieza", "Jabón de barra", 1_800, 50),
    ("Limpieza", "Detergente 1kg", 3_900, 25),
    ("Limpieza", "Cloro 1L", 2_200, 35),
    ("Ferretería", "Clavos 1kg", 6_500, 10),
    ("Ferretería", "Cemento 50kg", 24_000, 12),
    ("Ferretería", "Cinta aislante", 1_500, 0),
];

const CUSTOMERS: &[(&str, Option<&str>)] = &[
    ("María López", Some("555-0101")),
    ("Juan Pérez", Some("555-0102")),
    ("Rosa Hernández", None),
    ("Pedro Martínez", Some("555-0104")),
];

const METHODS: &[PaymentMethod] = &[
    PaymentMethod::Cash,
    PaymentMethod::Cash,
    PaymentMethod::Card,
    PaymentMethod::Transfer,
    PaymentMethod::Deferred,
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut config = EngineConfig::load()?;
    let mut sales: usize = 40;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--sales" | "-s" => {
                if i + 1 < args.len() {
                    sales = args[i + 1].parse().unwrap_or(40);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    config.db_path = args[i + 1].clone().into();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tendero Demo Store Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -s, --sales <N>    Number of counter sales to record (default: 40)");
                println!("  -d, --db <PATH>    Database file path (default: $TENDERO_DB_PATH)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Tendero Demo Store Generator");
    println!("============================");
    println!("Database: {}", config.db_path.display());
    println!("Sales:    {}", sales);
    println!();

    let engine = Engine::connect(config).await?;
    println!("✓ Connected to database, migrations applied");

    // Store and staff
    let store = engine.register_store(OWNER, "Abarrotes y Ferretería La Esquina", 1500).await?;
    engine.add_member(OWNER, &store.id, "admin-demo", Role::Admin).await?;
    engine.add_member(OWNER, &store.id, "seller-demo", Role::Seller).await?;
    println!("✓ Store {} ({})", store.name, store.id);

    // Catalog
    let mut products = Vec::with_capacity(CATALOG.len());
    for (category, name, price_cents, stock) in CATALOG {
        let product = engine
            .create_product(
                OWNER,
                NewProduct {
                    store_id: store.id.clone(),
                    name: name.to_string(),
                    category: category.to_string(),
                    price_cents: *price_cents,
                    cost_cents: price_cents * 65 / 100,
                    initial_stock: *stock,
                },
            )
            .await?;
        products.push(product);
    }
    println!("✓ {} products", products.len());

    let mut customers = Vec::with_capacity(CUSTOMERS.len());
    for (name, phone) in CUSTOMERS {
        customers.push(engine.register_customer(OWNER, &store.id, name, *phone).await?);
    }
    println!("✓ {} customers", customers.len());

    // Counter sales. Shortfalls are expected once popular items run low.
    let mut recorded = 0;
    let mut short = 0;
    for n in 0..sales {
        let first = &products[n % products.len()];
        let second = &products[(n * 7 + 3) % products.len()];
        let mut lines = vec![CartLine::new(&first.id, 1 + (n % 3) as i64, first.price_cents)];
        if second.id != first.id {
            lines.push(CartLine::new(&second.id, 1, second.price_cents));
        }

        let method = METHODS[n % METHODS.len()];
        let customer = &customers[n % customers.len()];
        let totals = CartTotals::compute(&lines, store.tax_rate());

        let result = engine
            .create_sale(
                "seller-demo",
                SaleRequest {
                    store_id: store.id.clone(),
                    customer_id: (method == PaymentMethod::Deferred || n % 2 == 0).then(|| customer.id.clone()),
                    lines,
                    payment_method: method,
                    subtotal_cents: totals.subtotal_cents,
                    tax_cents: totals.tax_cents,
                    total_cents: totals.total_cents,
                    notes: None,
                    idempotency_key: Some(format!("seed-{:05}", n)),
                },
            )
            .await;

        match result {
            Ok(_) => recorded += 1,
            Err(EngineError::InsufficientStock { .. }) => short += 1,
            Err(e) => return Err(e.into()),
        }
    }
    println!("✓ {} sales recorded, {} refused for stock", recorded, short);

    // Half of every open debt gets paid
    let mut payments = 0;
    for customer in &customers {
        if let Some(account) = engine.active_account(OWNER, &store.id, &customer.id).await? {
            let amount = account.current_balance_cents / 2;
            if amount > 0 {
                engine
                    .register_payment(
                        "seller-demo",
                        PaymentRequest {
                            account_id: account.id,
                            amount_cents: amount,
                            method: PaymentMethod::Cash,
                            notes: Some("abono".to_string()),
                        },
                    )
                    .await?;
                payments += 1;
            }
        }
    }
    println!("✓ {} credit payments", payments);

    // Online orders: one confirmed, one rejected, from the best-stocked products
    let mut shelf = engine.list_products(OWNER, &store.id).await?;
    shelf.retain(|p| !p.is_deleted() && p.quantity > 0);
    shelf.sort_by(|a, b| b.quantity.cmp(&a.quantity));
    if shelf.len() < 2 {
        println!("⚠ Not enough stock left for online orders");
        return Ok(());
    }
    let order = |product: &Product, customer: &Customer| {
        let lines = vec![CartLine::new(&product.id, 1, product.price_cents)];
        let totals = CartTotals::compute(&lines, store.tax_rate());
        SaleRequest {
            store_id: store.id.clone(),
            customer_id: Some(customer.id.clone()),
            lines,
            payment_method: PaymentMethod::Deferred,
            subtotal_cents: totals.subtotal_cents,
            tax_cents: totals.tax_cents,
            total_cents: totals.total_cents,
            notes: Some("pedido en línea".to_string()),
            idempotency_key: None,
        }
    };
    let confirmed = engine.place_order(OWNER, order(&shelf[0], &customers[0])).await?;
    engine.confirm_order(OWNER, &confirmed).await?;
    let rejected = engine.place_order(OWNER, order(&shelf[1], &customers[1])).await?;
    engine.reject_order(OWNER, &rejected, "sin repartidor disponible").await?;
    println!("✓ Online orders: {} confirmed, {} rejected", confirmed, rejected);

    // Notifications
    let (relay, _handle) = engine.outbox_relay(Arc::new(TracingSink));
    let mut delivered = 0;
    loop {
        let report = relay.drain_once().await?;
        if report.delivered == 0 {
            break;
        }
        delivered += report.delivered;
    }
    println!("✓ {} notifications delivered", delivered);

    // Reports
    println!();
    let top = engine.top_products(OWNER, &store.id, None, None, 3).await?;
    println!("Top products:");
    for row in &top.rows {
        println!("  {:<24} {:>6.2}%", row.label, row.percentage);
    }
    let stagnant = engine.stagnant_stock(OWNER, &store.id, Some(0)).await?;
    println!("Products not sold today: {}", stagnant.iter().filter(|r| r.never_sold()).count());

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
