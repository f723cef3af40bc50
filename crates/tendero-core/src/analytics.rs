//! # Analytics Read Models
//!
//! Reports replayed from persisted history. Nothing here owns state: the
//! database layer loads products, movements and completed-sale lines, and
//! these functions fold them into reports.
//!
//! ## Report Map
//! ```text
//! ┌───────────────────────┬─────────────────────────────┬──────────────────────────────┐
//! │ Report                │ Input                       │ Ordering                     │
//! ├───────────────────────┼─────────────────────────────┼──────────────────────────────┤
//! │ rotation              │ products + movements        │ units out desc, product id   │
//! │ stagnant_stock        │ products + movements        │ never sold, then days desc   │
//! │ price_comparison      │ store + all-store products  │ category, product id         │
//! │ monthly_sales         │ completed sales with cost   │ oldest month first           │
//! │ top_products          │ completed sale lines        │ amount desc, product id      │
//! │ category_breakdown    │ completed sale lines        │ amount desc, category        │
//! └───────────────────────┴─────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Movements are replayed in `(created_at, id)` order so that the most
//! recent entry wins and equal timestamps fall back to insertion order.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use ts_rs::TS;

use crate::money::Money;
use crate::SALE_MOVEMENT_REASON;
use crate::types::{InventoryMovement, MovementType, Product, ProductState};

// =============================================================================
// Ledger Queries
// =============================================================================

/// Units moved in and out of one product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct UnitFlow {
    pub units_in: i64,
    pub units_out: i64,
}

/// Sums IN and OUT units per product for movements in `[from, to)`.
pub fn unit_flows(
    movements: &[InventoryMovement],
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> HashMap<String, UnitFlow> {
    let mut flows: HashMap<String, UnitFlow> = HashMap::new();

    for m in movements.iter().filter(|m| in_range(m.created_at, from, to)) {
        let flow = flows.entry(m.product_id.clone()).or_default();
        match m.movement_type {
            MovementType::In => flow.units_in += m.quantity,
            MovementType::Out => flow.units_out += m.quantity,
        }
    }

    flows
}

/// Timestamp of the most recent sale per product.
///
/// A sale is an OUT movement written by a sale that has not been reversed
/// by a later compensating movement. Movements of orders in `pending_sales`
/// are left out until the order is confirmed.
pub fn last_sale_at(
    movements: &[InventoryMovement],
    pending_sales: &HashSet<String>,
) -> HashMap<String, DateTime<Utc>> {
    let reversed: HashSet<i64> = movements
        .iter()
        .filter_map(|m| m.reverses_movement_id)
        .collect();

    let mut ordered: Vec<&InventoryMovement> = movements
        .iter()
        .filter(|m| {
            m.movement_type == MovementType::Out
                && m.reason == SALE_MOVEMENT_REASON
                && m.sale_id.as_ref().is_some_and(|id| !pending_sales.contains(id))
                && m.reverses_movement_id.is_none()
                && !reversed.contains(&m.id)
        })
        .collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut last = HashMap::new();
    for m in ordered {
        last.insert(m.product_id.clone(), m.created_at);
    }
    last
}

fn in_range(at: DateTime<Utc>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    from.map_or(true, |f| at >= f) && to.map_or(true, |t| at < t)
}

// =============================================================================
// Rotation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RotationRow {
    pub product_id: String,
    pub name: String,
    pub category: String,
    pub units_in: i64,
    pub units_out: i64,
    pub current_stock: i64,
}

/// Inventory rotation of every product in `products`.
///
/// Products without movements in range report zero.
pub fn rotation(
    products: &[Product],
    movements: &[InventoryMovement],
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Vec<RotationRow> {
    let flows = unit_flows(movements, from, to);

    let mut rows: Vec<RotationRow> = products
        .iter()
        .map(|p| {
            let flow = flows.get(&p.id).copied().unwrap_or_default();
            RotationRow {
                product_id: p.id.clone(),
                name: p.name.clone(),
                category: p.category.clone(),
                units_in: flow.units_in,
                units_out: flow.units_out,
                current_stock: p.quantity,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.units_out
            .cmp(&a.units_out)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    rows
}

// =============================================================================
// Stagnant Stock
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StagnantRow {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    #[ts(as = "Option<String>")]
    pub last_sale_at: Option<DateTime<Utc>>,
    /// `None` when the product has never sold.
    pub days_since_last_sale: Option<i64>,
    pub days_since_created: i64,
}

impl StagnantRow {
    pub fn never_sold(&self) -> bool {
        self.last_sale_at.is_none()
    }
}

/// Products holding stock that have not sold for `threshold_days`.
///
/// ## Rules
/// - Never sold: qualifies once `days_since_created >= threshold_days`
/// - Sold before: qualifies once `days_since_last_sale >= threshold_days`
/// - Zero stock and inactive products are skipped
///
/// Never-sold products come first (oldest first), then by days since the
/// last sale descending. Remaining ties go by product id.
pub fn stagnant_stock(
    products: &[Product],
    movements: &[InventoryMovement],
    pending_sales: &HashSet<String>,
    now: DateTime<Utc>,
    threshold_days: i64,
) -> Vec<StagnantRow> {
    let last_sales = last_sale_at(movements, pending_sales);

    let mut rows: Vec<StagnantRow> = products
        .iter()
        .filter(|p| p.quantity > 0 && p.state != ProductState::Inactive)
        .filter_map(|p| {
            let last = last_sales.get(&p.id).copied();
            let days_since_created = (now - p.created_at).num_days();
            let days_since_last_sale = last.map(|at| (now - at).num_days());

            let stagnant = match days_since_last_sale {
                Some(days) => days >= threshold_days,
                None => days_since_created >= threshold_days,
            };

            stagnant.then(|| StagnantRow {
                product_id: p.id.clone(),
                name: p.name.clone(),
                quantity: p.quantity,
                last_sale_at: last,
                days_since_last_sale,
                days_since_created,
            })
        })
        .collect();

    rows.sort_by(|a, b| {
        b.never_sold()
            .cmp(&a.never_sold())
            .then_with(|| match (a.days_since_last_sale, b.days_since_last_sale) {
                (Some(x), Some(y)) => y.cmp(&x),
                _ => b.days_since_created.cmp(&a.days_since_created),
            })
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    rows
}

// =============================================================================
// Price Comparison
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceComparisonRow {
    pub product_id: String,
    pub name: String,
    pub category: String,
    pub price_cents: i64,
    /// Average over every live product in the category, across all stores.
    pub category_average_cents: i64,
    /// `price_cents - category_average_cents`.
    pub difference_cents: i64,
    /// Products the average was taken over.
    pub sample_size: i64,
}

/// Compares each of `store_products` to its category average in `market`.
///
/// Inactive products are ignored on both sides. Averages round half away
/// from zero to whole cents.
pub fn price_comparison(store_products: &[Product], market: &[Product]) -> Vec<PriceComparisonRow> {
    let mut by_category: HashMap<&str, (i64, i64)> = HashMap::new();
    for p in market.iter().filter(|p| !p.is_deleted()) {
        let entry = by_category.entry(p.category.as_str()).or_insert((0, 0));
        entry.0 += p.price_cents;
        entry.1 += 1;
    }

    let mut rows: Vec<PriceComparisonRow> = store_products
        .iter()
        .filter(|p| !p.is_deleted())
        .map(|p| {
            // the product itself is part of the market when both lists
            // come from the same table; fall back to its own price otherwise
            let (sum, count) = by_category
                .get(p.category.as_str())
                .copied()
                .unwrap_or((p.price_cents, 1));
            let average = (sum as f64 / count as f64).round() as i64;

            PriceComparisonRow {
                product_id: p.id.clone(),
                name: p.name.clone(),
                category: p.category.clone(),
                price_cents: p.price_cents,
                category_average_cents: average,
                difference_cents: p.price_cents - average,
                sample_size: count,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    rows
}

// =============================================================================
// Monthly Sales
// =============================================================================

/// One completed sale with its cost at current product cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CompletedSaleCost {
    pub sale_id: String,
    pub completed_at: DateTime<Utc>,
    pub total_cents: i64,
    /// `Σ line quantity × product.cost_cents` using today's cost.
    pub cost_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MonthlyBucket {
    pub year: i32,
    /// 1-12.
    pub month: u32,
    pub sales_cents: i64,
    pub cost_cents: i64,
    pub sale_count: i64,
}

impl MonthlyBucket {
    pub fn margin(&self) -> Money {
        Money::from_cents(self.sales_cents - self.cost_cents)
    }
}

/// Buckets completed sales by month for the trailing `months` months,
/// current month included, oldest first. Empty months report zero.
pub fn monthly_sales(sales: &[CompletedSaleCost], months: u32, now: DateTime<Utc>) -> Vec<MonthlyBucket> {
    let mut buckets: BTreeMap<(i32, u32), MonthlyBucket> = BTreeMap::new();

    let (mut year, mut month) = (now.year(), now.month());
    for _ in 0..months {
        buckets.insert(
            (year, month),
            MonthlyBucket {
                year,
                month,
                sales_cents: 0,
                cost_cents: 0,
                sale_count: 0,
            },
        );
        (year, month) = previous_month(year, month);
    }

    for sale in sales {
        let key = (sale.completed_at.year(), sale.completed_at.month());
        if let Some(bucket) = buckets.get_mut(&key) {
            bucket.sales_cents += sale.total_cents;
            bucket.cost_cents += sale.cost_cents;
            bucket.sale_count += 1;
        }
    }

    buckets.into_values().collect()
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// First instant of the oldest month covered by a `months`-month window.
pub fn monthly_window_start(months: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (mut year, mut month) = (now.year(), now.month());
    for _ in 1..months.max(1) {
        (year, month) = previous_month(year, month);
    }
    chrono::NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// =============================================================================
// Shares: Top Products and Category Breakdown
// =============================================================================

/// One line of a completed sale, joined with its product's category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SoldLine {
    pub product_id: String,
    pub name_snapshot: String,
    pub category: String,
    pub quantity: i64,
    pub line_subtotal_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShareRow {
    /// Product id or category name.
    pub key: String,
    pub label: String,
    pub quantity: i64,
    pub amount_cents: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShareReport {
    pub total_cents: i64,
    pub rows: Vec<ShareRow>,
    /// Share of the total not covered by `rows`. 100 when nothing sold.
    pub unattributed_percentage: f64,
}

/// Best-selling products by line subtotal.
pub fn top_products(lines: &[SoldLine], limit: usize) -> ShareReport {
    share_report(
        lines,
        |l| (l.product_id.clone(), l.name_snapshot.clone()),
        |a, b| a.key.cmp(&b.key),
        Some(limit),
    )
}

/// Sales split by product category.
pub fn category_breakdown(lines: &[SoldLine]) -> ShareReport {
    share_report(
        lines,
        |l| (l.category.clone(), l.category.clone()),
        |a, b| a.label.cmp(&b.label),
        None,
    )
}

fn share_report<K, T>(lines: &[SoldLine], key_of: K, tie: T, limit: Option<usize>) -> ShareReport
where
    K: Fn(&SoldLine) -> (String, String),
    T: Fn(&ShareRow, &ShareRow) -> std::cmp::Ordering,
{
    let total: Money = lines
        .iter()
        .map(|l| Money::from_cents(l.line_subtotal_cents))
        .sum();

    let mut grouped: HashMap<String, ShareRow> = HashMap::new();
    for line in lines {
        let (key, label) = key_of(line);
        let row = grouped.entry(key.clone()).or_insert(ShareRow {
            key,
            // first snapshot seen names the product
            label,
            quantity: 0,
            amount_cents: 0,
            percentage: 0.0,
        });
        row.quantity += line.quantity;
        row.amount_cents += line.line_subtotal_cents;
    }

    let mut rows: Vec<ShareRow> = grouped.into_values().collect();
    rows.sort_by(|a, b| b.amount_cents.cmp(&a.amount_cents).then_with(|| tie(a, b)));
    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    for row in rows.iter_mut() {
        row.percentage = Money::from_cents(row.amount_cents)
            .percentage_of(total)
            .map(round2)
            .unwrap_or(0.0);
    }

    let unattributed_percentage = if total.is_zero() {
        100.0
    } else {
        let listed: f64 = rows.iter().map(|r| r.percentage).sum();
        round2((100.0 - listed).max(0.0))
    };

    ShareReport {
        total_cents: total.cents(),
        rows,
        unattributed_percentage,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// =============================================================================
// Unit Tests
// =============================================================================
