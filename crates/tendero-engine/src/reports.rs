//! # Analytics Read Models
//!
//! Thin loaders around [`tendero_core::analytics`]: each report reads the
//! history it needs through the pool and folds it in memory. No report
//! writes anything or caches anything, so every report agrees with the
//! ledger as of the moment it was requested.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::instrument;

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use tendero_core::analytics::{
    self, MonthlyBucket, PriceComparisonRow, RotationRow, ShareReport, StagnantRow,
};
use tendero_core::Permission;

/// Largest trailing window `monthly_sales` accepts.
pub const MAX_REPORT_MONTHS: u32 = 36;

impl Engine {
    /// Units in and out per product for movements in `[from, to)`.
    #[instrument(skip(self, user_id))]
    pub async fn rotation(
        &self,
        user_id: &str,
        store_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> EngineResult<Vec<RotationRow>> {
        self.authorize(store_id, user_id, Permission::ViewReports)
            .await?;
        check_range(from, to)?;

        let products = self.db.products().list_by_store(store_id).await?;
        let movements = self.db.inventory().list_for_store(store_id, from, to).await?;

        Ok(analytics::rotation(&products, &movements, from, to))
    }

    /// Products holding stock that have not sold for `threshold_days`
    /// (the configured default when `None`).
    #[instrument(skip(self, user_id))]
    pub async fn stagnant_stock(
        &self,
        user_id: &str,
        store_id: &str,
        threshold_days: Option<i64>,
    ) -> EngineResult<Vec<StagnantRow>> {
        self.authorize(store_id, user_id, Permission::ViewReports)
            .await?;

        let threshold = threshold_days.unwrap_or(self.config.stagnant_days);
        if threshold < 0 {
            return Err(EngineError::validation("threshold_days must not be negative"));
        }

        let products = self.db.products().list_by_store(store_id).await?;
        let movements = self.db.inventory().list_for_store(store_id, None, None).await?;
        let pending = self.db.sales().pending_ids(store_id).await?;

        Ok(analytics::stagnant_stock(&products, &movements, &pending, Utc::now(), threshold))
    }

    /// Each product's price against the average of its category across all
    /// stores.
    #[instrument(skip(self, user_id))]
    pub async fn price_comparison(&self, user_id: &str, store_id: &str) -> EngineResult<Vec<PriceComparisonRow>> {
        self.authorize(store_id, user_id, Permission::ViewReports)
            .await?;

        let products = self.db.products().list_by_store(store_id).await?;
        let categories: Vec<String> = products
            .iter()
            .filter(|p| !p.is_deleted())
            .map(|p| p.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let market = self.db.products().list_live_in_categories(&categories).await?;

        Ok(analytics::price_comparison(&products, &market))
    }

    /// Sales and cost of the trailing `months` months, current one included.
    #[instrument(skip(self, user_id))]
    pub async fn monthly_sales(&self, user_id: &str, store_id: &str, months: u32) -> EngineResult<Vec<MonthlyBucket>> {
        self.authorize(store_id, user_id, Permission::ViewReports)
            .await?;

        if months == 0 || months > MAX_REPORT_MONTHS {
            return Err(EngineError::validation(format!(
                "months must be between 1 and {}",
                MAX_REPORT_MONTHS
            )));
        }

        let now = Utc::now();
        let since = analytics::monthly_window_start(months, now)
            .ok_or_else(|| EngineError::validation("invalid report window"))?;
        let sales = self.db.reports().completed_sale_costs(store_id, since).await?;

        Ok(analytics::monthly_sales(&sales, months, now))
    }

    /// Best sellers by revenue among completed sales in `[from, to)`.
    #[instrument(skip(self, user_id))]
    pub async fn top_products(
        &self,
        user_id: &str,
        store_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> EngineResult<ShareReport> {
        self.authorize(store_id, user_id, Permission::ViewReports)
            .await?;
        check_range(from, to)?;

        let lines = self.db.reports().sold_lines(store_id, from, to).await?;

        Ok(analytics::top_products(&lines, limit))
    }

    /// Revenue split by category among completed sales in `[from, to)`.
    #[instrument(skip(self, user_id))]
    pub async fn category_breakdown(
        &self,
        user_id: &str,
        store_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> EngineResult<ShareReport> {
        self.authorize(store_id, user_id, Permission::ViewReports)
            .await?;
        check_range(from, to)?;

        let lines = self.db.reports().sold_lines(store_id, from, to).await?;

        Ok(analytics::category_breakdown(&lines))
    }
}

fn check_range(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> EngineResult<()> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(EngineError::validation(
            "report range starts after it ends",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewProduct;
    use crate::error::ErrorKind;
    use crate::sale::SaleRequest;
    use crate::test_support::{engine, seed_customer, seed_product, seed_store, OWNER};
    use chrono::Duration;
    use tendero_core::cart::CartLine;
    use tendero_core::{PaymentMethod, Role};

    async fn sell(engine: &Engine, store_id: &str, lines: Vec<CartLine>) -> String {
        let subtotal: i64 = lines.iter().map(|l| l.quantity * l.unit_price_cents).sum();
        engine
            .create_sale(
                OWNER,
                SaleRequest {
                    store_id: store_id.to_string(),
                    customer_id: None,
                    lines,
                    payment_method: PaymentMethod::Cash,
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
    async fn test_rotation_counts_ledger_units() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;
        let aceite = seed_product(&engine, &store.id, "Aceite 1L", 3_000, 5).await;

        sell(&engine, &store.id, vec![CartLine::new(&arroz.id, 4, 2_500)]).await;
        sell(&engine, &store.id, vec![CartLine::new(&aceite.id, 1, 3_000)]).await;

        let rows = engine.rotation(OWNER, &store.id, None, None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].product_id, arroz.id);
        assert_eq!((rows[0].units_in, rows[0].units_out, rows[0].current_stock), (10, 4, 6));
        assert_eq!(rows[1].units_out, 1);

        // a window entirely in the future sees nothing move
        let later = Utc::now() + Duration::days(1);
        let rows = engine.rotation(OWNER, &store.id, Some(later), None).await.unwrap();
        assert!(rows.iter().all(|r| r.units_in == 0 && r.units_out == 0));
    }

    #[tokio::test]
    async fn test_stagnant_stock_thresholds() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;
        let clavo = seed_product(&engine, &store.id, "Clavo molido", 1_500, 3).await;
        seed_product(&engine, &store.id, "Sal 1kg", 1_200, 0).await;
        sell(&engine, &store.id, vec![CartLine::new(&arroz.id, 1, 2_500)]).await;

        // nothing is two weeks old yet
        assert!(engine.stagnant_stock(OWNER, &store.id, None).await.unwrap().is_empty());

        let rows = engine.stagnant_stock(OWNER, &store.id, Some(0)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].product_id, clavo.id);
        assert!(rows[0].never_sold());
        assert_eq!(rows[1].product_id, arroz.id);
        assert_eq!(rows[1].days_since_last_sale, Some(0));

        let err = engine.stagnant_stock(OWNER, &store.id, Some(-1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_pending_order_is_not_a_sale_until_confirmed() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let frijol = seed_product(&engine, &store.id, "Frijol 1kg", 4_000, 10).await;

        let order_id = engine
            .place_order(
                OWNER,
                SaleRequest {
                    store_id: store.id.clone(),
                    customer_id: Some(customer.id.clone()),
                    lines: vec![CartLine::new(&frijol.id, 2, 4_000)],
                    payment_method: PaymentMethod::Cash,
                    subtotal_cents: 8_000,
                    tax_cents: 0,
                    total_cents: 8_000,
                    notes: None,
                    idempotency_key: None,
                },
            )
            .await
            .unwrap();

        let rows = engine.stagnant_stock(OWNER, &store.id, Some(0)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].never_sold());

        engine.confirm_order(OWNER, &order_id).await.unwrap();

        let rows = engine.stagnant_stock(OWNER, &store.id, Some(0)).await.unwrap();
        assert_eq!(rows[0].days_since_last_sale, Some(0));
    }

    #[tokio::test]
    async fn test_price_comparison_across_stores() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let rival = seed_store(&engine).await;
        let mine = seed_product(&engine, &store.id, "Arroz 1kg", 2_000, 10).await;
        seed_product(&engine, &rival.id, "Arroz Morelos", 3_000, 10).await;
        let gone = seed_product(&engine, &rival.id, "Arroz caro", 9_000, 10).await;
        engine.delete_product(OWNER, &gone.id).await.unwrap();
        engine
            .create_product(
                OWNER,
                NewProduct {
                    store_id: rival.id.clone(),
                    name: "Jabón".to_string(),
                    category: "Limpieza".to_string(),
                    price_cents: 1_000,
                    cost_cents: 500,
                    initial_stock: 1,
                },
            )
            .await
            .unwrap();

        let rows = engine.price_comparison(OWNER, &store.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product_id, mine.id);
        assert_eq!(rows[0].category_average_cents, 2_500);
        assert_eq!(rows[0].difference_cents, -500);
        assert_eq!(rows[0].sample_size, 2);
    }

    #[tokio::test]
    async fn test_monthly_sales_skip_pending_and_cancelled() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        let customer = seed_customer(&engine, &store.id).await;
        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;

        sell(&engine, &store.id, vec![CartLine::new(&arroz.id, 2, 2_500)]).await;

        let order_id = engine
            .place_order(
                OWNER,
                SaleRequest {
                    store_id: store.id.clone(),
                    customer_id: Some(customer.id.clone()),
                    lines: vec![CartLine::new(&arroz.id, 1, 2_500)],
                    payment_method: PaymentMethod::Cash,
                    subtotal_cents: 2_500,
                    tax_cents: 0,
                    total_cents: 2_500,
                    notes: None,
                    idempotency_key: None,
                },
            )
            .await
            .unwrap();
        engine.reject_order(OWNER, &order_id, "sin stock en ruta").await.unwrap();

        let buckets = engine.monthly_sales(OWNER, &store.id, 3).await.unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].sale_count, 0);
        let current = buckets.last().unwrap();
        assert_eq!(current.sale_count, 1);
        assert_eq!(current.sales_cents, 5_000);
        assert_eq!(current.cost_cents, 2_500);

        let err = engine.monthly_sales(OWNER, &store.id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_shares() {
        let engine = engine().await;
        let store = seed_store(&engine).await;

        let empty = engine.category_breakdown(OWNER, &store.id, None, None).await.unwrap();
        assert_eq!(empty.total_cents, 0);
        assert_eq!(empty.unattributed_percentage, 100.0);

        let arroz = seed_product(&engine, &store.id, "Arroz 1kg", 2_500, 10).await;
        let aceite = seed_product(&engine, &store.id, "Aceite 1L", 3_000, 5).await;
        sell(
            &engine,
            &store.id,
            vec![CartLine::new(&arroz.id, 2, 2_500), CartLine::new(&aceite.id, 1, 3_000)],
        )
        .await;

        let top = engine.top_products(OWNER, &store.id, None, None, 1).await.unwrap();
        assert_eq!(top.total_cents, 8_000);
        assert_eq!(top.rows.len(), 1);
        assert_eq!(top.rows[0].key, arroz.id);
        assert_eq!(top.rows[0].percentage, 62.5);
        assert_eq!(top.unattributed_percentage, 37.5);

        let categories = engine.category_breakdown(OWNER, &store.id, None, None).await.unwrap();
        assert_eq!(categories.rows.len(), 1);
        assert_eq!(categories.rows[0].label, "Abarrotes");
        assert_eq!(categories.rows[0].percentage, 100.0);
    }

    #[tokio::test]
    async fn test_reports_need_permission() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        engine.add_member(OWNER, &store.id, "assistant-1", Role::Assistant).await.unwrap();

        let err = engine.rotation("assistant-1", &store.id, None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
