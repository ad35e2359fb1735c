//! Read-only reporting over committed data.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use tap_core::{PosError, PosResult, TenantContext};
use tap_store::StorageEngine;

use crate::entities::{Product, ProductId, Purchase, VendorId, VendorStock};
use crate::service::PosService;

/// Hour at which a business day starts, in the store's UTC offset.
pub const BUSINESS_DAY_START_HOUR: u32 = 4;

/// One row of the stock report.
#[derive(Debug, Clone, Serialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: i64,
    /// Quantity valued at the current selling price
    pub retail_value: f64,
}

/// Aggregated purchases over a window.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub count: usize,
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total: f64,
    pub paid_amount: f64,
    pub due_amount: f64,
    pub purchases: Vec<Purchase>,
}

impl<E: StorageEngine> PosService<E> {
    /// Current stock per product, sorted by name.
    pub async fn stock_report(&self, ctx: &TenantContext) -> PosResult<Vec<StockLine>> {
        let conn = self.conn(ctx).await?;
        let products = conn.collection::<Product>().find_all().await?;
        let mut lines: Vec<StockLine> = products
            .into_iter()
            .map(|product| StockLine {
                retail_value: product.stock_qty as f64 * product.selling_price,
                product_id: product.id,
                name: product.name,
                quantity: product.stock_qty,
            })
            .collect();
        lines.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(lines)
    }

    /// Vendor-stock rows, optionally narrowed to one vendor.
    pub async fn vendor_stock_report(
        &self,
        ctx: &TenantContext,
        vendor_id: Option<&VendorId>,
    ) -> PosResult<Vec<VendorStock>> {
        let conn = self.conn(ctx).await?;
        let mut rows = conn.collection::<VendorStock>().find_all().await?;
        if let Some(vendor_id) = vendor_id {
            rows.retain(|row| &row.vendor_id == vendor_id);
        }
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    /// Purchases with `from <= purchased_at < to`, aggregated from the
    /// amounts stored on each record.
    pub async fn purchase_report(
        &self,
        ctx: &TenantContext,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PosResult<PurchaseReport> {
        if to <= from {
            return Err(PosError::validation("report window must not be empty"));
        }
        let conn = self.conn(ctx).await?;
        let mut purchases = conn.collection::<Purchase>().find_all().await?;
        purchases.retain(|purchase| purchase.purchased_at >= from && purchase.purchased_at < to);
        purchases.sort_by_key(|purchase| purchase.purchased_at);

        let mut report = PurchaseReport {
            from,
            to,
            count: purchases.len(),
            subtotal: 0.0,
            tax_amount: 0.0,
            total: 0.0,
            paid_amount: 0.0,
            due_amount: 0.0,
            purchases: Vec::new(),
        };
        for purchase in &purchases {
            report.subtotal += purchase.subtotal;
            report.tax_amount += purchase.tax_amount;
            report.total += purchase.total;
            report.paid_amount += purchase.paid_amount;
            report.due_amount += purchase.due_amount;
        }
        report.purchases = purchases;
        Ok(report)
    }

    /// Purchases for one business day in the store's UTC offset.
    pub async fn daily_purchase_report(
        &self,
        ctx: &TenantContext,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> PosResult<PurchaseReport> {
        let (from, to) = business_day_window(day, offset);
        self.purchase_report(ctx, from, to).await
    }
}

/// The business-day window for `day`: [04:00, next 04:00) in `offset`.
///
/// Every report uses this one boundary.
pub fn business_day_window(day: NaiveDate, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_local = day
        .and_hms_opt(BUSINESS_DAY_START_HOUR, 0, 0)
        .expect("valid business-day boundary");
    let offset_shift = Duration::seconds(offset.local_minus_utc() as i64);
    let start = DateTime::<Utc>::from_naive_utc_and_offset(start_local - offset_shift, Utc);
    (start, start + Duration::days(1))
}
