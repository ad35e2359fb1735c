//! Purchase recording.
//!
//! One purchase is one transaction: stock increments, price-history
//! appends, vendor-stock upserts, and the purchase record itself commit
//! together or not at all. Engine write conflicts are retried with
//! bounded backoff; every other failure aborts and surfaces.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{instrument, warn};

use tap_core::{PosError, PosEvent, PosResult, TenantContext};
use tap_store::{ConnectionHandle, StorageEngine, Txn};

use crate::entities::{
    PaymentStatus, PricePoint, Product, ProductId, Purchase, PurchaseId, PurchaseItem, Vendor,
    VendorId, VendorStock,
};
use crate::service::PosService;

/// Input for recording a purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseDraft {
    pub vendor_id: VendorId,
    pub items: Vec<PurchaseLine>,
    pub tax_amount: f64,
    pub paid_amount: f64,
    /// Defaults to now
    pub purchased_at: Option<DateTime<Utc>>,
}

/// One requested line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: f64,
}

impl<E: StorageEngine> PosService<E> {
    /// Record a purchase from a vendor.
    ///
    /// Per line item: the product is loaded (`NotFound` if missing), its
    /// stock incremented and a price-history entry appended, and the
    /// vendor-stock row for (vendor, product) upserted. Subtotal, tax,
    /// total, and payment status are derived once and stored on the
    /// purchase record. All of it commits as one unit.
    #[instrument(skip(self, draft), fields(tenant_id = %ctx.tenant_id, vendor_id = %draft.vendor_id))]
    pub async fn record_purchase(
        &self,
        ctx: &TenantContext,
        draft: PurchaseDraft,
    ) -> PosResult<Purchase> {
        validate_draft(&draft)?;
        let conn = self.conn(ctx).await?;

        let mut attempt = 0u32;
        let purchase = loop {
            attempt += 1;
            match record_once(&conn, &draft).await {
                Ok(purchase) => break purchase,
                Err(PosError::Conflict(target)) if attempt < self.retry().max_attempts => {
                    let delay = self.retry().delay_for(attempt);
                    warn!(
                        target = %target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Write conflict recording purchase, retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        self.events().emit(PosEvent::PurchaseRecorded {
            tenant_id: ctx.tenant_id.clone(),
            purchase_id: purchase.id.to_string(),
            vendor_id: purchase.vendor_id.to_string(),
            total: purchase.total,
            at: Utc::now(),
        });
        Ok(purchase)
    }
}

async fn record_once(conn: &Arc<ConnectionHandle>, draft: &PurchaseDraft) -> PosResult<Purchase> {
    let mut txn = conn.begin().await?;
    match stage_purchase(&mut txn, draft).await {
        Ok(purchase) => {
            txn.commit().await?;
            Ok(purchase)
        }
        Err(err) => {
            txn.abort().await?;
            Err(err)
        }
    }
}

async fn stage_purchase(txn: &mut Txn, draft: &PurchaseDraft) -> PosResult<Purchase> {
    let _vendor: Vendor = txn
        .get(draft.vendor_id.as_str())
        .await?
        .ok_or_else(|| PosError::not_found("vendor", draft.vendor_id.as_str()))?;

    let now = draft.purchased_at.unwrap_or_else(Utc::now);

    // Load each product once, folding duplicate lines onto it, so the
    // transaction stages exactly one write per touched document.
    let mut products: Vec<Product> = Vec::new();
    let mut received: Vec<(i64, f64)> = Vec::new();
    let mut index: HashMap<ProductId, usize> = HashMap::new();
    let mut items = Vec::with_capacity(draft.items.len());
    let mut subtotal = 0.0;

    for line in &draft.items {
        let slot = match index.get(&line.product_id) {
            Some(&slot) => slot,
            None => {
                let product: Product = txn
                    .get(line.product_id.as_str())
                    .await?
                    .ok_or_else(|| PosError::not_found("product", line.product_id.as_str()))?;
                products.push(product);
                received.push((0, 0.0));
                index.insert(line.product_id.clone(), products.len() - 1);
                products.len() - 1
            }
        };

        let line_total = line.quantity as f64 * line.unit_price;
        subtotal += line_total;

        let product = &mut products[slot];
        product.stock_qty += line.quantity;
        product.updated_at = now;
        product.push_price(PricePoint {
            vendor_id: Some(draft.vendor_id.clone()),
            unit_cost: line.unit_price,
            at: now,
        });

        received[slot].0 += line.quantity;
        received[slot].1 = line.unit_price;

        items.push(PurchaseItem {
            product_id: line.product_id.clone(),
            product_name: product.name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total,
        });
    }

    for product in &products {
        txn.put(product)?;
    }

    // Upsert one vendor-stock row per (vendor, product): create if absent,
    // else increment quantity and overwrite last price/date.
    for (slot, product) in products.iter().enumerate() {
        let (quantity, last_price) = received[slot];
        let key = VendorStock::key(&draft.vendor_id, &product.id);
        let mut stock = txn
            .get::<VendorStock>(&key)
            .await?
            .unwrap_or_else(|| VendorStock::new(draft.vendor_id.clone(), product.id.clone()));
        stock.quantity += quantity;
        stock.last_unit_price = last_price;
        stock.last_purchase_at = now;
        txn.put(&stock)?;
    }

    let total = subtotal + draft.tax_amount;
    let status = PaymentStatus::derive(draft.paid_amount, total);
    let purchase = Purchase {
        id: PurchaseId::new(),
        vendor_id: draft.vendor_id.clone(),
        items,
        subtotal,
        tax_amount: draft.tax_amount,
        total,
        paid_amount: draft.paid_amount,
        due_amount: (total - draft.paid_amount).max(0.0),
        status,
        purchased_at: now,
        created_at: Utc::now(),
    };
    txn.insert(&purchase)?;
    Ok(purchase)
}

fn validate_draft(draft: &PurchaseDraft) -> PosResult<()> {
    if draft.items.is_empty() {
        return Err(PosError::validation(
            "purchase must contain at least one item",
        ));
    }
    for line in &draft.items {
        if line.quantity <= 0 {
            return Err(PosError::validation(format!(
                "quantity must be positive for product {}",
                line.product_id
            )));
        }
        if line.unit_price < 0.0 {
            return Err(PosError::validation(format!(
                "unit price must not be negative for product {}",
                line.product_id
            )));
        }
    }
    if draft.tax_amount < 0.0 {
        return Err(PosError::validation("tax amount must not be negative"));
    }
    if draft.paid_amount < 0.0 {
        return Err(PosError::validation("paid amount must not be negative"));
    }
    Ok(())
}
