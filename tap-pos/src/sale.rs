//! Sale recording.
//!
//! The mirror of the purchase workflow: stock decrements instead of
//! increments, with a floor at zero enforced before commit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{instrument, warn};

use tap_core::{PosError, PosEvent, PosResult, TenantContext};
use tap_store::{ConnectionHandle, StorageEngine, Txn};

use crate::entities::{PaymentStatus, Product, ProductId, Sale, SaleId, SaleItem};
use crate::service::PosService;

/// Input for recording a sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleDraft {
    pub items: Vec<SaleLine>,
    pub tax_amount: f64,
    pub paid_amount: f64,
    /// Defaults to now
    pub sold_at: Option<DateTime<Utc>>,
}

/// One requested line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Overrides the product's selling price when set
    pub unit_price: Option<f64>,
}

impl<E: StorageEngine> PosService<E> {
    /// Record a sale to a customer.
    ///
    /// Per line item the product is loaded (`NotFound` if missing) and its
    /// stock decremented; selling more than is on hand fails `Validation`
    /// and nothing commits. Totals and payment status are derived the same
    /// way purchases derive them.
    #[instrument(skip(self, draft), fields(tenant_id = %ctx.tenant_id))]
    pub async fn record_sale(&self, ctx: &TenantContext, draft: SaleDraft) -> PosResult<Sale> {
        validate_draft(&draft)?;
        let conn = self.conn(ctx).await?;

        let mut attempt = 0u32;
        let sale = loop {
            attempt += 1;
            match record_once(&conn, &draft).await {
                Ok(sale) => break sale,
                Err(PosError::Conflict(target)) if attempt < self.retry().max_attempts => {
                    let delay = self.retry().delay_for(attempt);
                    warn!(
                        target = %target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Write conflict recording sale, retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        self.events().emit(PosEvent::SaleRecorded {
            tenant_id: ctx.tenant_id.clone(),
            sale_id: sale.id.to_string(),
            total: sale.total,
            at: Utc::now(),
        });
        Ok(sale)
    }
}

async fn record_once(conn: &Arc<ConnectionHandle>, draft: &SaleDraft) -> PosResult<Sale> {
    let mut txn = conn.begin().await?;
    match stage_sale(&mut txn, draft).await {
        Ok(sale) => {
            txn.commit().await?;
            Ok(sale)
        }
        Err(err) => {
            txn.abort().await?;
            Err(err)
        }
    }
}

async fn stage_sale(txn: &mut Txn, draft: &SaleDraft) -> PosResult<Sale> {
    let now = draft.sold_at.unwrap_or_else(Utc::now);

    let mut products: Vec<Product> = Vec::new();
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
                index.insert(line.product_id.clone(), products.len() - 1);
                products.len() - 1
            }
        };

        let product = &mut products[slot];
        if product.stock_qty < line.quantity {
            return Err(PosError::validation(format!(
                "insufficient stock for {}: have {}, need {}",
                product.name, product.stock_qty, line.quantity
            )));
        }
        product.stock_qty -= line.quantity;
        product.updated_at = now;

        let unit_price = line.unit_price.unwrap_or(product.selling_price);
        let line_total = line.quantity as f64 * unit_price;
        subtotal += line_total;

        items.push(SaleItem {
            product_id: line.product_id.clone(),
            product_name: product.name.clone(),
            quantity: line.quantity,
            unit_price,
            line_total,
        });
    }

    for product in &products {
        txn.put(product)?;
    }

    let total = subtotal + draft.tax_amount;
    let status = PaymentStatus::derive(draft.paid_amount, total);
    let sale = Sale {
        id: SaleId::new(),
        items,
        subtotal,
        tax_amount: draft.tax_amount,
        total,
        paid_amount: draft.paid_amount,
        due_amount: (total - draft.paid_amount).max(0.0),
        status,
        sold_at: now,
        created_at: Utc::now(),
    };
    txn.insert(&sale)?;
    Ok(sale)
}

fn validate_draft(draft: &SaleDraft) -> PosResult<()> {
    if draft.items.is_empty() {
        return Err(PosError::validation("sale must contain at least one item"));
    }
    for line in &draft.items {
        if line.quantity <= 0 {
            return Err(PosError::validation(format!(
                "quantity must be positive for product {}",
                line.product_id
            )));
        }
        if line.unit_price.is_some_and(|price| price < 0.0) {
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
