//! Payment recording against open purchases.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{instrument, warn};

use tap_core::{PosError, PosEvent, PosResult, TenantContext};
use tap_store::{ConnectionHandle, StorageEngine, Txn};

use crate::entities::{PaymentStatus, Purchase, PurchaseId};
use crate::service::PosService;

impl<E: StorageEngine> PosService<E> {
    /// Record a payment toward a purchase and re-derive its status.
    ///
    /// Overpayment is accepted: the purchase ends `Paid` with zero due.
    #[instrument(skip(self, purchase_id), fields(tenant_id = %ctx.tenant_id, purchase_id = %purchase_id))]
    pub async fn record_payment(
        &self,
        ctx: &TenantContext,
        purchase_id: &PurchaseId,
        amount: f64,
    ) -> PosResult<Purchase> {
        if amount <= 0.0 {
            return Err(PosError::validation("payment amount must be positive"));
        }
        let conn = self.conn(ctx).await?;

        let mut attempt = 0u32;
        let purchase = loop {
            attempt += 1;
            match apply_once(&conn, purchase_id, amount).await {
                Ok(purchase) => break purchase,
                Err(PosError::Conflict(target)) if attempt < self.retry().max_attempts => {
                    let delay = self.retry().delay_for(attempt);
                    warn!(
                        target = %target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Write conflict recording payment, retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        self.events().emit(PosEvent::PaymentRecorded {
            tenant_id: ctx.tenant_id.clone(),
            purchase_id: purchase.id.to_string(),
            amount,
            at: Utc::now(),
        });
        Ok(purchase)
    }
}

async fn apply_once(
    conn: &Arc<ConnectionHandle>,
    purchase_id: &PurchaseId,
    amount: f64,
) -> PosResult<Purchase> {
    let mut txn = conn.begin().await?;
    match stage_payment(&mut txn, purchase_id, amount).await {
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

async fn stage_payment(
    txn: &mut Txn,
    purchase_id: &PurchaseId,
    amount: f64,
) -> PosResult<Purchase> {
    let mut purchase: Purchase = txn
        .get(purchase_id.as_str())
        .await?
        .ok_or_else(|| PosError::not_found("purchase", purchase_id.as_str()))?;

    purchase.paid_amount += amount;
    purchase.due_amount = (purchase.total - purchase.paid_amount).max(0.0);
    purchase.status = PaymentStatus::derive(purchase.paid_amount, purchase.total);
    txn.put(&purchase)?;
    Ok(purchase)
}
