//! The POS service facade.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::instrument;

use tap_core::{EventHub, PosError, PosResult, PosEvent, Tenant, TenantContext, TenantId};
use tap_store::{ConnectionHandle, ConnectionManager, EntityKind, StorageEngine};

use crate::entities::{Product, ProductId, Purchase, Sale, Vendor, VendorId, VendorStock};

/// Conflict-retry policy for transactional workflows.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before a retryable error is surfaced
    pub max_attempts: u32,
    /// Base backoff between attempts
    pub base_backoff: Duration,
    /// Maximum backoff between attempts
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff, capped: `min(base * 2^(attempt-1), max)`.
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let millis = (self.base_backoff.as_millis() as u64).saturating_mul(1u64 << shift);
        Duration::from_millis(millis.min(self.max_backoff.as_millis() as u64))
    }
}

/// One entry point per business operation, all tenant-scoped.
///
/// Owns the connection manager and the post-commit event hub; retryable
/// transaction conflicts are absorbed here per [`RetryPolicy`], everything
/// else surfaces to the caller unchanged.
pub struct PosService<E: StorageEngine> {
    manager: Arc<ConnectionManager<E>>,
    events: Arc<EventHub>,
    retry: RetryPolicy,
}

impl<E: StorageEngine> PosService<E> {
    pub fn new(manager: Arc<ConnectionManager<E>>) -> Self {
        Self {
            manager,
            events: Arc::new(EventHub::default()),
            retry: RetryPolicy::default(),
        }
    }

    /// Use a shared event hub instead of a private one.
    pub fn with_events(mut self, events: Arc<EventHub>) -> Self {
        self.events = events;
        self
    }

    /// Override the conflict-retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<E>> {
        &self.manager
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) async fn conn(&self, ctx: &TenantContext) -> PosResult<Arc<ConnectionHandle>> {
        self.manager.acquire(&ctx.tenant_id).await
    }

    /// Register a new organization and derive its database.
    #[instrument(skip(self, id, display_name), fields(tenant_id = %id))]
    pub async fn provision_tenant(&self, id: TenantId, display_name: &str) -> PosResult<Tenant> {
        let tenant = self.manager.directory().provision(id, display_name)?;
        self.events.emit(PosEvent::TenantProvisioned {
            tenant_id: tenant.id.clone(),
            database: tenant.database.clone(),
            at: Utc::now(),
        });
        Ok(tenant)
    }

    // ---- Catalog ----

    /// Add a product to the tenant's catalog.
    pub async fn create_product(&self, ctx: &TenantContext, product: Product) -> PosResult<Product> {
        if product.name.trim().is_empty() {
            return Err(PosError::validation("product name must not be empty"));
        }
        if product.selling_price < 0.0 {
            return Err(PosError::validation("selling price must not be negative"));
        }
        let conn = self.conn(ctx).await?;
        let mut txn = conn.begin().await?;
        txn.insert(&product)?;
        txn.commit().await?;
        Ok(product)
    }

    /// Add a vendor to the tenant's supplier list.
    pub async fn create_vendor(&self, ctx: &TenantContext, vendor: Vendor) -> PosResult<Vendor> {
        if vendor.name.trim().is_empty() {
            return Err(PosError::validation("vendor name must not be empty"));
        }
        let conn = self.conn(ctx).await?;
        let mut txn = conn.begin().await?;
        txn.insert(&vendor)?;
        txn.commit().await?;
        Ok(vendor)
    }

    /// Fetch one product.
    pub async fn product(&self, ctx: &TenantContext, id: &ProductId) -> PosResult<Product> {
        let conn = self.conn(ctx).await?;
        conn.collection::<Product>()
            .get(id.as_str())
            .await?
            .ok_or_else(|| PosError::not_found("product", id.as_str()))
    }

    /// Fetch one vendor.
    pub async fn vendor(&self, ctx: &TenantContext, id: &VendorId) -> PosResult<Vendor> {
        let conn = self.conn(ctx).await?;
        conn.collection::<Vendor>()
            .get(id.as_str())
            .await?
            .ok_or_else(|| PosError::not_found("vendor", id.as_str()))
    }

    /// Number of committed records behind a boundary-supplied entity name.
    ///
    /// The name is resolved against the closed schema set; anything else
    /// fails with `UnknownSchema`.
    pub async fn record_count(&self, ctx: &TenantContext, entity: &str) -> PosResult<usize> {
        let kind = EntityKind::parse(entity)?;
        let conn = self.conn(ctx).await?;
        let count = match kind {
            EntityKind::Product => conn.collection::<Product>().find_all().await?.len(),
            EntityKind::Vendor => conn.collection::<Vendor>().find_all().await?.len(),
            EntityKind::VendorStock => conn.collection::<VendorStock>().find_all().await?.len(),
            EntityKind::Purchase => conn.collection::<Purchase>().find_all().await?.len(),
            EntityKind::Sale => conn.collection::<Sale>().find_all().await?.len(),
        };
        Ok(count)
    }
}
