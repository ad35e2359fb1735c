//! Post-commit event fan-out.
//!
//! Workflows emit an event only after their transaction commits, so
//! subscribers (mail senders, exporters, audit sinks) never observe an
//! operation that later aborted. Delivery is fire-and-forget: emitting
//! never fails the business operation.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::tenant::TenantId;

/// Events emitted after a business operation commits.
#[derive(Debug, Clone)]
pub enum PosEvent {
    TenantProvisioned {
        tenant_id: TenantId,
        database: String,
        at: DateTime<Utc>,
    },
    PurchaseRecorded {
        tenant_id: TenantId,
        purchase_id: String,
        vendor_id: String,
        total: f64,
        at: DateTime<Utc>,
    },
    SaleRecorded {
        tenant_id: TenantId,
        sale_id: String,
        total: f64,
        at: DateTime<Utc>,
    },
    PaymentRecorded {
        tenant_id: TenantId,
        purchase_id: String,
        amount: f64,
        at: DateTime<Utc>,
    },
}

/// Broadcast hub for post-commit notifications.
pub struct EventHub {
    sender: broadcast::Sender<PosEvent>,
}

impl EventHub {
    /// Create a hub retaining up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// A hub with no subscribers drops the event; senders never block and
    /// never fail.
    pub fn emit(&self, event: PosEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PosEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1000)
    }
}
