//! Idle-connection sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use crate::connection::ConnectionManager;
use crate::engine::StorageEngine;

/// Periodic maintenance task for a connection manager.
///
/// Each tick closes connections idle past the manager's `max_idle` and
/// records a stats sample. Connections with in-flight operations are left
/// alone, so the sweep never interrupts an open transaction.
pub struct IdleReaper<E: StorageEngine> {
    manager: Arc<ConnectionManager<E>>,
    interval: Duration,
}

impl<E: StorageEngine + 'static> IdleReaper<E> {
    /// Create a reaper with the default 30s interval.
    pub fn new(manager: Arc<ConnectionManager<E>>) -> Self {
        Self {
            manager,
            interval: Duration::from_secs(30),
        }
    }

    /// Create a reaper with a custom interval.
    pub fn with_interval(manager: Arc<ConnectionManager<E>>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run the sweep loop until the task is dropped.
    pub async fn start(self) {
        let mut ticker = interval(self.interval);

        info!("Starting idle reaper with interval: {:?}", self.interval);

        loop {
            ticker.tick().await;
            let closed = self.sweep();
            if closed > 0 {
                info!(closed, "Idle reaper closed connections");
            } else {
                debug!("No idle connections found");
            }
        }
    }

    /// Run one sweep cycle (for testing).
    pub fn sweep(&self) -> usize {
        let closed = self.manager.cleanup_stale(self.manager.config().max_idle);
        self.manager.record_sample();
        closed
    }
}
