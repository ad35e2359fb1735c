//! Per-tenant connection lifecycle.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use tap_core::{PosError, PosResult, TenantDirectory, TenantId};

use crate::engine::{DatabaseConn, StorageEngine};
use crate::registry::BoundModels;
use crate::stats::{ManagerStats, SampleRing, StatsSample};

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Idle duration after which a connection is eligible for cleanup
    pub max_idle: Duration,
    /// Connect attempts before surfacing `Connection` to the caller
    pub connect_attempts: u32,
    /// Base backoff between connect attempts
    pub base_backoff: Duration,
    /// Maximum backoff between connect attempts
    pub max_backoff: Duration,
    /// Periodic samples retained by `stats`
    pub stats_history: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(300),
            connect_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            stats_history: 120,
        }
    }
}

/// A live connection to one tenant's database.
///
/// Owned by the [`ConnectionManager`]; callers hold `Arc` clones for the
/// duration of an operation. The in-flight counter is maintained by
/// [`OpGuard`] and checked by cleanup so a connection is never closed
/// under an open transaction.
pub struct ConnectionHandle {
    tenant_id: TenantId,
    conn: Arc<dyn DatabaseConn>,
    last_used: RwLock<DateTime<Utc>>,
    in_flight: AtomicU64,
    pub(crate) models: BoundModels,
}

impl ConnectionHandle {
    fn new(tenant_id: TenantId, conn: Arc<dyn DatabaseConn>) -> Self {
        Self {
            tenant_id,
            conn,
            last_used: RwLock::new(Utc::now()),
            in_flight: AtomicU64::new(0),
            models: BoundModels::default(),
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Name of the underlying database.
    pub fn database(&self) -> &str {
        self.conn.database()
    }

    pub(crate) fn conn(&self) -> &Arc<dyn DatabaseConn> {
        &self.conn
    }

    /// Operations currently running against this connection.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.read()
    }

    /// Track one operation for the lifetime of the returned guard.
    pub fn track_op(self: &Arc<Self>) -> OpGuard {
        self.touch();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        OpGuard {
            handle: self.clone(),
        }
    }

    pub(crate) fn touch(&self) {
        *self.last_used.write() = Utc::now();
    }
}

/// RAII guard for one in-flight operation on a connection.
pub struct OpGuard {
    handle: Arc<ConnectionHandle>,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.handle.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.handle.touch();
    }
}

/// Owns every live tenant connection.
///
/// An injected, explicitly-owned registry: construct one per process (or
/// per test) and pass it where tenant data access is needed. No
/// module-level state.
pub struct ConnectionManager<E: StorageEngine> {
    engine: Arc<E>,
    directory: Arc<TenantDirectory>,
    config: ManagerConfig,
    connections: RwLock<HashMap<TenantId, Arc<ConnectionHandle>>>,
    total_opened: AtomicU64,
    total_closed: AtomicU64,
    samples: Mutex<SampleRing>,
}

impl<E: StorageEngine> ConnectionManager<E> {
    pub fn new(engine: Arc<E>, directory: Arc<TenantDirectory>) -> Self {
        Self::with_config(engine, directory, ManagerConfig::default())
    }

    pub fn with_config(
        engine: Arc<E>,
        directory: Arc<TenantDirectory>,
        config: ManagerConfig,
    ) -> Self {
        let ring = SampleRing::new(config.stats_history);
        Self {
            engine,
            directory,
            config,
            connections: RwLock::new(HashMap::new()),
            total_opened: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            samples: Mutex::new(ring),
        }
    }

    pub fn directory(&self) -> &Arc<TenantDirectory> {
        &self.directory
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Return the live connection for a tenant, opening one if absent.
    ///
    /// Concurrent callers for the same tenant converge on one registered
    /// handle: the first registration wins and racing openers adopt it.
    #[instrument(skip(self, tenant_id), fields(tenant_id = %tenant_id))]
    pub async fn acquire(&self, tenant_id: &TenantId) -> PosResult<Arc<ConnectionHandle>> {
        let tenant = self.directory.lookup(tenant_id)?;

        if let Some(handle) = self.connections.read().get(tenant_id) {
            handle.touch();
            return Ok(handle.clone());
        }

        let conn = self.connect_with_retry(&tenant.database).await?;
        let handle = Arc::new(ConnectionHandle::new(tenant_id.clone(), conn));

        let adopted = {
            let mut connections = self.connections.write();
            match connections.entry(tenant_id.clone()) {
                Entry::Occupied(existing) => Some(existing.get().clone()),
                Entry::Vacant(slot) => {
                    slot.insert(handle.clone());
                    None
                }
            }
        };

        match adopted {
            Some(registered) => {
                registered.touch();
                Ok(registered)
            }
            None => {
                self.total_opened.fetch_add(1, Ordering::SeqCst);
                debug!(database = %handle.database(), "Opened tenant connection");
                Ok(handle)
            }
        }
    }

    async fn connect_with_retry(&self, database: &str) -> PosResult<Arc<dyn DatabaseConn>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.engine.connect(database).await {
                Ok(conn) => return Ok(conn),
                Err(err) if err.is_retryable() && attempt < self.config.connect_attempts => {
                    let delay =
                        backoff_delay(attempt, self.config.base_backoff, self.config.max_backoff);
                    warn!(
                        database,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Engine connect failed, backing off: {err}"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Close connections idle past `max_idle`; returns the count closed.
    ///
    /// A connection with a nonzero in-flight counter is never closed,
    /// whatever its age.
    pub fn cleanup_stale(&self, max_idle: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        {
            Some(cutoff) => cutoff,
            // An effectively-infinite idle window: nothing is stale.
            None => return 0,
        };
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|tenant_id, handle| {
            let keep = handle.in_flight() > 0 || handle.last_used() > cutoff;
            if !keep {
                debug!(tenant_id = %tenant_id, "Closing idle tenant connection");
            }
            keep
        });
        let closed = before - connections.len();
        if closed > 0 {
            self.total_closed.fetch_add(closed as u64, Ordering::SeqCst);
            info!(closed, "Closed idle tenant connections");
        }
        closed
    }

    /// Record one periodic sample; called by the reaper each tick and
    /// callable directly in tests.
    pub fn record_sample(&self) {
        let sample = StatsSample {
            at: Utc::now(),
            open_connections: self.connections.read().len(),
        };
        self.samples.lock().push(sample);
    }

    /// Current open-connection count.
    pub fn open_connections(&self) -> usize {
        self.connections.read().len()
    }

    /// Operational snapshot: counts plus the recent sample history.
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            open_connections: self.connections.read().len(),
            total_opened: self.total_opened.load(Ordering::SeqCst),
            total_closed: self.total_closed.load(Ordering::SeqCst),
            history: self.samples.lock().snapshot(),
        }
    }
}

/// Exponential backoff, capped: `min(base * 2^(attempt-1), max)`.
fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let millis = (base.as_millis() as u64).saturating_mul(1u64 << shift);
    Duration::from_millis(millis.min(max.as_millis() as u64))
}
