//! Core multi-tenant types for TapRS.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{PosError, PosResult};

/// A validated tenant identifier.
///
/// Lowercase alphanumeric plus `-`/`_`, 1..=64 chars, starting alphanumeric.
/// Construction is the only place tenant-id syntax is checked; everything
/// downstream can assume a `TenantId` is well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub const MAX_LEN: usize = 64;

    /// Validate and wrap a tenant identifier.
    pub fn new<S: Into<String>>(id: S) -> PosResult<Self> {
        let id = id.into();
        if Self::is_valid(&id) {
            Ok(Self(id))
        } else {
            Err(PosError::invalid_tenant(format!(
                "malformed tenant id: {id:?}"
            )))
        }
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(id: &str) -> bool {
        if id.is_empty() || id.len() > Self::MAX_LEN {
            return false;
        }
        let mut chars = id.chars();
        let first = match chars.next() {
            Some(c) => c,
            None => return false,
        };
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return false;
        }
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context carried with every TapRS operation.
///
/// Passed into services and workflows so all logic is explicitly
/// tenant-aware.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    /// Optional request ID for request correlation
    pub request_id: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            request_id: None,
        }
    }

    /// Add a request ID for correlation
    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// One isolated customer organization and its physical database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub display_name: String,
    /// Physical database identifier; immutable after provisioning
    pub database: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Directory mapping tenant ids to physical databases.
///
/// Injected wherever tenant routing is needed; owns no connections and no
/// global state.
#[derive(Default)]
pub struct TenantDirectory {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
}

impl TenantDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tenant and derive its database identifier.
    ///
    /// Fails with `Validation` if the id is already provisioned; the
    /// database identifier never changes after this call.
    pub fn provision<S: Into<String>>(&self, id: TenantId, display_name: S) -> PosResult<Tenant> {
        let mut tenants = self.tenants.write();
        if tenants.contains_key(&id) {
            return Err(PosError::validation(format!(
                "tenant already provisioned: {id}"
            )));
        }
        let tenant = Tenant {
            database: format!("tap_{}", id.as_str()),
            id: id.clone(),
            display_name: display_name.into(),
            active: true,
            created_at: Utc::now(),
        };
        tenants.insert(id.clone(), tenant.clone());
        info!(tenant_id = %id, database = %tenant.database, "Provisioned tenant");
        Ok(tenant)
    }

    /// Resolve a tenant id to its record.
    ///
    /// Unknown and deactivated ids both fail with `InvalidTenant`; there is
    /// no fallback to a default tenant.
    pub fn lookup(&self, id: &TenantId) -> PosResult<Tenant> {
        match self.tenants.read().get(id) {
            Some(tenant) if tenant.active => Ok(tenant.clone()),
            Some(_) => Err(PosError::invalid_tenant(format!(
                "tenant deactivated: {id}"
            ))),
            None => Err(PosError::invalid_tenant(format!("unknown tenant: {id}"))),
        }
    }

    /// Mark a tenant inactive. Its data stays; lookups start failing.
    pub fn deactivate(&self, id: &TenantId) -> PosResult<()> {
        let mut tenants = self.tenants.write();
        match tenants.get_mut(id) {
            Some(tenant) => {
                tenant.active = false;
                info!(tenant_id = %id, "Deactivated tenant");
                Ok(())
            }
            None => Err(PosError::invalid_tenant(format!("unknown tenant: {id}"))),
        }
    }

    /// Number of provisioned tenants (active or not).
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }
}
