//! Model registry: a closed set of entity kinds bound per connection.
//!
//! Each tenant connection exposes one bound accessor per entity kind,
//! created on demand and cached on the connection, so accessors for
//! different tenants never share state. Kinds are a closed enum rather
//! than free-form names; `UnknownSchema` survives only at the boundary,
//! where external input names a kind.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use tap_core::{PosError, PosResult};

use crate::connection::ConnectionHandle;
use crate::engine::DatabaseConn;

/// Closed set of entity kinds the registry knows how to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Product,
    Vendor,
    VendorStock,
    Purchase,
    Sale,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Product,
        EntityKind::Vendor,
        EntityKind::VendorStock,
        EntityKind::Purchase,
        EntityKind::Sale,
    ];

    /// Collection name backing this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Product => "products",
            EntityKind::Vendor => "vendors",
            EntityKind::VendorStock => "vendor_stock",
            EntityKind::Purchase => "purchases",
            EntityKind::Sale => "sales",
        }
    }

    /// Resolve a boundary-supplied entity name.
    ///
    /// Fails with `UnknownSchema` for names outside the closed set.
    pub fn parse(name: &str) -> PosResult<Self> {
        match name {
            "product" | "products" => Ok(EntityKind::Product),
            "vendor" | "vendors" => Ok(EntityKind::Vendor),
            "vendor_stock" => Ok(EntityKind::VendorStock),
            "purchase" | "purchases" => Ok(EntityKind::Purchase),
            "sale" | "sales" => Ok(EntityKind::Sale),
            other => Err(PosError::UnknownSchema(other.to_string())),
        }
    }
}

/// A typed entity stored in its own per-tenant collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Document id for this record.
    fn id(&self) -> String;
}

/// The per-connection accessor cache. At most one binding exists per
/// (connection, kind); rebinding hands back the existing one.
#[derive(Default)]
pub(crate) struct BoundModels {
    bound: RwLock<HashMap<EntityKind, Arc<CollectionCore>>>,
}

impl BoundModels {
    fn bind(&self, kind: EntityKind, conn: &Arc<dyn DatabaseConn>) -> Arc<CollectionCore> {
        if let Some(core) = self.bound.read().get(&kind) {
            return core.clone();
        }
        let mut bound = self.bound.write();
        bound
            .entry(kind)
            .or_insert_with(|| {
                Arc::new(CollectionCore {
                    kind,
                    conn: conn.clone(),
                })
            })
            .clone()
    }
}

pub(crate) struct CollectionCore {
    pub(crate) kind: EntityKind,
    pub(crate) conn: Arc<dyn DatabaseConn>,
}

impl ConnectionHandle {
    /// Typed accessor for `T`'s collection on this connection.
    ///
    /// Idempotent: repeated calls return accessors over the same binding,
    /// never a duplicate registration.
    pub fn collection<T: Entity>(self: &Arc<Self>) -> Collection<T> {
        let core = self.models.bind(T::KIND, self.conn());
        Collection {
            handle: self.clone(),
            core,
            _marker: PhantomData,
        }
    }
}

/// Read access to one entity collection on one tenant connection.
///
/// Reads observe committed state; writes go through a transaction
/// (`ConnectionHandle::begin`).
pub struct Collection<T: Entity> {
    handle: Arc<ConnectionHandle>,
    pub(crate) core: Arc<CollectionCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Collection<T> {
    pub fn kind(&self) -> EntityKind {
        self.core.kind
    }

    /// Read one record by id.
    pub async fn get(&self, id: &str) -> PosResult<Option<T>> {
        let _op = self.handle.track_op();
        match self.core.conn.read(T::KIND.collection(), id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc.body)?)),
            None => Ok(None),
        }
    }

    /// Read all committed records in the collection.
    pub async fn find_all(&self) -> PosResult<Vec<T>> {
        let _op = self.handle.track_op();
        let docs = self.core.conn.scan(T::KIND.collection()).await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc.body).map_err(PosError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::engine::memory::MemoryEngine;
    use serde::Deserialize;
    use tap_core::{TenantDirectory, TenantId};

    #[derive(Debug, Serialize, Deserialize)]
    struct TestProduct {
        id: String,
        name: String,
    }

    impl Entity for TestProduct {
        const KIND: EntityKind = EntityKind::Product;

        fn id(&self) -> String {
            self.id.clone()
        }
    }

    async fn manager_with_tenant(id: &str) -> (Arc<ConnectionManager<MemoryEngine>>, TenantId) {
        let directory = Arc::new(TenantDirectory::new());
        let tenant_id = TenantId::new(id).unwrap();
        directory.provision(tenant_id.clone(), id).unwrap();
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(MemoryEngine::new()),
            directory,
        ));
        (manager, tenant_id)
    }

    #[tokio::test]
    async fn rebinding_is_idempotent() {
        let (manager, tenant_id) = manager_with_tenant("acme").await;
        let conn = manager.acquire(&tenant_id).await.unwrap();

        let first = conn.collection::<TestProduct>();
        let second = conn.collection::<TestProduct>();
        assert!(Arc::ptr_eq(&first.core, &second.core));
    }

    #[tokio::test]
    async fn bindings_are_per_connection() {
        let directory = Arc::new(TenantDirectory::new());
        let acme = TenantId::new("acme").unwrap();
        let zenith = TenantId::new("zenith").unwrap();
        directory.provision(acme.clone(), "Acme").unwrap();
        directory.provision(zenith.clone(), "Zenith").unwrap();
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(MemoryEngine::new()),
            directory,
        ));

        let conn_a = manager.acquire(&acme).await.unwrap();
        let conn_z = manager.acquire(&zenith).await.unwrap();

        let coll_a = conn_a.collection::<TestProduct>();
        let coll_z = conn_z.collection::<TestProduct>();
        assert!(!Arc::ptr_eq(&coll_a.core, &coll_z.core));
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert!(EntityKind::parse("products").is_ok());
        assert!(matches!(
            EntityKind::parse("widgets"),
            Err(PosError::UnknownSchema(_))
        ));
    }

    #[test]
    fn every_kind_has_a_distinct_collection() {
        let mut names: Vec<&str> = EntityKind::ALL.iter().map(|k| k.collection()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EntityKind::ALL.len());
    }
}
