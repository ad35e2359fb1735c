//! In-memory storage engine for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use tap_core::{PosError, PosResult};

use super::{DatabaseConn, Document, EngineTxn, StorageEngine, WriteOp};

type Collections = HashMap<&'static str, HashMap<String, Document>>;

/// In-memory engine: one versioned-document store per named database.
///
/// Databases are created on first connect. Commit takes the database's
/// write lock, validates every staged write against current committed
/// versions (first committer wins), then applies the whole buffer.
pub struct MemoryEngine {
    databases: Arc<RwLock<HashMap<String, Arc<MemoryDatabase>>>>,
    /// Remaining connect calls to fail (test helper)
    fail_connects: AtomicU32,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            databases: Arc::new(RwLock::new(HashMap::new())),
            fail_connects: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` connect calls with `Connection` (test helper)
    pub fn fail_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Number of databases created so far.
    pub fn database_count(&self) -> usize {
        self.databases.read().len()
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn connect(&self, database: &str) -> PosResult<Arc<dyn DatabaseConn>> {
        if self.take_injected_failure() {
            return Err(PosError::connection(format!(
                "engine unavailable (injected failure) opening {database}"
            )));
        }
        let mut databases = self.databases.write();
        let db = databases
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(MemoryDatabase::new(database)))
            .clone();
        Ok(Arc::new(MemoryConn { db }))
    }
}

struct MemoryDatabase {
    name: String,
    collections: RwLock<Collections>,
}

impl MemoryDatabase {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn read_doc(&self, collection: &'static str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    fn commit(&self, writes: Vec<WriteOp>) -> PosResult<()> {
        let mut collections = self.collections.write();

        // At most one staged write per document per transaction.
        let mut seen: HashMap<(&'static str, &str), ()> = HashMap::new();
        for op in &writes {
            if seen.insert((op.collection(), op.id()), ()).is_some() {
                return Err(PosError::validation(format!(
                    "duplicate staged write for {}/{}",
                    op.collection(),
                    op.id()
                )));
            }
        }

        // Validate the whole buffer before touching anything.
        for op in &writes {
            let current = collections
                .get(op.collection())
                .and_then(|docs| docs.get(op.id()))
                .map(|doc| doc.version)
                .unwrap_or(0);
            if current != op.expected_version() {
                return Err(PosError::conflict(format!(
                    "{}/{}",
                    op.collection(),
                    op.id()
                )));
            }
        }

        for op in writes {
            match op {
                WriteOp::Put {
                    collection,
                    id,
                    body,
                    expected_version,
                } => {
                    let docs = collections.entry(collection).or_default();
                    docs.insert(
                        id.clone(),
                        Document {
                            id,
                            version: expected_version + 1,
                            body,
                        },
                    );
                }
                WriteOp::Delete { collection, id, .. } => {
                    if let Some(docs) = collections.get_mut(collection) {
                        docs.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}

struct MemoryConn {
    db: Arc<MemoryDatabase>,
}

#[async_trait]
impl DatabaseConn for MemoryConn {
    async fn read(&self, collection: &'static str, id: &str) -> PosResult<Option<Document>> {
        Ok(self.db.read_doc(collection, id))
    }

    async fn scan(&self, collection: &'static str) -> PosResult<Vec<Document>> {
        let collections = self.db.collections.read();
        let mut docs: Vec<Document> = collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    async fn begin(&self) -> PosResult<Box<dyn EngineTxn>> {
        Ok(Box::new(MemoryTxn {
            db: self.db.clone(),
            writes: Vec::new(),
        }))
    }

    fn database(&self) -> &str {
        &self.db.name
    }
}

struct MemoryTxn {
    db: Arc<MemoryDatabase>,
    writes: Vec<WriteOp>,
}

#[async_trait]
impl EngineTxn for MemoryTxn {
    async fn get(&mut self, collection: &'static str, id: &str) -> PosResult<Option<Document>> {
        Ok(self.db.read_doc(collection, id))
    }

    fn stage(&mut self, op: WriteOp) {
        self.writes.push(op);
    }

    async fn commit(self: Box<Self>) -> PosResult<()> {
        self.db.commit(self.writes)
    }

    async fn abort(self: Box<Self>) -> PosResult<()> {
        // Writes were never applied; dropping the buffer is the rollback.
        Ok(())
    }
}
