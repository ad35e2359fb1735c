//! Storage-engine contract.
//!
//! Engines store versioned JSON documents in named collections inside named
//! databases (one database per tenant). Reads observe committed state only;
//! writes are staged inside an [`EngineTxn`] and become visible atomically
//! at commit, validated against the document versions the transaction
//! observed. A version mismatch fails the whole commit with `Conflict` and
//! applies nothing.

#[cfg(feature = "memory")]
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use tap_core::PosResult;

/// A single versioned document.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// Monotonic per-document counter; 1 on first insert
    pub version: u64,
    pub body: Value,
}

/// One buffered write staged inside a transaction.
///
/// `expected_version` is the version the transaction observed for the
/// document (0 = observed absent). Commit fails with `Conflict` if the
/// committed version has moved since.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or replace a document
    Put {
        collection: &'static str,
        id: String,
        body: Value,
        expected_version: u64,
    },
    /// Remove a document
    Delete {
        collection: &'static str,
        id: String,
        expected_version: u64,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Put { collection, .. } | Self::Delete { collection, .. } => *collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Put { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    pub fn expected_version(&self) -> u64 {
        match self {
            Self::Put {
                expected_version, ..
            }
            | Self::Delete {
                expected_version, ..
            } => *expected_version,
        }
    }
}

/// Engine trait for document storage primitives
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Open (or create) a named database and return a connection to it.
    ///
    /// Fails with `Connection` when the engine is unreachable; the caller
    /// owns retry policy.
    async fn connect(&self, database: &str) -> PosResult<Arc<dyn DatabaseConn>>;
}

/// A connection to one tenant database.
#[async_trait]
pub trait DatabaseConn: Send + Sync {
    /// Read the current committed version of a document.
    async fn read(&self, collection: &'static str, id: &str) -> PosResult<Option<Document>>;

    /// Scan all committed documents in a collection.
    async fn scan(&self, collection: &'static str) -> PosResult<Vec<Document>>;

    /// Begin a transaction context.
    async fn begin(&self) -> PosResult<Box<dyn EngineTxn>>;

    /// Name of the underlying database.
    fn database(&self) -> &str;
}

/// Engine-side transaction: committed-state reads plus buffered writes.
///
/// Staged writes are not visible to reads inside the same transaction, and
/// at most one write may be staged per document. Dropping a transaction
/// discards its buffer; nothing was ever visible.
#[async_trait]
pub trait EngineTxn: Send {
    /// Read a document as of the committed state.
    async fn get(&mut self, collection: &'static str, id: &str) -> PosResult<Option<Document>>;

    /// Stage a write; nothing is applied until commit.
    fn stage(&mut self, op: WriteOp);

    /// Atomically validate every staged write's expected version and apply
    /// the buffer. All-or-nothing: a `Conflict` leaves no partial effects.
    async fn commit(self: Box<Self>) -> PosResult<()>;

    /// Discard all staged writes.
    async fn abort(self: Box<Self>) -> PosResult<()>;
}
