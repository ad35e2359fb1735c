//! Explicit transaction handle over an engine transaction.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use tap_core::{PosError, PosResult};

use crate::connection::{ConnectionHandle, OpGuard};
use crate::engine::{EngineTxn, WriteOp};
use crate::registry::Entity;

/// Lifecycle of a transaction handle.
///
/// `Started -> Applying* -> Committing -> Committed`, or any pre-commit
/// state `-> Aborting -> Aborted`. A staging failure poisons the handle to
/// `Aborting`; only `abort` (or drop) is accepted from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Started,
    Applying,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

/// A transaction: committed-state reads plus buffered typed writes that
/// commit atomically.
///
/// Staged writes are not visible to reads inside the same transaction;
/// stage at most one write per document. The handle pins its connection
/// (via the operation counter) until it is committed, aborted, or dropped,
/// and dropping it discards the buffer — a transaction is never left
/// half-open.
pub struct Txn {
    inner: Option<Box<dyn EngineTxn>>,
    state: TxnState,
    /// Versions observed by `get`, keyed by (collection, id); 0 = absent
    versions: HashMap<(&'static str, String), u64>,
    _op: OpGuard,
}

impl ConnectionHandle {
    /// Open a transaction on this connection.
    pub async fn begin(self: &Arc<Self>) -> PosResult<Txn> {
        let op = self.track_op();
        let inner = self.conn().begin().await?;
        Ok(Txn {
            inner: Some(inner),
            state: TxnState::Started,
            versions: HashMap::new(),
            _op: op,
        })
    }
}

impl Txn {
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Read a typed record, remembering its version for a later `put` or
    /// `delete` of the same document.
    pub async fn get<T: Entity>(&mut self, id: &str) -> PosResult<Option<T>> {
        self.accepting()?;
        self.state = TxnState::Applying;
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Err(PosError::validation("transaction already finalized")),
        };
        let collection = T::KIND.collection();
        match inner.get(collection, id).await {
            Ok(Some(doc)) => {
                self.versions.insert((collection, id.to_string()), doc.version);
                match serde_json::from_value(doc.body) {
                    Ok(record) => Ok(Some(record)),
                    Err(err) => {
                        self.poison();
                        Err(err.into())
                    }
                }
            }
            Ok(None) => {
                self.versions.insert((collection, id.to_string()), 0);
                Ok(None)
            }
            Err(err) => {
                self.poison();
                Err(err)
            }
        }
    }

    /// Stage an insert-or-replace of `record`.
    ///
    /// The write is validated at commit against the version this
    /// transaction observed: 0 (must not exist) if the document was never
    /// read, otherwise the version `get` returned.
    pub fn put<T: Entity>(&mut self, record: &T) -> PosResult<()> {
        self.accepting()?;
        self.state = TxnState::Applying;
        let collection = T::KIND.collection();
        let id = record.id();
        let expected_version = self
            .versions
            .get(&(collection, id.clone()))
            .copied()
            .unwrap_or(0);
        let body = self.encode(record)?;
        self.stage(WriteOp::Put {
            collection,
            id,
            body,
            expected_version,
        })
    }

    /// Stage an insert of a brand-new record.
    ///
    /// Fails with `Validation` if this transaction already observed the
    /// document; commit fails with `Conflict` if someone else created it.
    pub fn insert<T: Entity>(&mut self, record: &T) -> PosResult<()> {
        self.accepting()?;
        self.state = TxnState::Applying;
        let collection = T::KIND.collection();
        let id = record.id();
        if self
            .versions
            .get(&(collection, id.clone()))
            .is_some_and(|v| *v > 0)
        {
            self.poison();
            return Err(PosError::validation(format!(
                "document already exists: {collection}/{id}"
            )));
        }
        let body = self.encode(record)?;
        self.stage(WriteOp::Put {
            collection,
            id,
            body,
            expected_version: 0,
        })
    }

    /// Stage a delete of a record this transaction has read.
    pub fn delete<T: Entity>(&mut self, id: &str) -> PosResult<()> {
        self.accepting()?;
        self.state = TxnState::Applying;
        let collection = T::KIND.collection();
        let expected_version = match self.versions.get(&(collection, id.to_string())) {
            Some(version) if *version > 0 => *version,
            _ => {
                self.poison();
                return Err(PosError::validation(format!(
                    "delete requires a prior read in the same transaction: {collection}/{id}"
                )));
            }
        };
        self.stage(WriteOp::Delete {
            collection,
            id: id.to_string(),
            expected_version,
        })
    }

    /// Atomically apply every staged write.
    pub async fn commit(mut self) -> PosResult<()> {
        self.accepting()?;
        self.state = TxnState::Committing;
        let inner = match self.inner.take() {
            Some(inner) => inner,
            None => return Err(PosError::validation("transaction already finalized")),
        };
        match inner.commit().await {
            Ok(()) => {
                self.state = TxnState::Committed;
                Ok(())
            }
            Err(err) => {
                // Commit validation applies nothing on failure.
                self.state = TxnState::Aborted;
                Err(err)
            }
        }
    }

    /// Discard every staged write.
    pub async fn abort(mut self) -> PosResult<()> {
        self.state = TxnState::Aborting;
        if let Some(inner) = self.inner.take() {
            inner.abort().await?;
        }
        self.state = TxnState::Aborted;
        Ok(())
    }

    fn accepting(&self) -> PosResult<()> {
        match self.state {
            TxnState::Started | TxnState::Applying => Ok(()),
            state => Err(PosError::validation(format!(
                "transaction is {state:?}; no further operations accepted"
            ))),
        }
    }

    fn encode<T: Entity>(&mut self, record: &T) -> PosResult<serde_json::Value> {
        match serde_json::to_value(record) {
            Ok(body) => Ok(body),
            Err(err) => {
                self.poison();
                Err(err.into())
            }
        }
    }

    fn stage(&mut self, op: WriteOp) -> PosResult<()> {
        match self.inner.as_mut() {
            Some(inner) => {
                inner.stage(op);
                Ok(())
            }
            None => Err(PosError::validation("transaction already finalized")),
        }
    }

    fn poison(&mut self) {
        self.state = TxnState::Aborting;
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if self.inner.is_some() {
            // Buffered writes vanish with the engine transaction.
            debug!("Transaction dropped without commit; staged writes discarded");
        }
    }
}
