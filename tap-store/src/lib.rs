//! tap-store: multi-tenant storage core for TapRS.
//!
//! Three layers, bottom up:
//!
//! - **Storage engine** — an object-safe trait over a versioned document
//!   store with buffered, atomically-committed transactions. The in-memory
//!   engine (feature `memory`, on by default) backs tests and development.
//! - **Connection manager** — lazily opens one connection per tenant
//!   database, retries unreachable engines with bounded backoff, tracks
//!   in-flight operations, and sweeps idle connections without ever
//!   interrupting an open transaction.
//! - **Model registry + transactions** — typed collection accessors bound
//!   per connection from a closed set of entity kinds, and an explicit
//!   transaction state machine whose staged writes commit or vanish as one
//!   unit.

pub mod connection;
pub mod engine;
pub mod reaper;
pub mod registry;
pub mod stats;
pub mod txn;

pub use connection::{ConnectionHandle, ConnectionManager, ManagerConfig, OpGuard};
pub use engine::{DatabaseConn, Document, EngineTxn, StorageEngine, WriteOp};
pub use reaper::IdleReaper;
pub use registry::{Collection, Entity, EntityKind};
pub use stats::{ManagerStats, StatsSample};
pub use txn::{Txn, TxnState};

#[cfg(feature = "memory")]
pub use engine::memory::MemoryEngine;
