//! # Jasper Txn
//!
//! List-append transactions with optimistic concurrency.
//!
//! The database is a persistent map from key to append history. Values live
//! out of line as write-once [`Thunk`]s in an eventually consistent store;
//! snapshots ([`DbNode`]) only name thunk ids. A single root pointer in a
//! linearizable store names the current snapshot and moves only by
//! compare-and-swap, which is what makes each transaction atomic.
//!
//! ## Modules
//!
//! - [`store`]: the `KvStore` seam, service-backed and in-memory
//! - [`thunk`]: thunk ids, thunk cells, and thunk persistence
//! - [`db_node`]: copy-on-write snapshots
//! - [`engine`]: stage/commit transaction processing
//! - [`server`]: the `txn` handler

pub mod db_node;
pub mod engine;
pub mod server;
pub mod store;
pub mod thunk;

pub use db_node::DbNode;
pub use engine::{parse_ops, Op, Staged, TxnEngine, ROOT_KEY};
pub use server::TxnServer;
pub use store::{KvStore, MemoryKv, ServiceKv, LIN_KV, LWW_KV};
pub use thunk::{Thunk, ThunkCache, ThunkId, ThunkIds, ThunkStore};
