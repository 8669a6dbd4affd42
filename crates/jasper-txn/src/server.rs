//! The `txn` request handler.

use crate::engine::{parse_ops, TxnEngine};
use crate::store::{KvStore, ServiceKv};
use crate::thunk::{ThunkCache, ThunkIds, ThunkStore};
use jasper_node::{Body, Message, Node, NodeBuilder, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Transaction workload: runs each `txn` request against `lin-kv` (root
/// pointer) and `lww-kv` (thunks).
///
/// State kept across requests is the thunk id counter and the cache of saved
/// thunk values.
#[derive(Default)]
pub struct TxnServer {
    next_thunk: Arc<Mutex<u64>>,
    cache: ThunkCache,
}

impl TxnServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>, builder: NodeBuilder) -> Result<NodeBuilder> {
        let this = Arc::clone(self);
        builder.handler("txn", move |node: Node, msg: Message| {
            let this = Arc::clone(&this);
            async move { this.handle_txn(node, msg).await }
        })
    }

    /// An engine talking to the cluster's services through `node`.
    pub fn engine(&self, node: &Node) -> Result<TxnEngine> {
        let config = node.config();
        let root: Arc<dyn KvStore> = Arc::new(ServiceKv::lin_kv(node.clone()));
        let thunks = ThunkStore::new(Arc::new(ServiceKv::lww_kv(node.clone())))
            .with_cache(Arc::clone(&self.cache))
            .with_fetch_retry(config.thunk_fetch_attempts, config.thunk_fetch_backoff());
        let ids = ThunkIds::with_counter(node.node_id()?, Arc::clone(&self.next_thunk));
        Ok(TxnEngine::new(root, thunks, ids))
    }

    async fn handle_txn(&self, node: Node, msg: Message) -> Result<()> {
        let raw: Vec<Value> = msg.body.field("txn")?;
        let ops = parse_ops(&raw)?;
        let results = self.engine(&node)?.apply(&ops).await?;
        debug!(src = %msg.src, ops = ops.len(), "transaction committed");
        node.reply(&msg, Body::new("txn_ok").with("txn", results))?;
        Ok(())
    }
}
