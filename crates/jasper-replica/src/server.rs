//! Replica server: local updates plus periodic full-state anti-entropy.
//!
//! `add` mutates only this node's slot, `read` reports the merged value, and
//! `replicate` joins a peer's full state into ours. Every replicate interval
//! the node pushes its whole state to every other cluster member. Pushes are
//! fire-and-forget; a lost push is repaired by the next one because join is
//! idempotent and order-insensitive.

use crate::replicated::Replicated;
use jasper_core::{Datum, GCounter, GSet, PNCounter};
use jasper_node::{Body, Message, Node, NodeBuilder, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

pub type GCounterServer = Replica<GCounter<String>>;
pub type PNCounterServer = Replica<PNCounter<String>>;
pub type GSetServer = Replica<GSet<Datum>>;

/// One node's copy of a replicated lattice.
pub struct Replica<S> {
    state: Mutex<S>,
}

impl<S: Replicated> Replica<S> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(S::bottom()),
        })
    }

    /// Register `add`, `read` and `replicate`, and the periodic push at the
    /// builder's replicate interval.
    pub fn register(self: &Arc<Self>, builder: NodeBuilder) -> Result<NodeBuilder> {
        let interval = builder.config().replicate_interval();

        let this = Arc::clone(self);
        let builder = builder.handler("add", move |node: Node, msg: Message| {
            let this = Arc::clone(&this);
            async move { this.handle_add(&node, &msg) }
        })?;

        let this = Arc::clone(self);
        let builder = builder.handler("read", move |node: Node, msg: Message| {
            let this = Arc::clone(&this);
            async move { this.handle_read(&node, &msg) }
        })?;

        let this = Arc::clone(self);
        let builder = builder.handler("replicate", move |_node: Node, msg: Message| {
            let this = Arc::clone(&this);
            async move { this.handle_replicate(&msg) }
        })?;

        let this = Arc::clone(self);
        Ok(builder.periodic("replicate", interval, move |node: Node| {
            let this = Arc::clone(&this);
            async move { this.push(&node) }
        }))
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> S {
        self.state.lock().clone()
    }

    /// Join `other` into the local state.
    pub fn merge(&self, other: &S) {
        self.state.lock().join_assign(other);
    }

    fn handle_add(&self, node: &Node, msg: &Message) -> Result<()> {
        let node_id = node.node_id()?;
        self.state.lock().apply_add(node_id, &msg.body)?;
        node.reply(msg, Body::new("add_ok"))?;
        Ok(())
    }

    fn handle_read(&self, node: &Node, msg: &Message) -> Result<()> {
        let value = self.state.lock().read_value();
        node.reply(msg, Body::new("read_ok").with("value", value))?;
        Ok(())
    }

    fn handle_replicate(&self, msg: &Message) -> Result<()> {
        let incoming: S = msg.body.field("value")?;
        self.merge(&incoming);
        debug!(workload = S::NAME, from = %msg.src, "merged replicated state");
        Ok(())
    }

    fn push(&self, node: &Node) {
        let identity = match node.identity() {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "skipping replication");
                return;
            }
        };
        let value = match serde_json::to_value(&*self.state.lock()) {
            Ok(value) => value,
            Err(err) => {
                warn!(workload = S::NAME, error = %err, "could not encode state");
                return;
            }
        };

        debug!(workload = S::NAME, state = %value, "replicating");
        for peer in identity.peers() {
            let body = Body::new("replicate").with("value", value.clone());
            if let Err(err) = node.send(peer, body) {
                warn!(%peer, error = %err, "replicate push failed");
            }
        }
    }
}
