//! Flood broadcast with per-neighbor acknowledgements.
//!
//! A node that sees a value for the first time forwards it to every neighbor
//! except the one it came from, then keeps re-sending to the neighbors that
//! have not acknowledged yet, once per retry interval, until all of them have.
//! Retries never give up on their own; they stop when the node shuts down.
//!
//! Peer-to-peer copies are marked `internal` and carry a `broadcast_id`. The
//! receiver acknowledges them with a `broadcast_ok` whose `callback_id` is
//! `"{broadcast_id}_{receiver}"`, which is the key the sender filed its
//! acknowledgement callback under.

use jasper_core::{Datum, GSet};
use jasper_node::{Body, CallbackKey, Message, Node, NodeBuilder, NodeError, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Correlation id a neighbor acknowledges `broadcast_id` with.
pub fn ack_id(broadcast_id: &str, neighbor: &str) -> String {
    format!("{}_{}", broadcast_id, neighbor)
}

/// Broadcast workload state: the neighbor list and every value seen so far.
#[derive(Default)]
pub struct Broadcast {
    neighbors: RwLock<Vec<String>>,
    messages: Mutex<GSet<Datum>>,
}

impl Broadcast {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the `topology`, `broadcast` and `read` handlers.
    pub fn register(self: &Arc<Self>, builder: NodeBuilder) -> Result<NodeBuilder> {
        let this = Arc::clone(self);
        let builder = builder.handler("topology", move |node: Node, msg: Message| {
            let this = Arc::clone(&this);
            async move { this.handle_topology(&node, &msg) }
        })?;

        let this = Arc::clone(self);
        let builder = builder.handler("broadcast", move |node: Node, msg: Message| {
            let this = Arc::clone(&this);
            async move { this.handle_broadcast(&node, &msg) }
        })?;

        let this = Arc::clone(self);
        builder.handler("read", move |node: Node, msg: Message| {
            let this = Arc::clone(&this);
            async move { this.handle_read(&node, &msg) }
        })
    }

    pub fn neighbors(&self) -> Vec<String> {
        self.neighbors.read().clone()
    }

    pub fn set_neighbors(&self, neighbors: Vec<String>) {
        *self.neighbors.write() = neighbors;
    }

    /// Every value seen so far, in `Datum` order.
    pub fn messages(&self) -> Vec<Datum> {
        self.messages.lock().iter().cloned().collect()
    }

    fn handle_topology(&self, node: &Node, msg: &Message) -> Result<()> {
        let topology: HashMap<String, Vec<String>> = msg.body.field("topology")?;
        let node_id = node.node_id()?;
        let neighbors = topology.get(node_id).cloned().unwrap_or_default();
        if !topology.contains_key(node_id) {
            warn!(%node_id, "topology has no entry for this node");
        }

        info!(%node_id, ?neighbors, "topology set");
        self.set_neighbors(neighbors);
        node.reply(msg, Body::new("topology_ok"))?;
        Ok(())
    }

    fn handle_read(&self, node: &Node, msg: &Message) -> Result<()> {
        let messages: Vec<Value> = self
            .messages
            .lock()
            .iter()
            .map(|datum| datum.as_value().clone())
            .collect();
        node.reply(msg, Body::new("read_ok").with("messages", messages))?;
        Ok(())
    }

    fn handle_broadcast(&self, node: &Node, msg: &Message) -> Result<()> {
        let value: Datum = msg.body.field("message")?;
        let internal = msg.body.optional::<bool>("internal")?.unwrap_or(false);
        let broadcast_id = broadcast_id(msg)?;
        let node_id = node.node_id()?;

        if internal {
            let ack = Body::new("broadcast_ok").with_callback_id(ack_id(&broadcast_id, node_id));
            node.send(&msg.src, ack)?;
        } else {
            node.reply(msg, Body::new("broadcast_ok"))?;
        }

        if !self.messages.lock().insert(value.clone()) {
            debug!(%broadcast_id, message = %value, "already seen, not forwarding");
            return Ok(());
        }

        let pending: BTreeSet<String> = self
            .neighbors
            .read()
            .iter()
            .filter(|neighbor| **neighbor != msg.src)
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let body = Body::new("broadcast")
            .with("message", value.into_value())
            .with("internal", true)
            .with("broadcast_id", broadcast_id.clone());
        spawn_retry(node.clone(), broadcast_id, body, pending);
        Ok(())
    }
}

/// Reuse the incoming `broadcast_id`, or derive one from the client request.
fn broadcast_id(msg: &Message) -> Result<String> {
    match msg.body.get("broadcast_id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Null) | None => msg
            .body
            .msg_id
            .map(|msg_id| format!("{}:{}", msg.src, msg_id))
            .ok_or_else(|| {
                NodeError::MalformedRequest("broadcast needs a msg_id or broadcast_id".into())
            }),
        Some(other) => Ok(other.to_string()),
    }
}

/// Re-send `body` to every neighbor in `pending` until each one acknowledges.
fn spawn_retry(node: Node, broadcast_id: String, body: Body, pending: BTreeSet<String>) {
    let pending = Arc::new(Mutex::new(pending));
    let shutdown = node.shutdown_token();
    let interval = node.config().retry_interval();

    tokio::spawn(async move {
        let mut sweep = 0u64;
        loop {
            let targets: Vec<String> = pending.lock().iter().cloned().collect();
            if targets.is_empty() {
                debug!(%broadcast_id, sweeps = sweep, "all neighbors acknowledged");
                break;
            }
            if sweep > 0 {
                debug!(%broadcast_id, ?targets, sweep, "re-sending unacknowledged broadcast");
            }

            for target in &targets {
                let acked = Arc::clone(&pending);
                let neighbor = target.clone();
                let sent = node.send_with_callback(
                    target,
                    body.clone(),
                    Some(ack_id(&broadcast_id, target)),
                    move |reply| {
                        if reply.body.kind == "broadcast_ok" {
                            acked.lock().remove(&neighbor);
                        }
                    },
                );
                if let Err(err) = sent {
                    warn!(%broadcast_id, error = %err, "giving up on broadcast");
                    return;
                }
            }
            sweep += 1;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    for target in pending.lock().iter() {
                        node.cancel_callback(&CallbackKey::Explicit(ack_id(&broadcast_id, target)));
                    }
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    });
}
