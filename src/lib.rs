//! # Jasper
//!
//! Nodes for distributed-systems test harnesses. A node speaks line-delimited
//! JSON on stdin/stdout and runs exactly one workload:
//!
//! | Workload          | Messages                                  |
//! |-------------------|-------------------------------------------|
//! | `echo`            | `echo`                                    |
//! | `broadcast`       | `topology`, `broadcast`, `read`           |
//! | `g-set`           | `add`, `read`, `replicate`                |
//! | `g-counter`       | `add`, `read`, `replicate`                |
//! | `pn-counter`      | `add`, `read`, `replicate`                |
//! | `txn-list-append` | `txn`                                     |
//!
//! Every workload also answers `echo`.

pub use jasper_core as core;
pub use jasper_gossip as gossip;
pub use jasper_node as node;
pub use jasper_replica as replica;
pub use jasper_txn as txn;

use jasper_gossip::Broadcast;
use jasper_node::{Body, Message, Node, NodeBuilder, NodeConfig, Result};
use jasper_replica::{GCounterServer, GSetServer, PNCounterServer};
use jasper_txn::TxnServer;
use serde_json::Value;

/// Which protocol a node serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Workload {
    Echo,
    Broadcast,
    GSet,
    GCounter,
    PnCounter,
    TxnListAppend,
}

/// Answer `echo` with `echo_ok`, returning the `echo` field unchanged.
pub async fn echo(node: Node, msg: Message) -> Result<()> {
    let echo: Value = msg.body.field("echo")?;
    node.reply(&msg, Body::new("echo_ok").with("echo", echo))?;
    Ok(())
}

/// Build a node serving `workload`.
pub fn build_node(workload: Workload, config: NodeConfig) -> Result<Node> {
    let builder = NodeBuilder::with_config(config).handler("echo", echo)?;
    let builder = match workload {
        Workload::Echo => builder,
        Workload::Broadcast => Broadcast::new().register(builder)?,
        Workload::GSet => GSetServer::new().register(builder)?,
        Workload::GCounter => GCounterServer::new().register(builder)?,
        Workload::PnCounter => PNCounterServer::new().register(builder)?,
        Workload::TxnListAppend => TxnServer::new().register(builder)?,
    };
    Ok(builder.build())
}
