//! # Jasper Gossip
//!
//! Flood broadcast for the Jasper node runtime. Every value a client
//! broadcasts reaches every node reachable through the neighbor topology,
//! even across transient link failures, because each hop keeps re-sending
//! until its neighbors acknowledge.
//!
//! ```rust,no_run
//! use jasper_gossip::Broadcast;
//! use jasper_node::Node;
//!
//! # fn build() -> jasper_node::Result<()> {
//! let broadcast = Broadcast::new();
//! let node = broadcast.register(Node::builder())?.build();
//! # Ok(())
//! # }
//! ```

pub mod broadcast;

pub use broadcast::{ack_id, Broadcast};
