//! # Jasper Replica
//!
//! Servers for state-based CRDT workloads: grow-only counter, PN-counter and
//! grow-only set. Each node accepts local updates and converges with its peers
//! by periodically pushing its full state, which peers join into their own.

pub mod replicated;
pub mod server;

pub use replicated::Replicated;
pub use server::{GCounterServer, GSetServer, PNCounterServer, Replica};
