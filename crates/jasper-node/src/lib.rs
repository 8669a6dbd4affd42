//! # Jasper Node
//!
//! Runtime for nodes speaking the line-delimited JSON protocol used by
//! distributed-systems test harnesses: one message per line on stdin, one per
//! line on stdout, logs on stderr.
//!
//! ## Pieces
//!
//! - [`Node`] / [`NodeBuilder`]: identity, handler table, callbacks and the
//!   dispatch loop
//! - [`Node::service_call`]: request/reply against an external service with
//!   a timeout
//! - [`sim::Cluster`]: an in-memory cluster for tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use jasper_node::{Body, Message, Node, Result};
//!
//! async fn echo(node: Node, msg: Message) -> Result<()> {
//!     let echo: serde_json::Value = msg.body.field("echo")?;
//!     node.reply(&msg, Body::new("echo_ok").with("echo", echo))?;
//!     Ok(())
//! }
//!
//! # async fn run() -> Result<()> {
//! let node = Node::builder().handler("echo", echo)?.build();
//! node.run(tokio::io::stdin(), tokio::io::stdout()).await
//! # }
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod rpc;
pub mod sim;
pub mod transport;

pub use config::{NodeConfig, NodeConfigBuilder};
pub use error::{ErrorCode, NodeError, Result};
pub use message::{Body, Message};
pub use node::{Callback, CallbackKey, Handler, Identity, Node, NodeBuilder, INIT};
