//! Key-value store seam.
//!
//! The engine only ever needs three operations against its backing stores:
//! point read, blind write, and compare-and-swap. [`ServiceKv`] performs them
//! as RPCs against a named service (`lin-kv`, `lww-kv`); [`MemoryKv`] keeps
//! the data in process and also answers the same wire requests, so tests can
//! stand it in for the real service.

use async_trait::async_trait;
use jasper_node::{Body, Node, NodeError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

pub const LIN_KV: &str = "lin-kv";
pub const LWW_KV: &str = "lww-kv";

/// Storage operations a transaction needs.
///
/// Failures use the service error taxonomy: a missing key on `cas` is
/// [`NodeError::KeyDoesNotExist`], a `from` mismatch is
/// [`NodeError::PreconditionFailed`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Current value of `key`, or `None` if it was never written.
    async fn read(&self, key: &str) -> Result<Option<Value>>;

    /// Unconditionally set `key` to `value`.
    async fn write(&self, key: &str, value: Value) -> Result<()>;

    /// Set `key` to `to` if it currently holds `from`. With
    /// `create_if_not_exists`, a missing key is created holding `to`.
    async fn cas(&self, key: &str, from: Value, to: Value, create_if_not_exists: bool)
        -> Result<()>;
}

/// A [`KvStore`] backed by an external service reached through a node.
#[derive(Clone)]
pub struct ServiceKv {
    node: Node,
    service: String,
}

impl ServiceKv {
    pub fn new(node: Node, service: impl Into<String>) -> Self {
        Self {
            node,
            service: service.into(),
        }
    }

    pub fn lin_kv(node: Node) -> Self {
        Self::new(node, LIN_KV)
    }

    pub fn lww_kv(node: Node) -> Self {
        Self::new(node, LWW_KV)
    }

    async fn call(&self, body: Body, expect: &str) -> Result<Body> {
        let reply = self.node.service_request(&self.service, body).await?;
        if reply.kind != expect {
            return Err(NodeError::Crash(format!(
                "{} answered {:?}, expected {:?}",
                self.service, reply.kind, expect
            )));
        }
        Ok(reply)
    }
}

#[async_trait]
impl KvStore for ServiceKv {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        match self.call(Body::new("read").with("key", key), "read_ok").await {
            Ok(reply) => Ok(reply.get("value").cloned()),
            Err(NodeError::KeyDoesNotExist(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write(&self, key: &str, value: Value) -> Result<()> {
        let body = Body::new("write").with("key", key).with("value", value);
        self.call(body, "write_ok").await.map(|_| ())
    }

    async fn cas(
        &self,
        key: &str,
        from: Value,
        to: Value,
        create_if_not_exists: bool,
    ) -> Result<()> {
        let body = Body::new("cas")
            .with("key", key)
            .with("from", from)
            .with("to", to)
            .with("create_if_not_exists", create_if_not_exists);
        self.call(body, "cas_ok").await.map(|_| ())
    }
}

/// In-process linearizable key-value map.
#[derive(Debug, Default)]
pub struct MemoryKv {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    fn compare_and_set(
        &self,
        key: &str,
        from: &Value,
        to: Value,
        create_if_not_exists: bool,
    ) -> Result<()> {
        let mut data = self.data.lock();
        match data.get(key) {
            None if create_if_not_exists => {}
            None => return Err(NodeError::KeyDoesNotExist(format!("key {:?} does not exist", key))),
            Some(current) if current == from => {}
            Some(current) => {
                return Err(NodeError::PreconditionFailed(format!(
                    "expected {}, but had {}",
                    from, current
                )))
            }
        }
        data.insert(key.to_string(), to);
        Ok(())
    }

    /// Answer one service request body (`read`, `write` or `cas`).
    pub fn handle(&self, request: &Body) -> Body {
        self.answer(request).unwrap_or_else(|err| Body::error(&err))
    }

    fn answer(&self, request: &Body) -> Result<Body> {
        let key = stored_key(request.get("key"))?;
        match request.kind.as_str() {
            "read" => self
                .get(&key)
                .map(|value| Body::new("read_ok").with("value", value))
                .ok_or_else(|| NodeError::KeyDoesNotExist(format!("key {:?} does not exist", key))),
            "write" => {
                let value = request.get("value").cloned().unwrap_or(Value::Null);
                self.data.lock().insert(key, value);
                Ok(Body::new("write_ok"))
            }
            "cas" => {
                let from = request.get("from").cloned().unwrap_or(Value::Null);
                let to = request.get("to").cloned().unwrap_or(Value::Null);
                let create = request
                    .optional::<bool>("create_if_not_exists")?
                    .unwrap_or(false);
                self.compare_and_set(&key, &from, to, create)?;
                Ok(Body::new("cas_ok"))
            }
            other => Err(NodeError::NotSupported(format!("unknown request {:?}", other))),
        }
    }
}

fn stored_key(key: Option<&Value>) -> Result<String> {
    match key {
        Some(Value::String(key)) => Ok(key.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(NodeError::MalformedRequest("missing field `key`".into())),
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, value: Value) -> Result<()> {
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn cas(
        &self,
        key: &str,
        from: Value,
        to: Value,
        create_if_not_exists: bool,
    ) -> Result<()> {
        self.compare_and_set(key, &from, to, create_if_not_exists)
    }
}
