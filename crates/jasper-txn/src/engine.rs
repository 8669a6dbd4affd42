//! Optimistic list-append transactions.
//!
//! A transaction runs in two phases. [`TxnEngine::stage`] reads the root
//! pointer, loads that snapshot and applies the operations to a copy of it.
//! [`TxnEngine::commit`] then saves the new thunks and moves the root from the
//! old snapshot to the new one with a single compare-and-swap. If another
//! transaction moved the root in between, the swap is refused and the whole
//! transaction fails with [`NodeError::TxnConflict`]; the caller decides
//! whether to run it again.

use crate::db_node::DbNode;
use crate::store::KvStore;
use crate::thunk::{Thunk, ThunkIds, ThunkStore};
use jasper_node::{NodeError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Key of the root pointer in the linearizable store.
pub const ROOT_KEY: &str = "root";

/// One micro-operation of a transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// `["r", key, _]`: read the key's full history.
    Read { key: Value },
    /// `["append", key, value]`: append one value.
    Append { key: Value, value: Value },
}

impl Op {
    /// The key as sent by the client.
    pub fn key(&self) -> &Value {
        match self {
            Op::Read { key } | Op::Append { key, .. } => key,
        }
    }

    /// The key under which the history is stored. `1` and `"1"` name the
    /// same list.
    pub fn storage_key(&self) -> String {
        match self.key() {
            Value::String(key) => key.clone(),
            other => other.to_string(),
        }
    }
}

impl TryFrom<&Value> for Op {
    type Error = NodeError;

    fn try_from(value: &Value) -> Result<Self> {
        let parts = match value.as_array() {
            Some(parts) if parts.len() == 3 => parts,
            _ => {
                return Err(NodeError::MalformedRequest(format!(
                    "expected [f, key, value], got {}",
                    value
                )))
            }
        };
        match parts[0].as_str() {
            Some("r") => Ok(Op::Read {
                key: parts[1].clone(),
            }),
            Some("append") => Ok(Op::Append {
                key: parts[1].clone(),
                value: parts[2].clone(),
            }),
            _ => Err(NodeError::MalformedRequest(format!(
                "unsupported operation {}",
                parts[0]
            ))),
        }
    }
}

/// Decode the `txn` field of a request.
pub fn parse_ops(ops: &[Value]) -> Result<Vec<Op>> {
    ops.iter().map(Op::try_from).collect()
}

/// A transaction applied locally but not yet published.
#[derive(Debug)]
pub struct Staged {
    base: DbNode,
    next: DbNode,
    results: Vec<Value>,
}

impl Staged {
    /// Whether committing would change the database.
    pub fn is_read_only(&self) -> bool {
        self.base == self.next
    }

    pub fn results(&self) -> &[Value] {
        &self.results
    }
}

/// Runs transactions against a root pointer store and a thunk store.
pub struct TxnEngine {
    root: Arc<dyn KvStore>,
    thunks: ThunkStore,
    ids: ThunkIds,
}

impl TxnEngine {
    pub fn new(root: Arc<dyn KvStore>, thunks: ThunkStore, ids: ThunkIds) -> Self {
        Self { root, thunks, ids }
    }

    /// The current published snapshot; a missing root is the empty database.
    pub async fn load_root(&self) -> Result<DbNode> {
        match self.root.read(ROOT_KEY).await? {
            Some(value) => DbNode::from_wire(&value),
            None => Ok(DbNode::new()),
        }
    }

    /// Read the root and apply `ops` to a copy of it.
    pub async fn stage(&self, ops: &[Op]) -> Result<Staged> {
        let base = self.load_root().await?;
        let mut next = base.clone();
        let mut results = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                Op::Read { key } => {
                    let history = next.read(&op.storage_key(), &self.thunks).await?;
                    let values = history.map(Value::Array).unwrap_or(Value::Null);
                    results.push(Value::Array(vec!["r".into(), key.clone(), values]));
                }
                Op::Append { key, value } => {
                    let thunk = Thunk::fresh(self.ids.next_id(), value.clone());
                    next.append(op.storage_key(), thunk);
                    results.push(Value::Array(vec!["append".into(), key.clone(), value.clone()]));
                }
            }
        }
        Ok(Staged {
            base,
            next,
            results,
        })
    }

    /// Save new thunks, then swing the root from the staged base to the
    /// staged result. Read-only transactions touch neither store.
    pub async fn commit(&self, staged: Staged) -> Result<Vec<Value>> {
        let Staged {
            base,
            mut next,
            results,
        } = staged;
        if base == next {
            return Ok(results);
        }

        next.save_all(&self.thunks).await?;

        let from = base.to_wire();
        let to = next.to_wire();
        match self.root.cas(ROOT_KEY, from, to, true).await {
            Ok(()) => {
                debug!(keys = next.len(), "root advanced");
                Ok(results)
            }
            Err(NodeError::PreconditionFailed(text)) | Err(NodeError::KeyDoesNotExist(text)) => {
                info!(reason = %text, "root moved under transaction");
                Err(NodeError::TxnConflict(format!("root changed concurrently: {}", text)))
            }
            Err(err) => Err(err),
        }
    }

    /// Stage and commit in one go.
    pub async fn apply(&self, ops: &[Op]) -> Result<Vec<Value>> {
        let staged = self.stage(ops).await?;
        self.commit(staged).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;
    use serde_json::json;

    #[test]
    fn test_parse_ops() {
        let ops = parse_ops(&[json!(["append", "x", 5]), json!(["r", 1, null])]).unwrap();
        assert_eq!(
            ops,
            vec![
                Op::Append {
                    key: json!("x"),
                    value: json!(5)
                },
                Op::Read { key: json!(1) },
            ]
        );
        assert_eq!(ops[1].storage_key(), "1");
    }

    #[test]
    fn test_unsupported_operation_is_malformed() {
        for bad in [json!(["w", "x", 1]), json!(["r", "x"]), json!("r")] {
            assert!(matches!(
                Op::try_from(&bad),
                Err(NodeError::MalformedRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_reads_see_earlier_appends_in_same_txn() {
        let root = Arc::new(MemoryKv::new());
        let engine = TxnEngine::new(
            root.clone(),
            ThunkStore::new(Arc::new(MemoryKv::new())),
            ThunkIds::new("n1"),
        );

        let ops = parse_ops(&[
            json!(["r", "x", null]),
            json!(["append", "x", 5]),
            json!(["append", "x", 6]),
            json!(["r", "x", null]),
        ])
        .unwrap();
        let results = engine.apply(&ops).await.unwrap();

        assert_eq!(
            results,
            vec![
                json!(["r", "x", null]),
                json!(["append", "x", 5]),
                json!(["append", "x", 6]),
                json!(["r", "x", [5, 6]]),
            ]
        );
        assert_eq!(root.get(ROOT_KEY), Some(json!({"x": ["n1-1", "n1-2"]})));
    }

    #[tokio::test]
    async fn test_read_only_txn_leaves_root_untouched() {
        let root = Arc::new(MemoryKv::new());
        let engine = TxnEngine::new(
            root.clone(),
            ThunkStore::new(Arc::new(MemoryKv::new())),
            ThunkIds::new("n1"),
        );

        let staged = engine.stage(&parse_ops(&[json!(["r", 9, null])]).unwrap()).await.unwrap();
        assert!(staged.is_read_only());
        assert_eq!(engine.commit(staged).await.unwrap(), vec![json!(["r", 9, null])]);
        assert!(root.is_empty());
    }
}
