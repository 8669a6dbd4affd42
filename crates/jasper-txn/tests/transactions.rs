//! Transaction engine tests: atomicity under root races, abort on failed
//! thunk saves, and full request handling over a simulated cluster.

use async_trait::async_trait;
use jasper_node::sim::Cluster;
use jasper_node::{Body, NodeBuilder, NodeConfigBuilder, NodeError, Result};
use jasper_txn::{
    parse_ops, KvStore, MemoryKv, ThunkIds, ThunkStore, TxnEngine, TxnServer, LIN_KV, LWW_KV,
    ROOT_KEY,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn engine(node_id: &str, root: &Arc<MemoryKv>, thunks: &Arc<MemoryKv>) -> TxnEngine {
    let root: Arc<dyn KvStore> = root.clone();
    let thunks: Arc<dyn KvStore> = thunks.clone();
    TxnEngine::new(root, ThunkStore::new(thunks), ThunkIds::new(node_id))
}

fn ops(raw: Value) -> Vec<jasper_txn::Op> {
    let raw: Vec<Value> = serde_json::from_value(raw).unwrap();
    parse_ops(&raw).unwrap()
}

/// Thunk store whose writes always fail.
struct BrokenKv;

#[async_trait]
impl KvStore for BrokenKv {
    async fn read(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn write(&self, _key: &str, _value: Value) -> Result<()> {
        Err(NodeError::TemporarilyUnavailable("disk on fire".into()))
    }

    async fn cas(&self, _key: &str, _from: Value, _to: Value, _create: bool) -> Result<()> {
        Err(NodeError::TemporarilyUnavailable("disk on fire".into()))
    }
}

/// Store that hides every key for the first `hidden_reads` reads.
struct LaggyKv {
    inner: MemoryKv,
    hidden_reads: usize,
    reads: AtomicUsize,
}

#[async_trait]
impl KvStore for LaggyKv {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.hidden_reads {
            return Ok(None);
        }
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, value: Value) -> Result<()> {
        self.inner.write(key, value).await
    }

    async fn cas(&self, key: &str, from: Value, to: Value, create: bool) -> Result<()> {
        self.inner.cas(key, from, to, create).await
    }
}

// ============================================================================
// Engine
// ============================================================================

#[tokio::test]
async fn test_racing_transactions_have_one_winner() {
    let root = Arc::new(MemoryKv::new());
    let thunks = Arc::new(MemoryKv::new());
    let first = engine("n1", &root, &thunks);
    let second = engine("n2", &root, &thunks);

    let a = first.stage(&ops(json!([["append", "x", 1]]))).await.unwrap();
    let b = second.stage(&ops(json!([["append", "y", 2]]))).await.unwrap();

    first.commit(a).await.unwrap();
    let err = second.commit(b).await.unwrap_err();
    assert!(matches!(err, NodeError::TxnConflict(_)));
    assert_eq!(err.code().as_u32(), 30);

    // Retrying from scratch observes the winner.
    let results = second
        .apply(&ops(json!([["append", "y", 2], ["r", "x", null]])))
        .await
        .unwrap();
    assert_eq!(results[1], json!(["r", "x", [1]]));

    let check = engine("n3", &root, &thunks);
    let results = check
        .apply(&ops(json!([["r", "x", null], ["r", "y", null]])))
        .await
        .unwrap();
    assert_eq!(results, vec![json!(["r", "x", [1]]), json!(["r", "y", [2]])]);
}

#[tokio::test]
async fn test_racing_on_empty_database_has_one_winner() {
    let root = Arc::new(MemoryKv::new());
    let thunks = Arc::new(MemoryKv::new());
    let first = engine("n1", &root, &thunks);
    let second = engine("n2", &root, &thunks);

    let a = first.stage(&ops(json!([["append", "k", "a"]]))).await.unwrap();
    let b = second.stage(&ops(json!([["append", "k", "b"]]))).await.unwrap();

    assert!(second.commit(b).await.is_ok());
    assert!(matches!(
        first.commit(a).await,
        Err(NodeError::TxnConflict(_))
    ));
    assert_eq!(root.get(ROOT_KEY), Some(json!({"k": ["n2-1"]})));
}

#[tokio::test]
async fn test_failed_thunk_save_aborts_without_moving_root() {
    let root = Arc::new(MemoryKv::new());
    let root_store: Arc<dyn KvStore> = root.clone();
    let engine = TxnEngine::new(
        root_store,
        ThunkStore::new(Arc::new(BrokenKv)),
        ThunkIds::new("n1"),
    );

    let err = engine
        .apply(&ops(json!([["append", "x", 1]])))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Abort(_)));
    assert_eq!(root.get(ROOT_KEY), None);
}

#[tokio::test]
async fn test_thunk_not_yet_visible_is_retried() {
    let root = Arc::new(MemoryKv::new());
    let shared = Arc::new(MemoryKv::new());
    engine("n1", &root, &shared)
        .apply(&ops(json!([["append", "x", 7]])))
        .await
        .unwrap();

    let laggy = LaggyKv {
        inner: MemoryKv::new(),
        hidden_reads: 2,
        reads: AtomicUsize::new(0),
    };
    laggy.inner.write("n1-1", json!(7)).await.unwrap();
    let root_store: Arc<dyn KvStore> = root.clone();
    let reader = TxnEngine::new(
        root_store,
        ThunkStore::new(Arc::new(laggy)).with_fetch_retry(5, Duration::from_millis(1)),
        ThunkIds::new("n2"),
    );

    let results = reader.apply(&ops(json!([["r", "x", null]]))).await.unwrap();
    assert_eq!(results, vec![json!(["r", "x", [7]])]);
}

// ============================================================================
// Requests over the simulated cluster
// ============================================================================

fn txn_cluster(ids: &[&str], rpc_timeout_ms: u64) -> (Cluster, Arc<MemoryKv>) {
    let mut cluster = Cluster::new();
    for id in ids {
        let config = NodeConfigBuilder::new().rpc_timeout(rpc_timeout_ms).build();
        let node = TxnServer::new()
            .register(NodeBuilder::with_config(config))
            .unwrap()
            .build();
        cluster.add_node(*id, node);
    }
    let lin = Arc::new(MemoryKv::new());
    let lww = Arc::new(MemoryKv::new());
    let root = Arc::clone(&lin);
    cluster.add_service(LIN_KV, move |msg| Some(root.handle(&msg.body)));
    cluster.add_service(LWW_KV, move |msg| Some(lww.handle(&msg.body)));
    (cluster, lin)
}

#[tokio::test]
async fn test_txn_requests_share_state_across_nodes() {
    let (mut cluster, lin) = txn_cluster(&["n1", "n2"], 1000);
    cluster.init_all().await.unwrap();

    let body = Body::new("txn").with("txn", json!([["append", 1, "a"], ["append", 1, "b"]]));
    let reply = cluster.request("n1", body).await.unwrap();
    assert_eq!(reply.body.kind, "txn_ok");
    assert_eq!(
        reply.body.get("txn"),
        Some(&json!([["append", 1, "a"], ["append", 1, "b"]]))
    );

    let body = Body::new("txn").with("txn", json!([["r", 1, null], ["r", "1", null]]));
    let reply = cluster.request("n2", body).await.unwrap();
    assert_eq!(
        reply.body.get("txn"),
        Some(&json!([["r", 1, ["a", "b"]], ["r", "1", ["a", "b"]]]))
    );
    assert_eq!(lin.get(ROOT_KEY), Some(json!({"1": ["n1-1", "n1-2"]})));
}

#[tokio::test]
async fn test_bad_operation_is_rejected_with_code_12() {
    let (mut cluster, lin) = txn_cluster(&["n1"], 1000);
    cluster.init_all().await.unwrap();

    let body = Body::new("txn").with("txn", json!([["append", "x", 1], ["w", "x", 2]]));
    let reply = cluster.request("n1", body).await.unwrap();
    assert_eq!(reply.body.get("code"), Some(&json!(12)));
    assert!(lin.is_empty());
}

#[tokio::test]
async fn test_unreachable_store_times_out() {
    let mut cluster = Cluster::new();
    let config = NodeConfigBuilder::new().rpc_timeout(50).build();
    let node = TxnServer::new()
        .register(NodeBuilder::with_config(config))
        .unwrap()
        .build();
    cluster.add_node("n1", node);
    cluster.add_service(LIN_KV, |_| None);
    cluster.init_all().await.unwrap();

    let body = Body::new("txn").with("txn", json!([["r", "x", null]]));
    let reply = cluster.request("n1", body).await.unwrap();
    assert_eq!(reply.body.get("code"), Some(&json!(0)));
}

// ============================================================================
// Serial transactions match a plain map model
// ============================================================================

fn arb_op() -> impl Strategy<Value = Value> {
    let key = prop_oneof![Just(json!("a")), Just(json!("b")), Just(json!(3))];
    prop_oneof![
        key.clone().prop_map(|k| json!(["r", k, null])),
        (key, 0..100i64).prop_map(|(k, v)| json!(["append", k, v])),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn serial_transactions_match_model(
        txns in prop::collection::vec((0..2usize, prop::collection::vec(arb_op(), 1..5)), 1..8)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let root = Arc::new(MemoryKv::new());
            let thunks = Arc::new(MemoryKv::new());
            let engines = [engine("n1", &root, &thunks), engine("n2", &root, &thunks)];
            let mut model: HashMap<String, Vec<Value>> = HashMap::new();

            for (who, txn) in txns {
                let results = engines[who].apply(&ops(Value::Array(txn.clone()))).await.unwrap();
                for (op, result) in txn.iter().zip(results) {
                    let key = match &op[1] {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if op[0] == "append" {
                        model.entry(key).or_default().push(op[2].clone());
                        assert_eq!(&result, op);
                    } else {
                        let expected = model.get(&key).cloned().map(Value::Array).unwrap_or(Value::Null);
                        assert_eq!(result, json!(["r", op[1].clone(), expected]));
                    }
                }
            }
        });
    }
}
