//! How each CRDT answers client `add` and `read` requests.

use jasper_core::{Datum, GCounter, GSet, Lattice, PNCounter};
use jasper_node::{Body, NodeError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A lattice that a replica node can serve.
///
/// The serde form is what travels in `replicate` messages, so it must carry
/// the full state.
pub trait Replicated: Lattice + Serialize + DeserializeOwned + Send + 'static {
    /// Workload name, used in logs.
    const NAME: &'static str;

    /// Apply a client `add` on behalf of the local replica `replica`.
    fn apply_add(&mut self, replica: &str, body: &Body) -> Result<()>;

    /// The `value` of a `read_ok` reply.
    fn read_value(&self) -> Value;
}

impl Replicated for GCounter<String> {
    const NAME: &'static str = "g-counter";

    fn apply_add(&mut self, replica: &str, body: &Body) -> Result<()> {
        let delta: i64 = body.field("delta")?;
        let amount = u64::try_from(delta).map_err(|_| {
            NodeError::MalformedRequest(format!("g-counter delta must be non-negative, got {}", delta))
        })?;
        self.increment(replica.to_string(), amount);
        Ok(())
    }

    fn read_value(&self) -> Value {
        Value::from(self.value())
    }
}

impl Replicated for PNCounter<String> {
    const NAME: &'static str = "pn-counter";

    fn apply_add(&mut self, replica: &str, body: &Body) -> Result<()> {
        let delta: i64 = body.field("delta")?;
        self.add(replica.to_string(), delta);
        Ok(())
    }

    fn read_value(&self) -> Value {
        Value::from(self.value())
    }
}

impl Replicated for GSet<Datum> {
    const NAME: &'static str = "g-set";

    fn apply_add(&mut self, _replica: &str, body: &Body) -> Result<()> {
        let element: Datum = body.field("element")?;
        self.insert(element);
        Ok(())
    }

    fn read_value(&self) -> Value {
        Value::Array(self.iter().map(|d| d.as_value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gcounter_add_and_read() {
        let mut counter = GCounter::<String>::new();
        counter.apply_add("n1", &Body::new("add").with("delta", 3)).unwrap();
        counter.apply_add("n1", &Body::new("add").with("delta", 0)).unwrap();
        assert_eq!(counter.read_value(), json!(3));
        assert_eq!(counter.get(&"n1".to_string()), 3);
    }

    #[test]
    fn test_gcounter_rejects_negative_delta() {
        let mut counter = GCounter::<String>::new();
        let err = counter
            .apply_add("n1", &Body::new("add").with("delta", -1))
            .unwrap_err();
        assert!(matches!(err, NodeError::MalformedRequest(_)));
        assert_eq!(counter.read_value(), json!(0));
    }

    #[test]
    fn test_pncounter_routes_by_sign() {
        let mut counter = PNCounter::<String>::new();
        counter.apply_add("n1", &Body::new("add").with("delta", 5)).unwrap();
        counter.apply_add("n1", &Body::new("add").with("delta", -7)).unwrap();
        assert_eq!(counter.read_value(), json!(-2));
        assert_eq!(counter.get_increment(&"n1".to_string()), 5);
        assert_eq!(counter.get_decrement(&"n1".to_string()), 7);
    }

    #[test]
    fn test_gset_add_any_json_element() {
        let mut set = GSet::<Datum>::new();
        set.apply_add("n1", &Body::new("add").with("element", 2)).unwrap();
        set.apply_add("n1", &Body::new("add").with("element", "a")).unwrap();
        set.apply_add("n2", &Body::new("add").with("element", 2)).unwrap();
        assert_eq!(set.read_value(), json!([2, "a"]));
    }

    #[test]
    fn test_missing_delta_is_malformed() {
        let mut counter = PNCounter::<String>::new();
        assert!(matches!(
            counter.apply_add("n1", &Body::new("add")),
            Err(NodeError::MalformedRequest(_))
        ));
    }
}
