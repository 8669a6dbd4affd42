//! Opaque JSON values with a total order, so they can live in sets.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A JSON value treated as an opaque, totally ordered element.
///
/// Ordering is by compact JSON encoding. Objects encode with sorted keys,
/// so two equal values always encode identically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Datum(pub Value);

impl Datum {
    pub fn new(value: impl Into<Value>) -> Self {
        Datum(value.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Datum {
    fn from(value: Value) -> Self {
        Datum(value)
    }
}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0 == other.0 {
            return Ordering::Equal;
        }
        let by_kind = kind_rank(&self.0).cmp(&kind_rank(&other.0));
        if by_kind != Ordering::Equal {
            return by_kind;
        }
        let by_number = match (self.0.as_f64(), other.0.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => Ordering::Equal,
        };
        by_number.then_with(|| self.0.to_string().cmp(&other.0.to_string()))
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
