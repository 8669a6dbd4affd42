//! Persistent database snapshot.
//!
//! A [`DbNode`] maps each key to its append history, held as thunks. Clones
//! share the underlying map; the first mutation of a clone copies it, so a
//! snapshot taken before a transaction stays intact while the transaction
//! builds its successor.
//!
//! On the wire a snapshot is a JSON object from key to the list of thunk ids.

use crate::thunk::{Thunk, ThunkId, ThunkStore};
use jasper_node::{NodeError, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct DbNode {
    entries: Arc<BTreeMap<String, Vec<Thunk>>>,
}

impl DbNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a snapshot from its stored encoding. Thunks come back
    /// unresolved. `null` is the empty database.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let object = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(object) => object,
            other => {
                return Err(NodeError::Crash(format!(
                    "stored snapshot is not an object: {}",
                    other
                )))
            }
        };

        let mut entries = BTreeMap::new();
        for (key, ids) in object {
            let ids: Vec<ThunkId> = serde_json::from_value(ids.clone()).map_err(|err| {
                NodeError::Crash(format!("stored snapshot entry {:?}: {}", key, err))
            })?;
            entries.insert(key.clone(), ids.into_iter().map(Thunk::Unresolved).collect());
        }
        Ok(Self {
            entries: Arc::new(entries),
        })
    }

    /// The stored encoding: key to list of thunk ids, in append order.
    pub fn to_wire(&self) -> Value {
        let object: Map<String, Value> = self
            .entries
            .iter()
            .map(|(key, thunks)| {
                let ids = thunks
                    .iter()
                    .map(|thunk| Value::String(thunk.id().as_str().to_string()))
                    .collect();
                (key.clone(), Value::Array(ids))
            })
            .collect();
        Value::Object(object)
    }

    pub fn get(&self, key: &str) -> Option<&[Thunk]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append `thunk` to the history of `key`.
    pub fn append(&mut self, key: impl Into<String>, thunk: Thunk) {
        Arc::make_mut(&mut self.entries)
            .entry(key.into())
            .or_default()
            .push(thunk);
    }

    /// The resolved history of `key`, or `None` if it was never appended to.
    /// Resolved values stay cached in this snapshot.
    pub async fn read(&mut self, key: &str, store: &ThunkStore) -> Result<Option<Vec<Value>>> {
        if !self.entries.contains_key(key) {
            return Ok(None);
        }
        let needs_fetch = self.entries[key]
            .iter()
            .any(|thunk| thunk.value().is_none());
        if needs_fetch {
            if let Some(thunks) = Arc::make_mut(&mut self.entries).get_mut(key) {
                for thunk in thunks.iter_mut() {
                    thunk.resolve(store).await?;
                }
            }
        }

        let values = self.entries[key]
            .iter()
            .filter_map(|thunk| thunk.value().cloned())
            .collect();
        Ok(Some(values))
    }

    pub fn has_unsaved(&self) -> bool {
        self.entries.values().flatten().any(|thunk| !thunk.is_saved())
    }

    /// Persist every thunk this snapshot holds that is not saved yet.
    pub async fn save_all(&mut self, store: &ThunkStore) -> Result<()> {
        if !self.has_unsaved() {
            return Ok(());
        }
        for thunk in Arc::make_mut(&mut self.entries).values_mut().flatten() {
            thunk.save(store).await?;
        }
        Ok(())
    }

    fn id_sets(&self) -> impl Iterator<Item = (&String, BTreeSet<&ThunkId>)> {
        self.entries
            .iter()
            .map(|(key, thunks)| (key, thunks.iter().map(Thunk::id).collect()))
    }
}

/// Snapshots are equal when every key holds the same set of thunk ids.
impl PartialEq for DbNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
            || (self.entries.len() == other.entries.len() && self.id_sets().eq(other.id_sets()))
    }
}

impl Eq for DbNode {}
