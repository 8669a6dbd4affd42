//! Thunks: write-once value cells stored out of line.
//!
//! A snapshot refers to values only by thunk id. A thunk read back from a
//! published snapshot starts [`Thunk::Unresolved`] and is fetched on first
//! access; a thunk created by the running transaction starts resolved but
//! unsaved, and must be written before any snapshot referencing it is
//! published. Saved thunk values never change, so a fetched value can be
//! cached for the life of the process.

use crate::store::KvStore;
use jasper_node::{NodeError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Globally unique thunk address: `"{node_id}-{counter}"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThunkId(String);

impl ThunkId {
    pub fn new(node_id: &str, counter: u64) -> Self {
        ThunkId(format!("{}-{}", node_id, counter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ThunkId {
    fn from(id: String) -> Self {
        ThunkId(id)
    }
}

impl fmt::Display for ThunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out thunk ids for one node. Clones share the counter.
#[derive(Clone, Debug)]
pub struct ThunkIds {
    node_id: String,
    next: Arc<Mutex<u64>>,
}

impl ThunkIds {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_counter(node_id, Arc::new(Mutex::new(0)))
    }

    pub fn with_counter(node_id: impl Into<String>, next: Arc<Mutex<u64>>) -> Self {
        Self {
            node_id: node_id.into(),
            next,
        }
    }

    pub fn next_id(&self) -> ThunkId {
        let mut next = self.next.lock();
        *next += 1;
        ThunkId::new(&self.node_id, *next)
    }
}

/// Values of saved thunks seen so far, shared across transactions.
pub type ThunkCache = Arc<Mutex<HashMap<ThunkId, Value>>>;

/// A value cell in one of its two states.
#[derive(Clone, Debug, PartialEq)]
pub enum Thunk {
    /// Saved, value not fetched yet.
    Unresolved(ThunkId),
    /// Value in memory; `saved` tells whether the store has it too.
    Resolved {
        id: ThunkId,
        value: Value,
        saved: bool,
    },
}

impl Thunk {
    /// A new, not yet persisted value.
    pub fn fresh(id: ThunkId, value: Value) -> Self {
        Thunk::Resolved {
            id,
            value,
            saved: false,
        }
    }

    pub fn id(&self) -> &ThunkId {
        match self {
            Thunk::Unresolved(id) | Thunk::Resolved { id, .. } => id,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Thunk::Unresolved(_) => None,
            Thunk::Resolved { value, .. } => Some(value),
        }
    }

    pub fn is_saved(&self) -> bool {
        match self {
            Thunk::Unresolved(_) => true,
            Thunk::Resolved { saved, .. } => *saved,
        }
    }

    /// Fetch the value if needed and return it.
    pub async fn resolve(&mut self, store: &ThunkStore) -> Result<&Value> {
        if let Thunk::Unresolved(id) = self {
            let id = id.clone();
            let value = store.fetch(&id).await?;
            *self = Thunk::Resolved {
                id,
                value,
                saved: true,
            };
        }
        match self {
            Thunk::Resolved { value, .. } => Ok(value),
            Thunk::Unresolved(id) => Err(NodeError::Crash(format!("thunk {} not resolved", id))),
        }
    }

    /// Persist the value if it is not saved yet.
    ///
    /// Any store failure is an [`NodeError::Abort`]: the caller cannot promise
    /// the value is durable, so it must not publish a snapshot referencing it.
    pub async fn save(&mut self, store: &ThunkStore) -> Result<()> {
        if let Thunk::Resolved { id, value, saved } = self {
            if !*saved {
                store.put(id, value.clone()).await?;
                *saved = true;
            }
        }
        Ok(())
    }
}

/// Thunk persistence on top of an eventually consistent store.
pub struct ThunkStore {
    kv: Arc<dyn KvStore>,
    cache: ThunkCache,
    fetch_attempts: u32,
    fetch_backoff: Duration,
}

impl ThunkStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: ThunkCache::default(),
            fetch_attempts: 10,
            fetch_backoff: Duration::from_millis(10),
        }
    }

    pub fn with_cache(mut self, cache: ThunkCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_fetch_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.fetch_attempts = attempts.max(1);
        self.fetch_backoff = backoff;
        self
    }

    /// Read a saved thunk's value.
    ///
    /// A thunk saved by another node may not be visible here yet, so a
    /// missing key is retried a few times before giving up with
    /// [`NodeError::KeyDoesNotExist`].
    pub async fn fetch(&self, id: &ThunkId) -> Result<Value> {
        let cached = self.cache.lock().get(id).cloned();
        if let Some(value) = cached {
            return Ok(value);
        }

        for attempt in 1..=self.fetch_attempts {
            if let Some(value) = self.kv.read(id.as_str()).await? {
                self.cache.lock().insert(id.clone(), value.clone());
                return Ok(value);
            }
            debug!(thunk = %id, attempt, "thunk not visible yet");
            if attempt < self.fetch_attempts {
                tokio::time::sleep(self.fetch_backoff).await;
            }
        }
        Err(NodeError::KeyDoesNotExist(format!(
            "thunk {} not found after {} reads",
            id, self.fetch_attempts
        )))
    }

    async fn put(&self, id: &ThunkId, value: Value) -> Result<()> {
        self.kv
            .write(id.as_str(), value.clone())
            .await
            .map_err(|err| NodeError::Abort(format!("could not save thunk {}: {}", id, err)))?;
        self.cache.lock().insert(id.clone(), value);
        Ok(())
    }
}
