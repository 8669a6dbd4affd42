//! Message envelope and body.
//!
//! Bodies are open maps: the reserved fields are lifted into struct fields and
//! everything else stays in `fields`, so handlers can read whatever their
//! workload defines without a schema per message type.

use crate::error::{NodeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line on the wire: `{"src": .., "dest": .., "body": {..}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub src: String,
    pub dest: String,
    pub body: Body,
}

impl Message {
    /// Parse one protocol line.
    pub fn decode(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| NodeError::Crash(e.to_string()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,

    /// Caller-chosen correlation token, used instead of `in_reply_to` when
    /// one logical request fans out to many peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Body {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_callback_id(mut self, callback_id: impl Into<String>) -> Self {
        self.callback_id = Some(callback_id.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Decode a required field, failing with `MalformedRequest` if it is
    /// missing or has the wrong shape.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .fields
            .get(key)
            .ok_or_else(|| NodeError::MalformedRequest(format!("missing field `{}`", key)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| NodeError::MalformedRequest(format!("field `{}`: {}", key, e)))
    }

    /// Decode an optional field; a present-but-null value counts as absent.
    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.field(key).map(Some),
        }
    }

    /// Body of an `error` reply for `err`.
    pub fn error(err: &NodeError) -> Self {
        Body::new("error")
            .with("code", err.code().as_u32())
            .with("text", err.text())
    }

    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    /// Turn an `error` body into the matching typed error, pass anything else through.
    pub fn into_result(self) -> Result<Body> {
        if !self.is_error() {
            return Ok(self);
        }
        let code = self
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|code| u32::try_from(code).ok())
            .unwrap_or(13);
        let text = self
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Err(NodeError::from_code(code, text))
    }
}
