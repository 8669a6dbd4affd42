//! Error types for the node runtime.
//!
//! Wire-visible errors follow the maelstrom numeric taxonomy. Runtime-only
//! failures (duplicate registration, closed streams) report as `crash` if they
//! ever have to go on the wire.

use thiserror::Error;

/// Numeric error codes carried in `error` reply bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Timeout,
    NotSupported,
    TemporarilyUnavailable,
    MalformedRequest,
    Crash,
    Abort,
    KeyDoesNotExist,
    KeyAlreadyExists,
    PreconditionFailed,
    TxnConflict,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::Timeout => 0,
            ErrorCode::NotSupported => 10,
            ErrorCode::TemporarilyUnavailable => 11,
            ErrorCode::MalformedRequest => 12,
            ErrorCode::Crash => 13,
            ErrorCode::Abort => 14,
            ErrorCode::KeyDoesNotExist => 20,
            ErrorCode::KeyAlreadyExists => 21,
            ErrorCode::PreconditionFailed => 22,
            ErrorCode::TxnConflict => 30,
        }
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        Some(match code {
            0 => ErrorCode::Timeout,
            10 => ErrorCode::NotSupported,
            11 => ErrorCode::TemporarilyUnavailable,
            12 => ErrorCode::MalformedRequest,
            13 => ErrorCode::Crash,
            14 => ErrorCode::Abort,
            20 => ErrorCode::KeyDoesNotExist,
            21 => ErrorCode::KeyAlreadyExists,
            22 => ErrorCode::PreconditionFailed,
            30 => ErrorCode::TxnConflict,
            _ => return None,
        })
    }
}

/// Errors raised by the runtime, by handlers, and by remote services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("crashed: {0}")]
    Crash(String),

    #[error("aborted: {0}")]
    Abort(String),

    #[error("key does not exist: {0}")]
    KeyDoesNotExist(String),

    #[error("key already exists: {0}")]
    KeyAlreadyExists(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("transaction conflict: {0}")]
    TxnConflict(String),

    #[error("handler already registered for message type {0:?}")]
    DuplicateHandler(String),

    #[error("node has not been initialised")]
    NotInitialized,

    #[error("outbound stream closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),
}

impl NodeError {
    /// Code to report when this error becomes an `error` reply.
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::Timeout(_) => ErrorCode::Timeout,
            NodeError::NotSupported(_) => ErrorCode::NotSupported,
            NodeError::TemporarilyUnavailable(_) => ErrorCode::TemporarilyUnavailable,
            NodeError::MalformedRequest(_) => ErrorCode::MalformedRequest,
            NodeError::Abort(_) => ErrorCode::Abort,
            NodeError::KeyDoesNotExist(_) => ErrorCode::KeyDoesNotExist,
            NodeError::KeyAlreadyExists(_) => ErrorCode::KeyAlreadyExists,
            NodeError::PreconditionFailed(_) => ErrorCode::PreconditionFailed,
            NodeError::TxnConflict(_) => ErrorCode::TxnConflict,
            NodeError::Crash(_)
            | NodeError::DuplicateHandler(_)
            | NodeError::NotInitialized
            | NodeError::Closed
            | NodeError::Io(_) => ErrorCode::Crash,
        }
    }

    /// Human-readable text for the `text` field of an error reply.
    pub fn text(&self) -> String {
        match self {
            NodeError::Timeout(t)
            | NodeError::NotSupported(t)
            | NodeError::TemporarilyUnavailable(t)
            | NodeError::MalformedRequest(t)
            | NodeError::Crash(t)
            | NodeError::Abort(t)
            | NodeError::KeyDoesNotExist(t)
            | NodeError::KeyAlreadyExists(t)
            | NodeError::PreconditionFailed(t)
            | NodeError::TxnConflict(t) => t.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuild a typed error from an `error` body received off the wire.
    /// Unknown codes are treated as crashes.
    pub fn from_code(code: u32, text: impl Into<String>) -> Self {
        let text = text.into();
        match ErrorCode::from_u32(code) {
            Some(ErrorCode::Timeout) => NodeError::Timeout(text),
            Some(ErrorCode::NotSupported) => NodeError::NotSupported(text),
            Some(ErrorCode::TemporarilyUnavailable) => NodeError::TemporarilyUnavailable(text),
            Some(ErrorCode::MalformedRequest) => NodeError::MalformedRequest(text),
            Some(ErrorCode::Abort) => NodeError::Abort(text),
            Some(ErrorCode::KeyDoesNotExist) => NodeError::KeyDoesNotExist(text),
            Some(ErrorCode::KeyAlreadyExists) => NodeError::KeyAlreadyExists(text),
            Some(ErrorCode::PreconditionFailed) => NodeError::PreconditionFailed(text),
            Some(ErrorCode::TxnConflict) => NodeError::TxnConflict(text),
            Some(ErrorCode::Crash) | None => NodeError::Crash(text),
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::MalformedRequest(err.to_string())
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
