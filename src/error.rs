//! Error taxonomy for the connection engine.

use thiserror::Error;

use crate::wire::ValueType;

/// An error generated when trying to act on an id that is no longer (or never
/// was) valid on this side of the connection.
#[derive(Debug, Clone, Error)]
#[error("invalid or unknown id {id}")]
pub struct InvalidId {
    /// The id that was looked up.
    pub id: u64,
}

/// An error surfaced by the remote peer in response to a `call`/`get`/`set`.
///
/// This is the Rust-side reconstruction of a `thrown` wire value: name,
/// message and an optional stack trace, round-tripped without attempting to
/// resurrect the original error type on the other side of the boundary.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("{name}: {message}")]
pub struct RemoteError {
    /// Error "class" name, e.g. `TypeError`, `ReferenceError`.
    pub name: String,
    /// Human readable message.
    pub message: String,
    /// Optional stack trace, opaque to this crate.
    pub stack: Option<String>,
}

impl RemoteError {
    /// Build a remote error carrying just a message (`name` defaults to
    /// `Error`), the common case when surfacing a local failure to the peer.
    pub fn new(message: impl Into<String>) -> Self {
        RemoteError { name: "Error".into(), message: message.into(), stack: None }
    }

    pub(crate) fn reference(message: impl Into<String>) -> Self {
        RemoteError { name: "ReferenceError".into(), message: message.into(), stack: None }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        RemoteError { name: "TypeError".into(), message: message.into(), stack: None }
    }
}

/// A structural violation detected while serializing a value in debug mode:
/// a callable, then-able, proxy marker or transfer marker was found at a
/// nonempty path while `nested_proxies` is disabled (spec.md §7, debug mode).
#[derive(Debug, Clone, Error)]
#[error("non-cloneable {value_type:?} found at `{path}` (enable nested_proxies or restructure the call)")]
pub struct NonCloneableError {
    /// The kind of control-flow value that was found.
    pub value_type: ValueType,
    /// Dotted path to the offending value, e.g. `options.handlers[2].fn`.
    pub path: String,
}

/// Failure of a single outgoing call (method invocation, property get/set).
#[derive(Debug, Error)]
pub enum CallError {
    /// The remote target threw / rejected.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The connection was closed before a settle message arrived.
    #[error("connection closed while awaiting a reply")]
    ConnectionClosed,
    /// The underlying transport failed to send the request.
    #[error(transparent)]
    Transport(#[from] ConnectionError),
}

/// Fatal or structural failures of the connection itself.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The endpoint failed to accept or deliver a message.
    #[error("transport error: {0}")]
    Transport(String),
    /// A value could not be serialized onto the wire.
    #[error(transparent)]
    NonCloneable(#[from] NonCloneableError),
    /// An id referenced by an incoming message is unknown.
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    /// The handshake did not complete (peer closed, or sent something other
    /// than the expected handshake `return`).
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}
