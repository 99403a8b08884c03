//! The two symmetric entry points: [`expose`] publishes a root target over
//! an endpoint, [`wrap`] connects to a peer's published root.
//!
//! Mirrors the teacher's top-level `Backend::new` / client-connect split,
//! adapted to this protocol's handshake: the exposing side's root always
//! lives at [`HANDSHAKE_ID`](crate::wire::HANDSHAKE_ID), announced the
//! moment its connection is constructed. The wrapping side treats that
//! announcement as the reply to an implicit call it never sent, so it
//! reuses the ordinary pending-call machinery rather than a bespoke
//! handshake state machine.

use std::sync::Arc;

use crate::connection::{Connection, ConnectOptions, Role};
use crate::endpoint::Endpoint;
use crate::error::ConnectionError;
use crate::proxy::RemoteProxy;
use crate::value::{Exposable, Value};

/// Publish `target` as the root object reachable over `endpoint`.
///
/// Returns immediately. The connection announces its root to the peer as
/// soon as it is constructed; a peer calling [`wrap`] on the other end of
/// `endpoint` resolves once that announcement arrives, whether it was
/// already subscribed or arrives first.
pub fn expose(target: Arc<dyn Exposable>, endpoint: Arc<dyn Endpoint>, options: ConnectOptions) -> Connection {
    let connection = Connection::new(endpoint, options, Role::Exposing);
    connection.expose_root(target);
    connection.announce_root();
    // Handler `connect` hooks run only after the handshake `return` is on
    // the wire: a hook that sends a sideband message immediately (spec.md
    // §6 `connect`) must not precede it (spec.md §8 "Handshake first").
    connection.run_connect_hooks();
    connection
}

/// Connect to a peer's published root over `endpoint`, resolving once the
/// peer's handshake announcement arrives.
pub async fn wrap(endpoint: Arc<dyn Endpoint>, options: ConnectOptions) -> Result<(Connection, RemoteProxy), ConnectionError> {
    let (connection, receiver) = Connection::new_wrapping(endpoint, options);
    match receiver.await {
        Ok(Ok(Value::Remote(proxy))) => Ok((connection, proxy)),
        Ok(Ok(_)) => Err(ConnectionError::HandshakeFailed("peer announced a non-proxy root".into())),
        Ok(Err(error)) => Err(ConnectionError::HandshakeFailed(error.to_string())),
        Err(_) => Err(ConnectionError::HandshakeFailed("connection closed before handshake completed".into())),
    }
}
