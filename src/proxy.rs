//! Handles onto peer-owned targets.
//!
//! A [`RemoteProxy`] is what a [`Value::Remote`](crate::value::Value::Remote)
//! wraps: a cheaply-cloneable reference to something the peer exposed or
//! returned. Dropping the last clone releases the reference on the peer
//! automatically, the Rust-native (deterministic-destructor) stand-in for
//! the finalization-triggered `release` of a garbage-collected runtime.

use std::sync::Arc;

use crate::connection::{Action, WeakConnection};
use crate::error::CallError;
use crate::value::Value;

/// The backing state of a [`RemoteProxy`], kept in its own type so the
/// remote cache in [`crate::registry::RemoteCache`] can hold a [`Weak`]
/// reference to it without keeping the proxy alive.
///
/// [`Weak`]: std::sync::Weak
pub(crate) struct RemoteProxyInner {
    id: u64,
    opaque: bool,
    connection: WeakConnection,
}

impl RemoteProxyInner {
    pub(crate) fn new(id: u64, opaque: bool, connection: WeakConnection) -> Self {
        RemoteProxyInner { id, opaque, connection }
    }
}

impl Drop for RemoteProxyInner {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.upgrade() {
            connection.release_remote(self.id);
        }
    }
}

/// A reference to a target exposed by the peer.
///
/// Calling a method, reading a property or writing a property on a
/// `RemoteProxy` sends a `call` message and awaits the matching
/// `return`/`throw`. Use [`RemoteProxy::property`] to defer a property read
/// so it can be folded into a later call as a single round trip.
#[derive(Clone)]
pub struct RemoteProxy(Arc<RemoteProxyInner>);

impl PartialEq for RemoteProxy {
    /// Two proxies are the same reference iff they share the same backing
    /// allocation - which, because [`crate::registry::RemoteCache`] caches
    /// by id and hands out the cached `Arc` on every later lookup, holds
    /// exactly when they were deserialized for the same id while still live
    /// (spec.md §3 invariant 2).
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for RemoteProxy {}

impl std::fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy").field("id", &self.id()).field("opaque", &self.is_opaque()).finish()
    }
}

impl RemoteProxy {
    pub(crate) fn from_inner(inner: Arc<RemoteProxyInner>) -> Self {
        RemoteProxy(inner)
    }

    /// The id this target is registered under in the peer's local registry.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether this reference was marked opaque (a handle) by the exposing
    /// side: still useful as an identity to pass around, but not something
    /// this side should try to call or read properties from.
    pub fn is_opaque(&self) -> bool {
        self.0.opaque
    }

    fn connection(&self) -> Result<crate::connection::Connection, CallError> {
        self.0.connection.upgrade().ok_or(CallError::ConnectionClosed)
    }

    /// Invoke the target itself, or a named method on it if `method` is
    /// `Some`.
    pub async fn call(&self, method: Option<&str>, args: Vec<Value>) -> Result<Value, CallError> {
        let connection = self.connection()?;
        connection
            .call_remote(self.id(), Action::Call, method.map(str::to_owned), args)
            .await
    }

    /// Read a named property.
    pub async fn get(&self, property: &str) -> Result<Value, CallError> {
        let connection = self.connection()?;
        connection
            .call_remote(self.id(), Action::Get, Some(property.to_owned()), Vec::new())
            .await
    }

    /// Write a named property.
    pub async fn set(&self, property: &str, value: Value) -> Result<(), CallError> {
        let connection = self.connection()?;
        connection
            .call_remote(self.id(), Action::Set, Some(property.to_owned()), vec![value])
            .await
            .map(|_| ())
    }

    /// Defer a property access so it can be resolved by the peer as part of
    /// handling a later call, instead of spending a separate round trip.
    pub fn property(&self, name: &str) -> ProxyProperty {
        ProxyProperty { proxy: self.clone(), property: name.to_owned() }
    }
}

/// A not-yet-resolved property access on a [`RemoteProxy`].
///
/// Mirrors the callable-and-then-able brand a dynamically typed proxy would
/// use for this (so `proxy.prop` reads like data but `proxy.prop()` still
/// calls through); Rust has neither, so the two directions are named
/// methods instead (see [`ProxyProperty::call`] and [`ProxyProperty::get`]).
#[derive(Clone)]
pub struct ProxyProperty {
    proxy: RemoteProxy,
    property: String,
}

impl std::fmt::Debug for ProxyProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyProperty").field("target", &self.proxy.id()).field("property", &self.property).finish()
    }
}

impl ProxyProperty {
    /// The id of the remote target this property is read from.
    pub fn target_id(&self) -> u64 {
        self.proxy.id()
    }

    /// The property name.
    pub fn property_name(&self) -> &str {
        &self.property
    }

    /// Call this property as a method.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, CallError> {
        self.proxy.call(Some(&self.property), args).await
    }

    /// Read this property's value.
    pub async fn get(&self) -> Result<Value, CallError> {
        self.proxy.get(&self.property).await
    }

    /// Write this property's value.
    pub async fn set(&self, value: Value) -> Result<(), CallError> {
        self.proxy.set(&self.property, value).await
    }
}
