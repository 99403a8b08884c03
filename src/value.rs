//! The public, application-facing polymorphic value graph.
//!
//! `Value` is what callers build call arguments and return values out of.
//! It generalizes the teacher's flat, per-opcode [`Argument`] enum into an
//! open graph that additionally carries callables, then-ables and explicit
//! proxy/handle/transfer markers — the things a structured-clone transport
//! cannot carry by itself and that the serializer in [`crate::serializer`]
//! must special-case.
//!
//! [`Argument`]: https://docs.rs/wayland-backend (teacher's `protocol::Argument`)

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::RemoteError;
use crate::proxy::RemoteProxy;

/// A shared, mutable sequence.
///
/// JS arrays are reference types with mutable identity, which is how cycles
/// and shared subgraphs (spec.md §3 invariant 4, §8 scenarios 4-5) arise in
/// the first place. Plain `Vec<Value>` has no such identity in Rust, so
/// arrays that participate in sharing are represented behind an `Arc<Mutex<
/// _>>`: cloning the `Arc` is how two places end up referencing "the same"
/// array, and `Arc::as_ptr` gives the serializer's visited map a stable key.
pub type SharedArray = Arc<Mutex<Vec<Value>>>;

/// A shared, mutable plain-object shape (ordered key/value pairs). See
/// [`SharedArray`] for why this is reference-counted rather than owned.
pub type SharedMap = Arc<Mutex<Vec<(String, Value)>>>;

/// A locally-exposed target: something that can receive `call`/`get`/`set`
/// actions from the peer.
///
/// Generalizes the teacher's `ObjectData` trait (per-object event dispatch)
/// into the three trapped operations of spec.md §4.6.
pub trait Exposable: downcast_rs::DowncastSync {
    /// Invoke the target itself (`method` is `None`) or a named method on it.
    fn call(
        &self,
        method: Option<&str>,
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value, RemoteError>>;

    /// Read a named property.
    fn get(&self, property: &str) -> Result<Value, RemoteError> {
        Err(RemoteError::type_error(format!("no readable property `{property}`")))
    }

    /// Write a named property.
    fn set(&self, property: &str, _value: Value) -> Result<(), RemoteError> {
        Err(RemoteError::type_error(format!("no writable property `{property}`")))
    }
}

downcast_rs::impl_downcast!(sync Exposable);

/// A byte buffer moved rather than copied across the connection, the
/// idiomatic Rust analogue of a JS `Transferable` (e.g. an `ArrayBuffer`).
///
/// Marked with [`Value::transfer`]; the serializer pushes its payload onto
/// the outgoing transfer list and the value appears raw (not wrapped) in its
/// position, per spec.md §3 invariant 6.
#[derive(Clone)]
pub struct Transfer(pub Vec<u8>);

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transfer").field(&self.0.len()).finish()
    }
}

/// A function signature suitable for [`Value::callback`].
pub type AsyncFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync;

struct FunctionTarget(Arc<AsyncFn>);

impl Exposable for FunctionTarget {
    fn call(&self, _method: Option<&str>, args: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> {
        (self.0)(args)
    }
}

/// Distinguishes the three ways a [`Value::Target`] can have been produced,
/// so the serializer can set the wire `opaque` flag and debug-mode error
/// reporting can name the right [`ValueType`](crate::wire::ValueType).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Created via [`Value::proxy`]: full member access is forwarded.
    Proxy,
    /// Created via [`Value::handle`]: only identity is exposed.
    Handle,
    /// Created via [`Value::callback`]: an implicit, unconditionally
    /// serialized proxy (spec.md §4.3 step 5).
    Callback,
}

/// The dynamic value type: what call arguments and results are built from.
pub enum Value {
    /// `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(f64),
    /// A UTF-8 string.
    String(String),
    /// A raw byte buffer transmitted as cloneable data (not moved).
    Bytes(Vec<u8>),
    /// An ordered sequence of values. See [`SharedArray`] for why this is a
    /// reference type rather than an owned `Vec`.
    Array(SharedArray),
    /// A plain-object shape: ordered key/value pairs. See [`SharedMap`].
    Map(SharedMap),
    /// A locally-exposed target, explicitly marked via [`Value::proxy`] or
    /// [`Value::handle`], or produced by [`Value::callback`].
    Target { target: Arc<dyn Exposable>, kind: TargetKind },
    /// An explicit transfer marker.
    Transfer(Transfer),
    /// A reference to a peer-owned target, e.g. one received earlier and
    /// passed back unexecuted.
    Remote(RemoteProxy),
    /// An unresolved property access on a [`RemoteProxy`]
    /// ([`crate::proxy::ProxyProperty`]), passed back to the peer without
    /// ever being awaited. The serializer encodes this directly as a
    /// `property` wire value (spec.md §4.3 "Special serializer:
    /// proxy-property") so the peer resolves it with a synchronous local
    /// read instead of this side spending a `get` round trip first.
    Property(crate::proxy::ProxyProperty),
    /// A then-able: a future that will settle to a value or a remote error.
    Future(BoxFuture<'static, Result<Value, RemoteError>>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Bytes(b) => write!(f, "Bytes[{}]", b.len()),
            Value::Array(a) => f.debug_list().entries(a.lock().iter()).finish(),
            Value::Map(m) => f.debug_map().entries(m.lock().iter().map(|(k, v)| (k, v))).finish(),
            Value::Target { kind, .. } => write!(f, "Target {{ kind: {kind:?} }}"),
            Value::Transfer(t) => write!(f, "{t:?}"),
            Value::Remote(p) => write!(f, "Remote({})", p.id()),
            Value::Property(p) => write!(f, "Property({}.{})", p.target_id(), p.property_name()),
            Value::Future(_) => write!(f, "Future(..)"),
        }
    }
}

/// Hand-written rather than derived: [`Value::Future`] wraps a boxed future,
/// which isn't `Clone`. Every other variant clones structurally; a `Future`
/// is only ever consumed once (decoded, handed to a oneshot, or awaited) and
/// never revisited, so this arm is never actually reached.
impl Clone for Value {
    fn clone(&self) -> Self {
        match self {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            Value::Number(n) => Value::Number(*n),
            Value::String(s) => Value::String(s.clone()),
            Value::Bytes(b) => Value::Bytes(b.clone()),
            Value::Array(a) => Value::Array(a.clone()),
            Value::Map(m) => Value::Map(m.clone()),
            Value::Target { target, kind } => Value::Target { target: target.clone(), kind: *kind },
            Value::Transfer(t) => Value::Transfer(t.clone()),
            Value::Remote(p) => Value::Remote(p.clone()),
            Value::Property(p) => Value::Property(p.clone()),
            Value::Future(_) => panic!("Value::Future cannot be cloned"),
        }
    }
}

impl Value {
    /// Mark `target` to be serialized as a full proxy (member access and
    /// invocation are both forwarded to the peer).
    pub fn proxy(target: Arc<dyn Exposable>) -> Value {
        Value::Target { target, kind: TargetKind::Proxy }
    }

    /// Mark `target` to be serialized as an opaque handle: the peer gets an
    /// identity it can pass back, but no member access.
    pub fn handle(target: Arc<dyn Exposable>) -> Value {
        Value::Target { target, kind: TargetKind::Handle }
    }

    /// Wrap a callback so it unconditionally serializes as a (callable)
    /// proxy, per spec.md §4.3 step 5.
    pub fn callback<F>(f: F) -> Value
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync + 'static,
    {
        Value::Target { target: Arc::new(FunctionTarget(Arc::new(f))), kind: TargetKind::Callback }
    }

    /// Mark a byte buffer to be transferred rather than copied.
    pub fn transfer(bytes: Vec<u8>) -> Value {
        Value::Transfer(Transfer(bytes))
    }

    /// Build a fresh, not-yet-shared array value.
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    /// Build a fresh, not-yet-shared plain-object value.
    pub fn object(fields: Vec<(String, Value)>) -> Value {
        Value::Map(Arc::new(Mutex::new(fields)))
    }

    /// Inverse of [`Value::proxy`]: recover the wrapped target, if any,
    /// provided `self` is a `Target` created via `proxy()`.
    pub fn get_proxy_value(&self) -> Option<Arc<dyn Exposable>> {
        match self {
            Value::Target { target, kind: TargetKind::Proxy } => Some(target.clone()),
            _ => None,
        }
    }

    /// Inverse of [`Value::handle`]: recover the wrapped target, if any,
    /// provided `self` is a `Target` created via `handle()`.
    pub fn get_handle_value(&self) -> Option<Arc<dyn Exposable>> {
        match self {
            Value::Target { target, kind: TargetKind::Handle } => Some(target.clone()),
            _ => None,
        }
    }

    /// Whether this target should be treated as opaque (no member access)
    /// when serialized.
    pub(crate) fn is_opaque(&self) -> bool {
        matches!(self, Value::Target { kind: TargetKind::Handle, .. })
    }

    /// True if this value is something the serializer must treat as a
    /// control-flow value rather than plain data (used by debug mode to
    /// detect nonempty-path violations).
    pub(crate) fn value_type(&self) -> Option<crate::wire::ValueType> {
        use crate::wire::ValueType;
        match self {
            Value::Target { kind: TargetKind::Callback, .. } => Some(ValueType::Function),
            Value::Target { .. } => Some(ValueType::Proxy),
            Value::Transfer(_) => Some(ValueType::Transfer),
            Value::Future(_) => Some(ValueType::Promise),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<crate::proxy::ProxyProperty> for Value {
    fn from(property: crate::proxy::ProxyProperty) -> Self {
        Value::Property(property)
    }
}
