//! Conversion between [`Value`] and [`Wire`].
//!
//! This is where the open value graph gets flattened onto a wire format that
//! cannot natively express shared or cyclic object identity the way a real
//! structured-clone transport can (see the module docs below for how that
//! gap is closed). Generalizes the teacher's flat per-argument encode/decode
//! (`Argument::with_interface`) into a recursive walk over an open graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::connection::{ConnState, Pending, WeakConnection};
use crate::error::{NonCloneableError, RemoteError};
use crate::handler::{Handler, HandlerRegistry};
use crate::proxy::{RemoteProxy, RemoteProxyInner};
use crate::value::{TargetKind, Value};
use crate::wire::{TaggedWire, ValueType, Wire};

/// Everything [`to_wire`] needs beyond the value itself: where to register
/// new local targets and shared containers, which handlers apply, and where
/// to stash transfer buffers and futures discovered along the way.
pub struct ToWireCtx<'a> {
    pub(crate) state: &'a mut ConnState,
    pub(crate) handlers: &'a HandlerRegistry,
    pub(crate) transfers: Vec<Vec<u8>>,
    pub(crate) pending_futures: Vec<(u64, BoxFuture<'static, Result<Value, RemoteError>>)>,
    pub(crate) nested_proxies: bool,
    pub(crate) debug: bool,
    path: Vec<String>,
}

impl<'a> ToWireCtx<'a> {
    pub(crate) fn new(state: &'a mut ConnState, handlers: &'a HandlerRegistry, nested_proxies: bool, debug: bool) -> Self {
        ToWireCtx { state, handlers, transfers: Vec::new(), pending_futures: Vec::new(), nested_proxies, debug, path: Vec::new() }
    }

    /// The dotted path to whatever is currently being encoded, for
    /// structural error messages.
    pub fn path(&self) -> String {
        self.path.join(".")
    }

    /// Recursively encode a nested value, for handlers whose payload
    /// contains further application values.
    pub fn recurse(&mut self, value: Value) -> Result<Wire, NonCloneableError> {
        encode(value, &mut Counts::default(), self)
    }
}

impl std::fmt::Debug for ToWireCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToWireCtx").field("path", &self.path()).finish_non_exhaustive()
    }
}

/// Everything [`from_wire`] needs to reconstruct values, including proxies
/// that must be registered or looked up against the live connection.
pub struct FromWireCtx<'a> {
    pub(crate) state: &'a mut ConnState,
    pub(crate) handlers: &'a HandlerRegistry,
    pub(crate) connection: WeakConnection,
    pub(crate) transfers: &'a mut std::vec::IntoIter<Vec<u8>>,
    /// Traversal-local cache of proxy ids already resolved during this
    /// decode pass (spec.md §4.4 step 2), so that a reference occurring more
    /// than once in the same payload (e.g. across two call arguments)
    /// reconstructs to the same `Value` rather than two independent ones.
    /// Complements, rather than replaces, the connection-lifetime caches in
    /// [`ConnState`] (`owned_container`, `local`, `remote`): this one is
    /// reset at the start of every [`from_wire_many`]/[`from_wire`] call.
    visited: HashMap<u64, Value>,
}

impl<'a> FromWireCtx<'a> {
    pub(crate) fn new(
        state: &'a mut ConnState,
        handlers: &'a HandlerRegistry,
        connection: WeakConnection,
        transfers: &'a mut std::vec::IntoIter<Vec<u8>>,
    ) -> Self {
        FromWireCtx { state, handlers, connection, transfers, visited: HashMap::new() }
    }

    /// Recursively decode a nested wire value, for handlers whose payload
    /// contains further wire values.
    pub fn recurse(&mut self, wire: Wire) -> Result<Value, RemoteError> {
        decode(wire, self)
    }
}

impl std::fmt::Debug for FromWireCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FromWireCtx").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Counts {
    counts: HashMap<usize, u32>,
    in_progress: HashSet<usize>,
}

fn ptr_key<T>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc) as *const () as usize
}

fn count_refs(value: &Value, counts: &mut Counts) {
    match value {
        Value::Array(arc) => {
            let key = ptr_key(arc);
            *counts.counts.entry(key).or_insert(0) += 1;
            if counts.in_progress.insert(key) {
                for item in arc.lock().iter() {
                    count_refs(item, counts);
                }
                counts.in_progress.remove(&key);
            }
        }
        Value::Map(arc) => {
            let key = ptr_key(arc);
            *counts.counts.entry(key).or_insert(0) += 1;
            if counts.in_progress.insert(key) {
                for (_, item) in arc.lock().iter() {
                    count_refs(item, counts);
                }
                counts.in_progress.remove(&key);
            }
        }
        _ => {}
    }
}

/// Serialize `value` into its wire form, registering any targets,
/// containers or pending futures it carries along the way.
pub(crate) fn to_wire(value: Value, ctx: &mut ToWireCtx<'_>) -> Result<Wire, NonCloneableError> {
    let mut counts = Counts::default();
    count_refs(&value, &mut counts);
    encode(value, &mut counts, ctx)
}

/// Serialize a whole batch of top-level values (e.g. one call's argument
/// list) through a single shared ref-count pass, per spec.md §4.5: a value
/// referenced from two different top-level positions (not just twice within
/// one of them) must still be recognized as shared and registered as one
/// container, so both positions decode back to the same object.
pub(crate) fn to_wire_many(values: Vec<Value>, ctx: &mut ToWireCtx<'_>) -> Result<Vec<Wire>, NonCloneableError> {
    let mut counts = Counts::default();
    for value in &values {
        count_refs(value, &mut counts);
    }
    values.into_iter().map(|value| encode(value, &mut counts, ctx)).collect()
}

fn check_nonempty(ctx: &ToWireCtx<'_>, value_type: ValueType) -> Result<(), NonCloneableError> {
    if ctx.path.is_empty() || ctx.nested_proxies {
        return Ok(());
    }
    let path = if ctx.debug { ctx.path() } else { String::new() };
    Err(NonCloneableError { value_type, path })
}

fn encode(value: Value, counts: &mut Counts, ctx: &mut ToWireCtx<'_>) -> Result<Wire, NonCloneableError> {
    if let Some(handler) = ctx.handlers.find_for_value(&value).cloned() {
        let wire_type = handler.wire_type().to_owned();
        let payload = handler.to_wire(value, ctx);
        return Ok(Wire::Tagged(TaggedWire::Handler { wire_type, payload: Box::new(payload) }));
    }

    match value {
        Value::Null => Ok(Wire::Null),
        Value::Bool(b) => Ok(Wire::Bool(b)),
        Value::Number(n) => Ok(Wire::Number(n)),
        Value::String(s) => Ok(Wire::String(s)),
        Value::Bytes(b) => Ok(Wire::Bytes(b)),

        Value::Array(arc) => {
            let key = ptr_key(&arc);
            if counts.counts.get(&key).copied().unwrap_or(0) > 1 {
                let id = ctx.state.register_container(key, Value::Array(arc));
                return Ok(Wire::proxy(id, false));
            }
            let items = std::mem::take(&mut *arc.lock());
            let mut wire_items = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                ctx.path.push(index.to_string());
                let wire = encode(item, counts, ctx);
                ctx.path.pop();
                wire_items.push(wire?);
            }
            Ok(Wire::Array(wire_items))
        }

        Value::Map(arc) => {
            let key = ptr_key(&arc);
            if counts.counts.get(&key).copied().unwrap_or(0) > 1 {
                let id = ctx.state.register_container(key, Value::Map(arc));
                return Ok(Wire::proxy(id, false));
            }
            let fields = std::mem::take(&mut *arc.lock());
            let mut wire_fields = Vec::with_capacity(fields.len());
            for (name, item) in fields.into_iter() {
                ctx.path.push(name.clone());
                let wire = encode(item, counts, ctx);
                ctx.path.pop();
                wire_fields.push((name, wire?));
            }
            Ok(Wire::Map(wire_fields))
        }

        Value::Target { target, kind } => {
            let value_type = if matches!(kind, TargetKind::Callback) { ValueType::Function } else { ValueType::Proxy };
            check_nonempty(ctx, value_type)?;
            let id = if let Some(id) = ctx.state.local.id_of(&target) {
                id
            } else {
                let id = ctx.state.alloc_id();
                ctx.state.local.insert(id, target);
                id
            };
            Ok(Wire::proxy(id, matches!(kind, TargetKind::Handle)))
        }

        Value::Transfer(transfer) => {
            check_nonempty(ctx, ValueType::Transfer)?;
            // Moved, not cloned, onto the transfer list: the wire position
            // carries only a placeholder (`Wire::transfer()`), so the buffer
            // exists in exactly one place in the outgoing packet rather than
            // being duplicated into the JSON payload too (spec.md §5: a
            // transferred buffer "cease[s] to be usable on the sending side
            // immediately after send").
            ctx.transfers.push(transfer.0);
            Ok(Wire::transfer())
        }

        Value::Remote(proxy) => Ok(Wire::proxy(proxy.id(), proxy.is_opaque())),

        Value::Property(property) => Ok(Wire::property(property.target_id(), property.property_name())),

        Value::Future(future) => {
            check_nonempty(ctx, ValueType::Promise)?;
            let id = ctx.state.alloc_id();
            ctx.pending_futures.push((id, future));
            Ok(Wire::promise(id))
        }
    }
}

/// Reconstruct a value from its wire form.
pub(crate) fn from_wire(wire: Wire, ctx: &mut FromWireCtx<'_>) -> Result<Value, RemoteError> {
    decode(wire, ctx)
}

/// Reconstruct a whole batch of top-level wire values (e.g. one call's
/// argument list) through the same [`FromWireCtx`], so a proxy id referenced
/// from two different top-level positions resolves to one shared `Value`
/// (the decode-side half of [`to_wire_many`]).
pub(crate) fn from_wire_many(wires: Vec<Wire>, ctx: &mut FromWireCtx<'_>) -> Result<Vec<Value>, RemoteError> {
    wires.into_iter().map(|wire| decode(wire, ctx)).collect()
}

/// Clone a [`Value`] known to be one of the variants [`decode`] caches in
/// [`FromWireCtx::visited`] (containers, targets, remote proxies) — never a
/// `Future`, which [`decode`] never stores there.
fn clone_cached(value: &Value) -> Value {
    match value {
        Value::Array(arc) => Value::Array(arc.clone()),
        Value::Map(arc) => Value::Map(arc.clone()),
        Value::Target { target, kind } => Value::Target { target: target.clone(), kind: *kind },
        Value::Remote(proxy) => Value::Remote(proxy.clone()),
        other => unreachable!("decode never caches a {other:?} under a proxy id"),
    }
}

fn decode(wire: Wire, ctx: &mut FromWireCtx<'_>) -> Result<Value, RemoteError> {
    match wire {
        Wire::Null => Ok(Value::Null),
        Wire::Bool(b) => Ok(Value::Bool(b)),
        Wire::Number(n) => Ok(Value::Number(n)),
        Wire::String(s) => Ok(Value::String(s)),
        Wire::Bytes(b) => Ok(Value::Bytes(b)),
        Wire::Array(items) => {
            let mut decoded = Vec::with_capacity(items.len());
            for item in items {
                decoded.push(decode(item, ctx)?);
            }
            Ok(Value::array(decoded))
        }
        Wire::Map(fields) => {
            let mut decoded = Vec::with_capacity(fields.len());
            for (name, item) in fields {
                decoded.push((name, decode(item, ctx)?));
            }
            Ok(Value::object(decoded))
        }
        Wire::Tagged(TaggedWire::Proxy { id, opaque }) => {
            // spec.md §4.4 step 2: a proxy id seen more than once within this
            // decode pass (e.g. the same shared subgraph referenced by two
            // call arguments) must resolve to the same `Value` every time.
            if let Some(value) = ctx.visited.get(&id) {
                return Ok(clone_cached(value));
            }

            // spec.md §4.4 step 3: if `id` names something *we* registered
            // (a shared/cyclic container, or a target we exposed), this is
            // our own value bouncing back rather than a fresh reference to
            // something the peer owns - reconstitute the original instead
            // of wrapping it in another layer of proxy.
            let value = if let Some(value) = ctx.state.owned_container(id) {
                value
            } else if let Some(target) = ctx.state.local.get(id) {
                if opaque {
                    Value::handle(target)
                } else {
                    Value::proxy(target)
                }
            } else if let Some(inner) = ctx.state.remote.get(id) {
                Value::Remote(RemoteProxy::from_inner(inner))
            } else {
                let inner = Arc::new(RemoteProxyInner::new(id, opaque, ctx.connection.clone()));
                ctx.state.remote.insert(id, &inner);
                Value::Remote(RemoteProxy::from_inner(inner))
            };

            ctx.visited.insert(id, clone_cached(&value));
            Ok(value)
        }
        Wire::Tagged(TaggedWire::Promise { id }) => {
            let (sender, receiver) = oneshot::channel();
            ctx.state.pending.insert(id, Pending::Promise(sender));
            let future = receiver
                .map(|result| result.unwrap_or_else(|_| Err(RemoteError::new("connection closed"))))
                .boxed();
            Ok(Value::Future(future))
        }
        Wire::Tagged(TaggedWire::Property { target, property }) => match ctx.state.local.get(target) {
            Some(object) => object.get(&property),
            None => Err(RemoteError::reference(format!("unknown target {target}"))),
        },
        Wire::Tagged(TaggedWire::Thrown { error }) => Err(error),
        Wire::Tagged(TaggedWire::Transfer) => match ctx.transfers.next() {
            Some(bytes) => Ok(Value::Bytes(bytes)),
            None => Err(RemoteError::reference("missing transfer buffer for this position")),
        },
        Wire::Tagged(TaggedWire::Handler { wire_type, payload }) => match ctx.handlers.find_for_tag(&wire_type).cloned() {
            Some(handler) => handler.from_wire(*payload, ctx),
            None => Err(RemoteError::type_error(format!("no handler registered for wire type `{wire_type}`"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;
    use crate::connection::{ConnState, Role};

    fn state() -> ConnState {
        ConnState::new(Role::Exposing)
    }

    fn weak_connection() -> WeakConnection {
        WeakConnection::dangling()
    }

    struct Noop;
    impl crate::value::Exposable for Noop {
        fn call(&self, _method: Option<&str>, _args: Vec<Value>) -> BoxFuture<'static, Result<Value, RemoteError>> {
            Box::pin(async { Ok(Value::Null) })
        }
    }

    fn encode_value(value: Value, state: &mut ConnState, handlers: &HandlerRegistry, nested_proxies: bool) -> Result<Wire, NonCloneableError> {
        encode_value_with(value, state, handlers, nested_proxies, false)
    }

    fn encode_value_with(
        value: Value,
        state: &mut ConnState,
        handlers: &HandlerRegistry,
        nested_proxies: bool,
        debug: bool,
    ) -> Result<Wire, NonCloneableError> {
        let mut ctx = ToWireCtx::new(state, handlers, nested_proxies, debug);
        to_wire(value, &mut ctx)
    }

    fn decode_value(wire: Wire, state: &mut ConnState, handlers: &HandlerRegistry) -> Result<Value, RemoteError> {
        let mut empty = Vec::new().into_iter();
        let mut ctx = FromWireCtx::new(state, handlers, weak_connection(), &mut empty);
        from_wire(wire, &mut ctx)
    }

    /// spec.md §8 "Round-trip": plain data survives encode/decode unchanged.
    #[test]
    fn round_trip_plain_data() {
        let mut state = state();
        let handlers = HandlerRegistry::default();
        let value = Value::object(vec![
            ("n".to_string(), Value::Number(7.0)),
            ("ok".to_string(), Value::Bool(true)),
            ("s".to_string(), Value::String("hi".to_string())),
        ]);
        let wire = encode_value(value, &mut state, &handlers, false).unwrap();
        let Wire::Map(fields) = &wire else { panic!("expected a map") };
        assert_eq!(fields.len(), 3);
        let decoded = decode_value(wire, &mut state, &handlers).unwrap();
        let Value::Map(fields) = decoded else { panic!("expected a map back") };
        let fields = fields.lock();
        assert!(matches!(&fields[0], (k, Value::Number(n)) if k == "n" && *n == 7.0));
        assert!(matches!(&fields[1], (k, Value::Bool(b)) if k == "ok" && *b));
        assert!(matches!(&fields[2], (k, Value::String(s)) if k == "s" && s == "hi"));
    }

    /// spec.md §3 invariant 1: the same exposed object always re-registers
    /// to the same id within a connection.
    #[test]
    fn reference_stability_same_target_same_id() {
        let mut state = state();
        let handlers = HandlerRegistry::default();
        let target: Arc<dyn crate::value::Exposable> = Arc::new(Noop);

        let first = encode_value(Value::proxy(target.clone()), &mut state, &handlers, true).unwrap();
        let second = encode_value(Value::proxy(target.clone()), &mut state, &handlers, true).unwrap();
        match (first, second) {
            (Wire::Tagged(TaggedWire::Proxy { id: a, .. }), Wire::Tagged(TaggedWire::Proxy { id: b, .. })) => {
                assert_eq!(a, b);
            }
            other => panic!("expected two proxy wires, got {other:?}"),
        }
    }

    /// spec.md §3 invariant 4 / §8 scenario 5: a map referenced from two
    /// places in the same call encodes to the same container id both times.
    #[test]
    fn shared_subgraph_same_container_same_id() {
        let mut state = state();
        let handlers = HandlerRegistry::default();
        let shared = std::sync::Arc::new(parking_lot::Mutex::new(vec![("n".to_string(), Value::Number(1.0))]));
        let a = Value::object(vec![("ref".to_string(), Value::Map(shared.clone()))]);
        let b = Value::object(vec![("ref".to_string(), Value::Map(shared.clone()))]);

        let wire = encode_value(Value::array(vec![a, b]), &mut state, &handlers, false).unwrap();
        let Wire::Array(items) = wire else { panic!("expected an array") };
        let ref_id = |item: &Wire| match item {
            Wire::Map(fields) => match &fields[0].1 {
                Wire::Tagged(TaggedWire::Proxy { id, .. }) => *id,
                other => panic!("expected a container proxy wire, got {other:?}"),
            },
            other => panic!("expected a map wire, got {other:?}"),
        };
        assert_eq!(ref_id(&items[0]), ref_id(&items[1]));
    }

    /// spec.md §4.5 / §8 scenario 5: a value shared across two *independent
    /// top-level call arguments* (not nested inside one shared wrapper, as
    /// in [`shared_subgraph_same_container_same_id`] above) must still be
    /// recognized as one container when encoded through [`to_wire_many`],
    /// and decode back to the same object (`Arc::ptr_eq`) through
    /// [`from_wire_many`]. Encoding/decoding each argument independently
    /// (one `Counts`/visited map per value) would miss this: `shared` has a
    /// ref count of only 1 within either argument alone.
    #[test]
    fn shared_subgraph_across_independent_call_arguments_preserves_identity() {
        let mut state = state();
        let handlers = HandlerRegistry::default();
        let shared = std::sync::Arc::new(parking_lot::Mutex::new(vec![("n".to_string(), Value::Number(1.0))]));
        let a = Value::object(vec![("ref".to_string(), Value::Map(shared.clone()))]);
        let b = Value::object(vec![("ref".to_string(), Value::Map(shared.clone()))]);

        let mut ctx = ToWireCtx::new(&mut state, &handlers, false, false);
        let wires = to_wire_many(vec![a, b], &mut ctx).unwrap();

        let mut empty = Vec::new().into_iter();
        let mut ctx = FromWireCtx::new(&mut state, &handlers, weak_connection(), &mut empty);
        let decoded = from_wire_many(wires, &mut ctx).unwrap();

        let field = |value: &Value| match value {
            Value::Map(fields) => match &fields.lock()[0] {
                (name, Value::Map(shared)) if name == "ref" => shared.clone(),
                other => panic!("expected a shared `ref` field, got {other:?}"),
            },
            other => panic!("expected a map value, got {other:?}"),
        };
        assert!(Arc::ptr_eq(&field(&decoded[0]), &field(&decoded[1])));
    }

    /// spec.md §4.2: releasing an id twice is a no-op the second time, never
    /// a panic or double-free.
    #[test]
    fn idempotent_release() {
        let mut state = state();
        let target: Arc<dyn crate::value::Exposable> = Arc::new(Noop);
        let id = state.alloc_id();
        state.local.insert(id, target);
        state.local.release(id);
        state.local.release(id);
        assert!(state.local.get(id).is_none());

        state.release_container(id);
        state.release_container(id);
    }

    /// spec.md §7 "Debug precision" / §8 scenario 7: with `debug: true` and
    /// `nested_proxies: false`, a callable nested at a nonempty path fails
    /// with the exact dotted path and value type.
    #[test]
    fn debug_mode_reports_exact_path() {
        let mut state = state();
        let handlers = HandlerRegistry::default();
        let callback = Value::callback(|_args| Box::pin(async { Ok(Value::Null) }));
        let nested = Value::object(vec![("b".to_string(), callback)]);
        let value = Value::object(vec![("a".to_string(), nested)]);

        let err = encode_value_with(value, &mut state, &handlers, false, true).unwrap_err();
        assert_eq!(err.path, "a.b");
        assert_eq!(err.value_type, ValueType::Function);
    }

    /// Without `debug`, the same violation is still rejected (this crate's
    /// `Wire` cannot carry an un-converted callable the way a real
    /// structured-clone transport could silently choke on one later), but
    /// without the precise path — the stand-in for "the transport's opaque
    /// error" spec.md §6 describes for plain (non-debug) mode.
    #[test]
    fn non_debug_mode_rejects_without_path() {
        let mut state = state();
        let handlers = HandlerRegistry::default();
        let callback = Value::callback(|_args| Box::pin(async { Ok(Value::Null) }));
        let nested = Value::object(vec![("b".to_string(), callback)]);
        let value = Value::object(vec![("a".to_string(), nested)]);

        let err = encode_value(value, &mut state, &handlers, false).unwrap_err();
        assert!(err.path.is_empty());
        assert_eq!(err.value_type, ValueType::Function);
    }

    /// A top-level callable has an empty path, so it's always allowed even
    /// with `nested_proxies` disabled (only a *nonempty* path is rejected).
    #[test]
    fn debug_mode_allows_top_level_callable() {
        let mut state = state();
        let handlers = HandlerRegistry::default();
        let callback = Value::callback(|_args| Box::pin(async { Ok(Value::Null) }));
        assert!(encode_value(callback, &mut state, &handlers, false).is_ok());
    }

    /// spec.md §4.3 "Special serializer: proxy-property": a property access
    /// handed back unresolved encodes directly as a `property` wire value
    /// instead of being forced through a `get` round trip first.
    #[test]
    fn unresolved_property_access_encodes_as_property_wire() {
        let mut state = state();
        let handlers = HandlerRegistry::default();
        let inner = Arc::new(RemoteProxyInner::new(7, false, weak_connection()));
        let proxy = RemoteProxy::from_inner(inner);
        let value: Value = proxy.property("name").into();

        let wire = encode_value(value, &mut state, &handlers, false).unwrap();
        match wire {
            Wire::Tagged(TaggedWire::Property { target, property }) => {
                assert_eq!(target, 7);
                assert_eq!(property, "name");
            }
            other => panic!("expected a property wire value, got {other:?}"),
        }
    }

    /// spec.md §3 "collision is prevented because each peer allocates ids
    /// only from its own counter": the two `Role`s must allocate from
    /// disjoint, non-overlapping parities so an exposing-side id and a
    /// wrapping-side id can never coincide.
    #[test]
    fn exposing_and_wrapping_roles_allocate_disjoint_id_parities() {
        let mut exposing = ConnState::new(Role::Exposing);
        let mut wrapping = ConnState::new(Role::Wrapping);

        let exposing_ids: Vec<u64> = (0..4).map(|_| exposing.alloc_id()).collect();
        let wrapping_ids: Vec<u64> = (0..4).map(|_| wrapping.alloc_id()).collect();

        assert!(exposing_ids.iter().all(|id| id % 2 == 0 && *id != 0));
        assert!(wrapping_ids.iter().all(|id| id % 2 == 1));
        assert!(exposing_ids.iter().all(|id| !wrapping_ids.contains(id)));
    }

    /// spec.md §3 invariant 6: a `transfer()`-marked buffer is moved onto the
    /// packet's transfer list, not duplicated into the wire payload, and the
    /// receiver reconstitutes it from that list rather than from an inline
    /// copy.
    #[test]
    fn transfer_marked_buffer_travels_only_via_transfer_list() {
        let mut state = state();
        let handlers = HandlerRegistry::default();
        let mut ctx = ToWireCtx::new(&mut state, &handlers, false, false);

        let wire = to_wire(Value::transfer(vec![1, 2, 3]), &mut ctx).unwrap();
        assert!(matches!(wire, Wire::Tagged(TaggedWire::Transfer)), "expected a transfer placeholder, got {wire:?}");
        assert_eq!(ctx.transfers, vec![vec![1, 2, 3]]);

        let mut transfers = ctx.transfers.clone().into_iter();
        let mut decode_ctx = FromWireCtx::new(&mut state, &handlers, weak_connection(), &mut transfers);
        let decoded = from_wire(wire, &mut decode_ctx).unwrap();
        assert!(matches!(decoded, Value::Bytes(b) if b == vec![1, 2, 3]));
    }
}
