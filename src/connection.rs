//! The connection engine: message dispatch, pending-call bookkeeping and the
//! shared state backing both local and remote object registries.
//!
//! Generalizes the teacher's `Backend`/`Handle` split (a socket owner plus a
//! cheaply cloneable dispatch handle) into a single [`Connection`] that also
//! tracks outstanding calls and settle-pending promises, since unlike
//! Wayland's one-directional event dispatch, every `call` here expects a
//! `return` or `throw` back from the peer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::endpoint::{Endpoint, Packet};
use crate::error::{CallError, ConnectionError, RemoteError};
use crate::handler::{Handler, HandlerContext, HandlerRegistry};
use crate::proxy::{RemoteProxy, RemoteProxyInner};
use crate::registry::{LocalRegistry, RemoteCache};
use crate::serializer::{self, FromWireCtx, ToWireCtx};
use crate::value::{Exposable, Value};
use crate::wire::{Wire, HANDSHAKE_ID};

/// The trapped operation a `call` message performs against its target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Action {
    Call,
    Get,
    Set,
}

/// One protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub(crate) enum Message {
    #[serde(rename = "call")]
    Call { id: u64, target: u64, action: Action, method: Option<String>, args: Vec<Wire> },
    #[serde(rename = "return")]
    Return { id: u64, value: Wire },
    #[serde(rename = "throw")]
    Throw { id: u64, error: RemoteError },
    #[serde(rename = "resolve")]
    Resolve { id: u64, value: Wire },
    #[serde(rename = "reject")]
    Reject { id: u64, error: RemoteError },
    #[serde(rename = "release")]
    Release { id: u64 },
    #[serde(rename = "handler")]
    HandlerMessage { wire_type: String, payload: Wire },
}

pub(crate) enum Pending {
    Call(oneshot::Sender<Result<Value, RemoteError>>),
    Promise(oneshot::Sender<Result<Value, RemoteError>>),
}

/// Which side of the handshake a [`Connection`] is: determines the parity
/// its id counter allocates from.
///
/// spec.md §3 "collision is prevented because each peer allocates ids only
/// from its own counter" only holds if the two peers' counters are
/// partitioned - otherwise the exposing side's first local object and the
/// wrapping side's first local object both mint id 1, and a wire-proxy
/// referencing one is indistinguishable from a wire-proxy referencing the
/// other (`ConnState::local`/`pending` are both keyed on the raw id with no
/// owner discriminator). The teacher partitions the same way, with a fixed
/// id range per side of the `wl_display` connection.
#[derive(Clone, Copy)]
pub(crate) enum Role {
    /// Allocates even ids (2, 4, 6, ...); id 0 is reserved for the root.
    Exposing,
    /// Allocates odd ids (1, 3, 5, ...).
    Wrapping,
}

/// State shared by every clone of a [`Connection`], guarded by a single lock
/// since registry lookups, id allocation and pending-table edits are all
/// small and short-lived.
pub(crate) struct ConnState {
    pub(crate) local: LocalRegistry,
    pub(crate) remote: RemoteCache,
    pub(crate) pending: HashMap<u64, Pending>,
    containers_by_ptr: HashMap<usize, u64>,
    containers_by_id: HashMap<u64, Value>,
    next_id: u64,
    id_step: u64,
}

impl ConnState {
    pub(crate) fn new(role: Role) -> Self {
        let next_id = match role {
            Role::Exposing => 2,
            Role::Wrapping => 1,
        };
        ConnState {
            local: LocalRegistry::new(),
            remote: RemoteCache::new(),
            pending: HashMap::new(),
            containers_by_ptr: HashMap::new(),
            containers_by_id: HashMap::new(),
            next_id,
            id_step: 2,
        }
    }

    /// Allocate the next id from this side's partition (see [`Role`]).
    /// Shared by local-object registration, outgoing-call ids and outgoing
    /// promise ids alike, so every id namespace this connection hands out -
    /// `local`, `pending` call entries, and promise ids embedded in a
    /// `return`/`resolve` payload - lands in the same half of the space and
    /// can never collide with an id the peer minted from its own counter.
    pub(crate) fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += self.id_step;
        id
    }

    /// Register a shared array/map's backing allocation (keyed by its raw
    /// pointer) as a locally owned target exactly once, returning the same
    /// id on every later call for the same allocation. This is how cyclic or
    /// shared subgraphs, which a JSON wire format cannot inline without
    /// looping forever, get a stable identity on the wire instead: the whole
    /// container is sent as a `proxy` wire value and kept here so that if
    /// the peer hands it back (directly, or nested inside something else),
    /// [`ConnState::owned_container`] can reconstitute the very same `Value`
    /// instead of wrapping it in a [`crate::proxy::RemoteProxy`] pointing
    /// back at ourselves (spec.md §4.4 step 3).
    pub(crate) fn register_container(&mut self, key: usize, value: Value) -> u64 {
        if let Some(&id) = self.containers_by_ptr.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        self.containers_by_ptr.insert(key, id);
        self.containers_by_id.insert(id, value);
        id
    }

    /// The original `Value` for a container id we registered ourselves, if
    /// any. Cloning is cheap: array/map values are `Arc`-backed, so this
    /// recovers the same shared allocation rather than a copy.
    pub(crate) fn owned_container(&self, id: u64) -> Option<Value> {
        self.containers_by_id.get(&id).cloned()
    }

    /// Drop bookkeeping for a released container id (called from the
    /// `release` handler alongside [`LocalRegistry::release`]).
    pub(crate) fn release_container(&mut self, id: u64) {
        self.containers_by_id.remove(&id);
    }
}

/// Tunables governing how a [`Connection`] serializes values and which
/// pluggable wire-type handlers it consults.
#[derive(Clone, Default, Debug)]
pub struct ConnectOptions {
    /// Whether a callable, then-able, proxy or transfer marker is allowed at
    /// a nonempty path inside a call's argument or return tree (spec.md §6,
    /// option `nestedProxies`). When set, such a value is fully supported
    /// wherever it appears instead of only at the top level.
    pub nested_proxies: bool,
    /// When `nested_proxies` is off, controls how precisely a nonempty-path
    /// violation is reported (spec.md §6, option `debug`). `true` names the
    /// exact dotted path and value type; `false` reports the same error
    /// without that detail, standing in for "the transport's opaque error"
    /// a real structured-clone call would have raised instead — this crate's
    /// `Wire` has no slot for an un-converted value, so it cannot literally
    /// defer to a foreign clone routine the way the source runtime does.
    pub debug: bool,
    /// Registered handlers, consulted in registration order for both
    /// directions.
    pub handlers: HandlerRegistry,
}

struct Shared {
    endpoint: Arc<dyn Endpoint>,
    options: ConnectOptions,
    state: Mutex<ConnState>,
    closed: AtomicBool,
}

/// A live, bidirectional RPC connection over one [`Endpoint`].
///
/// Cheaply cloneable; every clone shares the same registries, pending
/// tables and endpoint subscription.
#[derive(Clone)]
pub struct Connection(Arc<Shared>);

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("closed", &self.is_closed()).finish_non_exhaustive()
    }
}

/// A non-owning reference to a [`Connection`].
///
/// Proxies and the handler context hold this rather than a strong
/// [`Connection`] so that neither keeps the connection alive on its own;
/// both simply stop doing anything once it's gone.
#[derive(Clone)]
pub(crate) struct WeakConnection(std::sync::Weak<Shared>);

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(Connection)
    }

    /// A [`WeakConnection`] that never upgrades, for constructing
    /// [`crate::serializer::FromWireCtx`] in tests that never reach the
    /// handful of decode paths which need a live connection.
    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        WeakConnection(std::sync::Weak::new())
    }
}

impl Connection {
    pub(crate) fn new(endpoint: Arc<dyn Endpoint>, options: ConnectOptions, role: Role) -> Connection {
        let shared = Arc::new(Shared {
            endpoint,
            options,
            state: Mutex::new(ConnState::new(role)),
            closed: AtomicBool::new(false),
        });
        let connection = Connection(shared);

        let weak = connection.downgrade();
        connection.0.endpoint.subscribe(Arc::new(move |packet: Packet| {
            if let Some(connection) = weak.upgrade() {
                connection.on_packet(packet);
            }
        }));

        connection
    }

    /// Run every registered handler's `connect` hook.
    ///
    /// Split out of [`Connection::new`] so the exposing side can send its
    /// handshake `return` first: a handler's `connect` may call
    /// [`HandlerContext::send_message`] (as a sideband ping would), and
    /// running that before [`Connection::announce_root`] would put a
    /// `handler` packet on the wire ahead of the handshake, violating
    /// spec.md §8 "Handshake first" ("no other message precedes it").
    pub(crate) fn run_connect_hooks(&self) {
        for handler in self.0.options.handlers.iter() {
            let ctx = MessageHandlerContext { connection: self.downgrade(), wire_type: handler.wire_type().to_owned() };
            handler.connect(&ctx);
        }
    }

    fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.0))
    }

    fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Register `target` under the reserved handshake id, used by
    /// [`crate::entry::expose`] to publish the connection's root object.
    pub(crate) fn expose_root(&self, target: Arc<dyn Exposable>) {
        self.0.state.lock().local.insert(HANDSHAKE_ID, target);
    }

    fn send_message(&self, message: &Message, transfers: Vec<Vec<u8>>) -> Result<(), ConnectionError> {
        if crate::debug::has_debug_env() {
            crate::debug::print_sent_message(message);
        }
        let bytes = serde_json::to_vec(message).map_err(|e| ConnectionError::Transport(e.to_string()))?;
        self.0.endpoint.send(Packet { bytes, transfers })
    }

    fn to_wire(&self, value: Value) -> Result<(Wire, Vec<Vec<u8>>), ConnectionError> {
        let (mut wires, transfers) = self.to_wire_many(vec![value])?;
        Ok((wires.remove(0), transfers))
    }

    /// Serialize a whole batch of top-level values (e.g. one call's argument
    /// list) through a single shared `Counts` pass, so a value referenced
    /// from two different top-level positions is still recognized as shared
    /// (spec.md §4.5) instead of being inlined twice.
    fn to_wire_many(&self, values: Vec<Value>) -> Result<(Vec<Wire>, Vec<Vec<u8>>), ConnectionError> {
        let mut state = self.0.state.lock();
        let (wires, transfers, pending_futures) = {
            let mut ctx = ToWireCtx::new(&mut *state, &self.0.options.handlers, self.0.options.nested_proxies, self.0.options.debug);
            let wires = serializer::to_wire_many(values, &mut ctx)?;
            (wires, std::mem::take(&mut ctx.transfers), std::mem::take(&mut ctx.pending_futures))
        };
        drop(state);

        for (id, future) in pending_futures {
            let connection = self.clone();
            std::thread::spawn(move || {
                let result = futures::executor::block_on(future);
                connection.settle_local_promise(id, result);
            });
        }

        Ok((wires, transfers))
    }

    fn from_wire(&self, wire: Wire, transfers: &mut std::vec::IntoIter<Vec<u8>>) -> Result<Value, RemoteError> {
        let mut state = self.0.state.lock();
        let mut ctx = FromWireCtx::new(&mut *state, &self.0.options.handlers, self.downgrade(), transfers);
        serializer::from_wire(wire, &mut ctx)
    }

    /// Deserialize a whole batch of top-level wire values (e.g. one call's
    /// argument list) through a single shared [`FromWireCtx`], the decode
    /// counterpart of [`Connection::to_wire_many`]: a proxy id referenced
    /// from two different top-level positions resolves to one shared value.
    fn from_wire_many(&self, wires: Vec<Wire>, transfers: &mut std::vec::IntoIter<Vec<u8>>) -> Result<Vec<Value>, RemoteError> {
        let mut state = self.0.state.lock();
        let mut ctx = FromWireCtx::new(&mut *state, &self.0.options.handlers, self.downgrade(), transfers);
        serializer::from_wire_many(wires, &mut ctx)
    }

    fn on_packet(&self, packet: Packet) {
        let message: Message = match serde_json::from_slice(&packet.bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping malformed packet: {err}");
                return;
            }
        };
        if crate::debug::has_debug_env() {
            crate::debug::print_received_message(&message);
        }
        self.dispatch(message, packet.transfers);
    }

    fn dispatch(&self, message: Message, transfers: Vec<Vec<u8>>) {
        let mut transfers = transfers.into_iter();
        match message {
            Message::Call { id, target, action, method, args } => {
                self.handle_call(id, target, action, method, args, &mut transfers);
            }
            Message::Return { id, value } => self.settle(id, Ok(value), &mut transfers, false),
            Message::Throw { id, error } => self.settle(id, Err(error), &mut transfers, false),
            Message::Resolve { id, value } => self.settle(id, Ok(value), &mut transfers, true),
            Message::Reject { id, error } => self.settle(id, Err(error), &mut transfers, true),
            Message::Release { id } => {
                let mut state = self.0.state.lock();
                state.local.release(id);
                state.release_container(id);
            }
            Message::HandlerMessage { wire_type, payload } => {
                let handler = self.0.options.handlers.find_for_tag(&wire_type).cloned();
                match handler {
                    Some(handler) => match self.from_wire(payload, &mut transfers) {
                        Ok(value) => {
                            let ctx = MessageHandlerContext { connection: self.downgrade(), wire_type };
                            handler.on_message(value, &ctx);
                        }
                        Err(err) => warn!("failed to decode handler message for `{wire_type}`: {err}"),
                    },
                    None => debug!("no handler registered for wire type `{wire_type}`"),
                }
            }
        }
    }

    fn handle_call(
        &self,
        id: u64,
        target: u64,
        action: Action,
        method: Option<String>,
        args: Vec<Wire>,
        transfers: &mut std::vec::IntoIter<Vec<u8>>,
    ) {
        let target_object = self.0.state.lock().local.get(target);
        let Some(target_object) = target_object else {
            let _ = self.send_message(
                &Message::Throw { id, error: RemoteError::reference(format!("unknown target {target}")) },
                Vec::new(),
            );
            return;
        };

        let decoded_args = match self.from_wire_many(args, transfers) {
            Ok(args) => args,
            Err(error) => {
                let _ = self.send_message(&Message::Throw { id, error }, Vec::new());
                return;
            }
        };

        match action {
            // The target's future may itself issue a reverse call to the
            // peer and await its reply - which arrives back on this same
            // endpoint's delivery thread. Running it with `block_on` right
            // here would park that thread and the reply could never be
            // read. Drive it on its own thread instead, so `dispatch`
            // returns immediately and the delivery thread stays free.
            Action::Call => {
                let future = target_object.call(method.as_deref(), decoded_args);
                let connection = self.clone();
                std::thread::spawn(move || {
                    let outcome = futures::executor::block_on(future);
                    connection.finish_call(id, outcome);
                });
            }
            Action::Get => {
                let outcome = target_object.get(&method.unwrap_or_default());
                self.finish_call(id, outcome);
            }
            Action::Set => {
                let value = decoded_args.into_iter().next().unwrap_or(Value::Null);
                let outcome = target_object.set(&method.unwrap_or_default(), value).map(|_| Value::Null);
                self.finish_call(id, outcome);
            }
        }
    }

    /// Serialize a call's outcome and send the matching `return`/`throw`.
    /// Split out of [`Connection::handle_call`] so `Action::Call` can invoke
    /// it from the worker thread that runs the target's future, while
    /// `Action::Get`/`Action::Set` (synchronous, no reverse-call risk) call
    /// it directly.
    fn finish_call(&self, id: u64, outcome: Result<Value, RemoteError>) {
        match outcome {
            Ok(value) => match self.to_wire(value) {
                Ok((wire, transfers)) => {
                    let _ = self.send_message(&Message::Return { id, value: wire }, transfers);
                }
                Err(err) => {
                    let _ = self.send_message(&Message::Throw { id, error: RemoteError::new(err.to_string()) }, Vec::new());
                }
            },
            Err(error) => {
                let _ = self.send_message(&Message::Throw { id, error }, Vec::new());
            }
        }
    }

    fn settle(&self, id: u64, result: Result<Wire, RemoteError>, transfers: &mut std::vec::IntoIter<Vec<u8>>, promise: bool) {
        let pending = self.0.state.lock().pending.remove(&id);
        let sender = match pending {
            Some(Pending::Call(sender)) if !promise => sender,
            Some(Pending::Promise(sender)) if promise => sender,
            Some(_) => {
                trace!("id {id} settled with mismatched pending kind");
                return;
            }
            None => {
                trace!("no pending entry for id {id}");
                return;
            }
        };
        let decoded = match result {
            Ok(wire) => self.from_wire(wire, transfers),
            Err(error) => Err(error),
        };
        let _ = sender.send(decoded);
    }

    /// Issue a `call`/`get`/`set` against a peer-owned target and await the
    /// matching reply.
    pub(crate) async fn call_remote(
        &self,
        target: u64,
        action: Action,
        method: Option<String>,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        if self.is_closed() {
            return Err(CallError::ConnectionClosed);
        }

        // Serialized together, through one shared `Counts` pass, so a value
        // referenced from two different arguments (spec.md §4.5, §8 scenario
        // 5) is recognized as shared rather than inlined independently into
        // each argument's payload.
        let (wire_args, transfers) = self.to_wire_many(args)?;

        let (sender, receiver) = oneshot::channel();
        let id = {
            let mut state = self.0.state.lock();
            let id = state.alloc_id();
            state.pending.insert(id, Pending::Call(sender));
            id
        };

        self.send_message(&Message::Call { id, target, action, method, args: wire_args }, transfers)?;

        match receiver.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(CallError::Remote(error)),
            Err(_) => Err(CallError::ConnectionClosed),
        }
    }

    /// Send the settle message for a promise id that originated locally,
    /// because one of our own call results contained a [`Value::Future`].
    fn settle_local_promise(&self, id: u64, result: Result<Value, RemoteError>) {
        match result {
            Ok(value) => match self.to_wire(value) {
                Ok((wire, transfers)) => {
                    let _ = self.send_message(&Message::Resolve { id, value: wire }, transfers);
                }
                Err(err) => {
                    let _ = self.send_message(&Message::Reject { id, error: RemoteError::new(err.to_string()) }, Vec::new());
                }
            },
            Err(error) => {
                let _ = self.send_message(&Message::Reject { id, error }, Vec::new());
            }
        }
    }

    /// Send a `handler` message tagged with `wire_type`.
    fn send_handler_message(&self, wire_type: &str, payload: Value) {
        if let Ok((wire, transfers)) = self.to_wire(payload) {
            let _ = self.send_message(&Message::HandlerMessage { wire_type: wire_type.to_owned(), payload: wire }, transfers);
        }
    }

    /// Look up, or materialize, the remote proxy for a given id (used by
    /// [`crate::entry::wrap`] for the handshake root).
    pub(crate) fn remote_proxy(&self, id: u64, opaque: bool) -> RemoteProxy {
        let mut state = self.0.state.lock();
        if let Some(inner) = state.remote.get(id) {
            return RemoteProxy::from_inner(inner);
        }
        let inner = Arc::new(RemoteProxyInner::new(id, opaque, self.downgrade()));
        state.remote.insert(id, &inner);
        RemoteProxy::from_inner(inner)
    }

    pub(crate) fn release_remote(&self, id: u64) {
        if self.is_closed() {
            return;
        }
        self.0.state.lock().remote.remove(id);
        let _ = self.send_message(&Message::Release { id }, Vec::new());
    }

    /// Announce this connection's handshake root to the peer. The exposing
    /// side's root always lives at [`HANDSHAKE_ID`]; this is a `return` for
    /// that id with no matching `call`, which the wrapping side accepts by
    /// pre-registering a pending entry under the same id (see
    /// [`Connection::new_wrapping`]).
    pub(crate) fn announce_root(&self) {
        let _ = self.send_message(&Message::Return { id: HANDSHAKE_ID, value: Wire::proxy(HANDSHAKE_ID, false) }, Vec::new());
    }

    /// Build a connection that expects the peer's handshake announcement,
    /// returning a receiver that resolves once it arrives.
    pub(crate) fn new_wrapping(
        endpoint: Arc<dyn Endpoint>,
        options: ConnectOptions,
    ) -> (Connection, oneshot::Receiver<Result<Value, RemoteError>>) {
        let connection = Connection::new(endpoint, options, Role::Wrapping);
        let (sender, receiver) = oneshot::channel();
        connection.0.state.lock().pending.insert(HANDSHAKE_ID, Pending::Call(sender));
        connection.run_connect_hooks();
        (connection, receiver)
    }

    /// Close the connection: unsubscribe from the endpoint and fail every
    /// outstanding call and promise with [`CallError::ConnectionClosed`].
    pub fn close(&self) {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.0.endpoint.unsubscribe();
        let pending: Vec<_> = {
            let mut state = self.0.state.lock();
            for id in state.local.ids() {
                state.local.release(id);
            }
            for id in state.remote.ids() {
                state.remote.remove(id);
            }
            state.pending.drain().map(|(_, p)| p).collect()
        };
        for pending in pending {
            let sender = match pending {
                Pending::Call(sender) | Pending::Promise(sender) => sender,
            };
            let _ = sender.send(Err(RemoteError::new("connection closed")));
        }
        for handler in self.0.options.handlers.iter() {
            handler.disconnect();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.endpoint.unsubscribe();
    }
}

struct MessageHandlerContext {
    connection: WeakConnection,
    wire_type: String,
}

impl HandlerContext for MessageHandlerContext {
    fn send_message(&self, payload: Value) {
        if let Some(connection) = self.connection.upgrade() {
            connection.send_handler_message(&self.wire_type, payload);
        }
    }
}
