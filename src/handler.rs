//! Pluggable wire-type handlers (spec.md §4.5, §6 "Handler contract").
//!
//! Generalizes the teacher's `ObjectData` — a per-object dispatch vtable
//! (`event`/`destroyed`) — into a per-wire-tag transform vtable, plus an
//! optional asynchronous sideband channel used for stateful cross-boundary
//! constructs (observable values, streams, reactive signals) without
//! complicating the core protocol.

use crate::error::RemoteError;
use crate::serializer::{FromWireCtx, ToWireCtx};
use crate::value::Value;
use crate::wire::Wire;

/// Context handed to a handler's lifecycle hooks.
pub trait HandlerContext: Send + Sync {
    /// Post a `handler` message tagged with this handler's wire type.
    fn send_message(&self, payload: Value);
}

/// A pluggable transform for one wire-type tag.
///
/// First registered handler whose [`Handler::can_handle`] returns true wins
/// (spec.md §6). A handler that never needs the sideband channel can leave
/// `connect`/`on_message`/`disconnect` at their no-op defaults.
pub trait Handler: Send + Sync {
    /// This handler's unique wire-type tag.
    fn wire_type(&self) -> &str;

    /// Fast predicate run during serialization for every candidate value.
    fn can_handle(&self, value: &Value) -> bool;

    /// Produce the wire-tagged payload for a value this handler claimed.
    fn to_wire(&self, value: Value, ctx: &mut ToWireCtx<'_>) -> Wire;

    /// Reconstruct a value from a wire-tagged payload matching this
    /// handler's tag. Handlers that are serialize-only may leave this at
    /// its default, which surfaces a type error to the peer.
    fn from_wire(&self, _wire: Wire, _ctx: &mut FromWireCtx<'_>) -> Result<Value, RemoteError> {
        Err(RemoteError::type_error(format!("handler for wire type `{}` does not support decoding", self.wire_type())))
    }

    /// Called once when the connection is constructed.
    fn connect(&self, _ctx: &dyn HandlerContext) {}

    /// Called on receipt of a `handler` message tagged with this handler's
    /// wire type.
    fn on_message(&self, _payload: Value, _ctx: &dyn HandlerContext) {}

    /// Called when the connection is closed.
    fn disconnect(&self) {}
}

/// An ordered list of registered handlers, consulted in order by the
/// serializer and used to route incoming `handler` messages by tag.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<std::sync::Arc<dyn Handler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("wire_types", &self.handlers.iter().map(|h| h.wire_type()).collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<std::sync::Arc<dyn Handler>>) -> Self {
        Self { handlers }
    }

    /// First handler whose [`Handler::can_handle`] returns true for `value`.
    pub(crate) fn find_for_value(&self, value: &Value) -> Option<&std::sync::Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.can_handle(value))
    }

    /// Handler registered under `wire_type`, used to route incoming
    /// `handler` messages and tagged wire values.
    pub(crate) fn find_for_tag(&self, wire_type: &str) -> Option<&std::sync::Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.wire_type() == wire_type)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &std::sync::Arc<dyn Handler>> {
        self.handlers.iter()
    }
}
