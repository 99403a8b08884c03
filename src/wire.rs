//! The on-the-wire encoding of a single value position.
//!
//! Generalizes the teacher's fixed, per-opcode [`Argument`] sum (wayland's
//! `Int`/`Uint`/`Object`/`NewId`/...) into an open polymorphic value graph:
//! primitives and containers travel as raw data, while references, promises
//! and unresolved property accesses are tagged wire values discriminated by
//! [`WIRE_TAG`].
//!
//! [`Argument`]: https://docs.rs/wayland-backend (teacher's `protocol::Argument`)

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// The reserved property name used to discriminate tagged wire values.
///
/// Chosen, like the teacher's fixed wayland opcodes, to be vanishingly
/// unlikely to collide with application data.
pub const WIRE_TAG: &str = "__duplex_rpc_tag__";

/// The id reserved for the initial handshake (spec.md §3, "Id space").
pub const HANDSHAKE_ID: u64 = 0;

/// Discriminates which kind of control-flow value a [`NonCloneableError`]
/// was raised for.
///
/// [`NonCloneableError`]: crate::error::NonCloneableError
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A Rust closure / callback.
    Function,
    /// A future passed where plain data was expected.
    Promise,
    /// An explicit `proxy()`/`handle()` marker.
    Proxy,
    /// An explicit `transfer()` marker.
    Transfer,
}

/// A wire-safe, tagged-sum value: either raw cloneable data, or one of the
/// marker shapes described in spec.md §3.
///
/// Declaration order matters here: `#[serde(untagged)]` deserializes by
/// trying each variant in turn and keeping the first structural match, so
/// [`Wire::Tagged`] — which requires its [`WIRE_TAG`] discriminator field —
/// is listed before [`Wire::Map`], a plain JSON object without that field.
/// Otherwise a genuine `proxy`/`promise`/... wire value, which is *also* a
/// well-formed (if unusual) plain object, would be swallowed by `Map` first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Wire {
    /// `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number (the wire format does not distinguish int/float, matching
    /// how a structured-clone transport would treat a JS `number`).
    Number(f64),
    /// A UTF-8 string.
    String(String),
    /// A raw byte buffer (used for `Value::Bytes` and transferred binary
    /// resources that aren't explicitly marked with `transfer()`).
    Bytes(Vec<u8>),
    /// A tagged variant: `proxy`, `promise`, `property`, `thrown`, or a
    /// registered handler's wire type.
    Tagged(TaggedWire),
    /// An ordered sequence.
    Array(Vec<Wire>),
    /// A plain-object shape: ordered key/value pairs (own-enumerable
    /// string-keyed properties, per spec.md §4.3 step 9), serialized as a
    /// genuine JSON object (not the 2-element-array shape a derived
    /// `Vec<(String, Wire)>` would otherwise produce) via [`ordered_map`].
    Map(#[serde(with = "ordered_map")] Vec<(String, Wire)>),
}

/// The tagged variants of [`Wire`], kept as a separate type so the
/// `WIRE_TAG`-discriminated shape has a single, explicit home. `serde`'s
/// `tag` attribute needs a string literal rather than a `const` reference,
/// so the literal below is kept equal to [`WIRE_TAG`] by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "__duplex_rpc_tag__")]
pub enum TaggedWire {
    /// `proxy { id, opaque }` — a reference to a peer-owned target.
    #[serde(rename = "proxy")]
    Proxy {
        /// The id in the *sender's* local registry.
        id: u64,
        /// Whether this reference should be materialized as an opaque
        /// handle (see [`TargetKind::Handle`](crate::value::TargetKind::Handle))
        /// rather than a full proxy.
        opaque: bool,
    },
    /// `promise { id }` — a placeholder awaiting a settle message.
    #[serde(rename = "promise")]
    Promise {
        /// The id the peer will resolve/reject.
        id: u64,
    },
    /// `property { targetProxyId, property }` — an unresolved property
    /// access, resolved to a local property read on receipt.
    #[serde(rename = "property")]
    Property {
        /// The id of the local object to read the property from.
        target: u64,
        /// The property name.
        property: String,
    },
    /// `thrown { error }` — an error surfaced inline in a value position.
    #[serde(rename = "thrown")]
    Thrown {
        /// The serialized error.
        error: RemoteError,
    },
    /// `transfer {}` — placeholder for a buffer carried via the packet's
    /// transfer list (spec.md §3 invariant 6) rather than inlined here.
    /// The receiver reconstitutes it by taking the next buffer off the
    /// packet's transfer list, in encounter order, rather than reading any
    /// payload carried on this variant itself.
    #[serde(rename = "transfer")]
    Transfer,
    /// A shape produced by a registered [`Handler`](crate::handler::Handler).
    #[serde(rename = "handler")]
    Handler {
        /// The handler's unique wire-type tag.
        wire_type: String,
        /// The handler-defined payload.
        payload: Box<Wire>,
    },
}

/// Serializes `Vec<(String, Wire)>` as a genuine JSON object (preserving
/// insertion order) instead of the array-of-2-tuples a plain derived
/// `Serialize` on a tuple vector would produce, which `#[serde(untagged)]`
/// could otherwise confuse with [`Wire::Array`].
mod ordered_map {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::Wire;

    pub(super) fn serialize<S>(fields: &[(String, Wire)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (key, value) in fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, Wire)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = Vec<(String, Wire)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of string keys to wire values")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Wire>()? {
                    fields.push(entry);
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

impl Wire {
    /// Construct the wire form of a proxy reference.
    pub fn proxy(id: u64, opaque: bool) -> Self {
        Wire::Tagged(TaggedWire::Proxy { id, opaque })
    }

    /// Construct the wire form of a pending promise.
    pub fn promise(id: u64) -> Self {
        Wire::Tagged(TaggedWire::Promise { id })
    }

    /// Construct the wire form of an unresolved property access.
    pub fn property(target: u64, property: impl Into<String>) -> Self {
        Wire::Tagged(TaggedWire::Property { target, property: property.into() })
    }

    /// Construct the wire form of a thrown error.
    pub fn thrown(error: RemoteError) -> Self {
        Wire::Tagged(TaggedWire::Thrown { error })
    }

    /// Construct the wire placeholder for a buffer carried via the packet's
    /// transfer list.
    pub fn transfer() -> Self {
        Wire::Tagged(TaggedWire::Transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A `Map` must serialize as a genuine JSON object, and round-trip back
    /// through `serde_json` (not just through the in-memory enum) as a
    /// `Map` rather than being confused with `Array` under
    /// `#[serde(untagged)]`.
    #[test]
    fn map_round_trips_through_json_as_an_object_not_an_array() {
        let wire = Wire::Map(vec![("n".to_string(), Wire::Number(7.0)), ("ok".to_string(), Wire::Bool(true))]);
        let text = serde_json::to_string(&wire).unwrap();
        assert!(text.starts_with('{'), "expected a JSON object, got {text}");

        let decoded: Wire = serde_json::from_str(&text).unwrap();
        let Wire::Map(fields) = decoded else { panic!("expected Wire::Map back, got {decoded:?}") };
        assert_eq!(fields.len(), 2);
        assert!(matches!(&fields[0], (k, Wire::Number(n)) if k == "n" && *n == 7.0));
        assert!(matches!(&fields[1], (k, Wire::Bool(b)) if k == "ok" && *b));
    }

    /// A tagged wire value round-trips as `Wire::Tagged`, not `Wire::Map`,
    /// even though both are plain JSON objects on the wire.
    #[test]
    fn tagged_value_round_trips_through_json_as_tagged_not_map() {
        let wire = Wire::proxy(7, false);
        let text = serde_json::to_string(&wire).unwrap();
        let decoded: Wire = serde_json::from_str(&text).unwrap();
        assert!(matches!(decoded, Wire::Tagged(TaggedWire::Proxy { id: 7, opaque: false })));
    }
}
