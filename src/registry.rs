//! Local (strong) and remote (weak) object registries.
//!
//! Generalizes the teacher's [`ObjectMap`] — a vector-backed, id-keyed store
//! with forward and reverse lookup — from a single strongly-tracked store
//! (Wayland objects are always strongly owned by both sides) into the two
//! registries spec.md §4.2 requires: a strong local registry for objects
//! this side exposed, and a weak remote cache for proxies this side holds
//! for peer-owned targets.
//!
//! [`ObjectMap`]: https://docs.rs/wayland-backend (teacher's `rs::map::ObjectMap`)

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::proxy::RemoteProxyInner;
use crate::value::Exposable;

/// Strong id -> object / object -> id registry for locally exposed targets.
///
/// Mirrors `ObjectMap`'s `find`/`insert_at`/`remove`, generalized from a
/// vector indexed by a compact id space (Wayland ids are densely reused) to
/// a hash map keyed by a monotonically increasing counter (spec.md §3: ids
/// are never reused within a connection's lifetime).
#[derive(Default)]
pub(crate) struct LocalRegistry {
    forward: HashMap<u64, Arc<dyn Exposable>>,
    // Reverse lookup keyed by object identity (pointer equality on the Arc's
    // allocation), not by `Arc<dyn Exposable>` itself (it isn't `Hash`).
    reverse: HashMap<usize, u64>,
}

impl LocalRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn key_of(target: &Arc<dyn Exposable>) -> usize {
        Arc::as_ptr(target) as *const () as usize
    }

    /// Look up the id already assigned to `target`, if any.
    pub(crate) fn id_of(&self, target: &Arc<dyn Exposable>) -> Option<u64> {
        self.reverse.get(&Self::key_of(target)).copied()
    }

    /// Register `target` under `id` (caller allocates the id via the
    /// connection's shared counter). Invariant 1 of spec.md §3: the same
    /// object always re-registers to the same id because callers check
    /// [`LocalRegistry::id_of`] first.
    pub(crate) fn insert(&mut self, id: u64, target: Arc<dyn Exposable>) {
        self.reverse.insert(Self::key_of(&target), id);
        self.forward.insert(id, target);
    }

    /// Retrieve the object registered under `id`.
    pub(crate) fn get(&self, id: u64) -> Option<Arc<dyn Exposable>> {
        self.forward.get(&id).cloned()
    }

    /// Remove the object registered under `id` (on receipt of a `release`).
    pub(crate) fn release(&mut self, id: u64) {
        if let Some(target) = self.forward.remove(&id) {
            self.reverse.remove(&Self::key_of(&target));
        }
    }

    /// All currently registered ids, used when closing a connection.
    pub(crate) fn ids(&self) -> Vec<u64> {
        self.forward.keys().copied().collect()
    }
}

/// Weak id -> proxy / proxy -> id cache for peer-owned targets this side
/// has materialized a [`RemoteProxy`](crate::proxy::RemoteProxy) for.
///
/// A proxy's [`Drop`](crate::proxy::RemoteProxy) impl removes its entry and
/// enqueues a `release` message — the finalization hook of spec.md §4.2.
/// Since Rust has deterministic destructors (unlike the GC-finalization the
/// spec describes as best-effort), the `release` is sent promptly rather
/// than "eventually"; this is a strictly stronger guarantee than the spec
/// requires, not a violation of it.
#[derive(Default)]
pub(crate) struct RemoteCache {
    by_id: HashMap<u64, Weak<RemoteProxyInner>>,
}

impl RemoteCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the still-live proxy for `id`, if one exists. A cleared weak
    /// reference is treated as absent (spec.md §4.2 "Deref semantics").
    pub(crate) fn get(&self, id: u64) -> Option<Arc<RemoteProxyInner>> {
        self.by_id.get(&id).and_then(Weak::upgrade)
    }

    /// Record a freshly constructed proxy.
    pub(crate) fn insert(&mut self, id: u64, inner: &Arc<RemoteProxyInner>) {
        self.by_id.insert(id, Arc::downgrade(inner));
    }

    /// Drop the cache entry for `id` (called from the proxy's `Drop` impl,
    /// or idempotently from an incoming `release`/close).
    pub(crate) fn remove(&mut self, id: u64) {
        self.by_id.remove(&id);
    }

    pub(crate) fn ids(&self) -> Vec<u64> {
        self.by_id.keys().copied().collect()
    }
}
