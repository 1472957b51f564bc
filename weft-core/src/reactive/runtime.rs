//! Dependency Graph
//!
//! The graph is the central coordinator that connects reactive state to the
//! effects that read it. It maps a target identity to a map from property
//! key to a [`Dep`], the set of effects subscribed to that one property.
//!
//! # How It Works
//!
//! 1. When a reactive property is read while an effect is running, `track`
//!    inserts the running effect into the property's dep and records the
//!    reverse link on the effect.
//!
//! 2. When a reactive property is written with a different value, `trigger`
//!    takes a snapshot of the property's dep and notifies every effect in
//!    it: effects with a scheduler get their scheduler called, the others
//!    re-run immediately.
//!
//! 3. `stop()` on an effect walks its reverse links and removes it from
//!    every dep, so it is never notified again.
//!
//! # Ownership
//!
//! Deps hold strong handles to their effects; effects hold weak handles to
//! their deps. The graph itself holds no handle to targets at all: it is
//! keyed by [`TargetId`], and a target removes its own entry when its last
//! handle is dropped (see `value::TargetInner`). Entries for targets that
//! are leaked elsewhere are retained until then.
//!
//! # Thread Safety
//!
//! The graph is a single process-wide service backed by a `DashMap`. No
//! shard lock is held while effects are notified, so effects are free to
//! read and write reactive state from inside their bodies.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::effect::ReactiveEffect;
use super::subscriber::{EffectId, TargetId};
use super::value::PropKey;

/// The set of effects subscribed to one property of one target (or to one
/// ref or computed cell).
///
/// Subscribers are kept in insertion order, so effects are notified in the
/// order they first subscribed.
#[derive(Default)]
pub struct Dep {
    subscribers: Mutex<IndexMap<EffectId, ReactiveEffect>>,
}

impl Dep {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of subscribed effects.
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    pub fn contains(&self, id: EffectId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    /// Insert an effect. Returns `false` if it was already subscribed.
    pub(crate) fn insert(&self, effect: &ReactiveEffect) -> bool {
        let mut subscribers = self.subscribers.lock();
        if subscribers.contains_key(&effect.id()) {
            return false;
        }
        subscribers.insert(effect.id(), effect.clone());
        true
    }

    pub(crate) fn remove(&self, id: EffectId) {
        // Released after the lock: the last handle of an effect can own
        // targets whose drop walks the graph.
        let removed = self.subscribers.lock().shift_remove(&id);
        drop(removed);
    }

    fn snapshot(&self) -> Vec<ReactiveEffect> {
        self.subscribers.lock().values().cloned().collect()
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep").field("len", &self.len()).finish()
    }
}

/// Record the running effect (if any) as a subscriber of `dep`.
///
/// Idempotent: recording the same dependency twice during one run has no
/// additional effect.
pub fn track_effects(dep: &Arc<Dep>) {
    let Some(effect) = ReactiveContext::current() else {
        return;
    };
    if !effect.is_active() {
        return;
    }
    if dep.insert(&effect) {
        effect.record_dep(dep);
    }
}

/// Notify every effect subscribed to `dep`.
///
/// Iterates over a snapshot, so an effect that stops itself (or another
/// subscriber) mid-iteration does not disturb the remaining entries. An
/// effect stopped before its turn is skipped.
pub fn trigger_effects(dep: &Dep) {
    let effects = dep.snapshot();
    if effects.is_empty() {
        return;
    }
    tracing::trace!(subscribers = effects.len(), "trigger");

    for effect in effects {
        effect.notify();
    }
}

/// The process-wide dependency graph.
pub struct DependencyGraph {
    targets: DashMap<TargetId, HashMap<PropKey, Arc<Dep>>>,
}

static GRAPH: OnceLock<DependencyGraph> = OnceLock::new();

impl DependencyGraph {
    fn new() -> Self {
        Self {
            targets: DashMap::new(),
        }
    }

    /// The graph shared by every target in the process.
    pub fn global() -> &'static Self {
        GRAPH.get_or_init(Self::new)
    }

    /// Record that the running effect read `key` of `target`.
    ///
    /// No-op if no effect is collecting dependencies.
    pub fn track(&self, target: TargetId, key: &PropKey) {
        if !ReactiveContext::is_active() {
            return;
        }

        let dep = {
            let mut deps = self.targets.entry(target).or_default();
            deps.entry(key.clone()).or_insert_with(Dep::new).clone()
        };

        tracing::trace!(target = target.raw(), %key, "track");
        track_effects(&dep);
    }

    /// Notify the effects subscribed to `key` of `target`.
    pub fn trigger(&self, target: TargetId, key: &PropKey) {
        let dep = self
            .targets
            .get(&target)
            .and_then(|deps| deps.get(key).cloned());

        if let Some(dep) = dep {
            trigger_effects(&dep);
        }
    }

    /// Drop every dependency entry of `target`.
    ///
    /// Called when the last handle to the target goes away.
    pub fn remove_target(&self, target: TargetId) {
        self.targets.remove(&target);
    }

    /// Whether the graph holds any entry for `target`.
    pub fn has_target(&self, target: TargetId) -> bool {
        self.targets.contains_key(&target)
    }

    /// Number of effects subscribed to `key` of `target`.
    pub fn subscriber_count(&self, target: TargetId, key: &PropKey) -> usize {
        self.targets
            .get(&target)
            .and_then(|deps| deps.get(key).map(|dep| dep.len()))
            .unwrap_or(0)
    }
}

/// Shorthand for [`DependencyGraph::track`] on the global graph.
pub fn track(target: TargetId, key: &PropKey) {
    DependencyGraph::global().track(target, key);
}

/// Shorthand for [`DependencyGraph::trigger`] on the global graph.
pub fn trigger(target: TargetId, key: &PropKey) {
    DependencyGraph::global().trigger(target, key);
}
