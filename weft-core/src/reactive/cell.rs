//! Refs
//!
//! A [`Ref`] is a single reactive cell. Reading it subscribes the running
//! effect to the cell's own dep; writing a different value notifies every
//! subscriber.
//!
//! A deep ref stores composites wrapped with [`reactive`](super::reactive),
//! so mutations of the object it holds are observed too. A shallow ref
//! stores whatever it is given and only notifies on replacement.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::proxy::{is_readonly, is_shallow, to_raw, to_reactive};
use super::runtime::{track_effects, trigger_effects, Dep};
use super::subscriber::TargetId;
use super::value::Value;

struct RefInner {
    id: TargetId,

    /// The unwrapped value, used for change detection.
    raw: Mutex<Value>,

    /// The value handed out by `get`.
    value: Mutex<Value>,

    shallow: bool,
    dep: Arc<Dep>,
}

/// A reactive cell holding one [`Value`].
///
/// Cloning produces another handle to the same cell.
#[derive(Clone)]
pub struct Ref {
    inner: Arc<RefInner>,
}

impl Ref {
    fn create(value: Value, shallow: bool) -> Self {
        let raw = if shallow { value.clone() } else { to_raw(&value) };
        let value = if shallow { value } else { to_reactive(value) };

        Self {
            inner: Arc::new(RefInner {
                id: TargetId::new(),
                raw: Mutex::new(raw),
                value: Mutex::new(value),
                shallow,
                dep: Dep::new(),
            }),
        }
    }

    /// Identity of the cell.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.shallow
    }

    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read the value, subscribing the running effect.
    pub fn get(&self) -> Value {
        track_effects(&self.inner.dep);
        self.get_untracked()
    }

    /// Read the value without subscribing.
    pub fn get_untracked(&self) -> Value {
        self.inner.value.lock().clone()
    }

    /// Replace the value. Subscribers are notified only if it changed.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        let direct = self.inner.shallow || is_shallow(&value) || is_readonly(&value);
        let raw = if direct { value.clone() } else { to_raw(&value) };

        let previous = {
            let mut current = self.inner.raw.lock();
            if current.same(&raw) {
                return;
            }
            std::mem::replace(&mut *current, raw.clone())
        };
        let replaced = {
            let next = if direct { value } else { to_reactive(raw) };
            std::mem::replace(&mut *self.inner.value.lock(), next)
        };
        drop((previous, replaced));

        tracing::trace!(cell = self.id().raw(), "ref changed");
        trigger_effects(&self.inner.dep);
    }

    /// Replace the value with `f(current)`, reading untracked.
    pub fn update(&self, f: impl FnOnce(Value) -> Value) {
        let next = f(self.get_untracked());
        self.set(next);
    }

    /// Notify subscribers without changing the value. Used after mutating a
    /// shallow ref's contents in place.
    pub fn trigger(&self) {
        trigger_effects(&self.inner.dep);
    }

    /// Number of effects subscribed to the cell.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.len()
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("id", &self.id().raw())
            .field("shallow", &self.inner.shallow)
            .finish()
    }
}

/// Create a deep ref. Passing a ref returns it unchanged.
pub fn ref_cell(value: impl Into<Value>) -> Ref {
    match value.into() {
        Value::Ref(existing) => existing,
        value => Ref::create(value, false),
    }
}

/// Create a shallow ref. Passing a ref returns it unchanged.
pub fn shallow_ref(value: impl Into<Value>) -> Ref {
    match value.into() {
        Value::Ref(existing) => existing,
        value => Ref::create(value, true),
    }
}

pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// The value inside a ref (tracked), or the value itself.
pub fn unref(value: &Value) -> Value {
    match value {
        Value::Ref(r) => r.get(),
        other => other.clone(),
    }
}
