//! Reactive Wrappers
//!
//! A [`Reactive`] is a view of a [`Target`] through which every read is
//! tracked and every effective write is triggered. Four variants exist:
//!
//! | constructor          | writes     | nested composites        |
//! |----------------------|------------|--------------------------|
//! | [`reactive`]         | allowed    | wrapped on read          |
//! | [`shallow_reactive`] | allowed    | returned raw             |
//! | [`readonly`]         | rejected   | wrapped read-only on read |
//! | [`shallow_readonly`] | rejected   | returned raw             |
//!
//! Read-only views of a raw target do not track: nothing can change through
//! them. A read-only view of an already-reactive wrapper does track, so it
//! observes writes made through the mutable wrapper.
//!
//! # Identity
//!
//! Wrapping is idempotent: each target has at most one live wrapper per
//! variant, held in a process-wide cache keyed by [`TargetId`]. The caches
//! hold weak handles, and a target clears its own entries when it is
//! dropped.
//!
//! # Key Tracking
//!
//! Enumerating a target (`keys`, `len`, `has` of an absent key) tracks the
//! [`PropKey::Iterate`] key; adding or deleting a key triggers it in addition
//! to the key itself.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use smallvec::SmallVec;

use super::runtime::{track, trigger};
use super::subscriber::TargetId;
use super::value::{PropKey, Target, Value};
use crate::error::ReactiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Flags {
    readonly: bool,
    shallow: bool,
    /// Reads subscribe the running effect.
    tracked: bool,
}

struct ProxyInner {
    target: Target,
    flags: Flags,
}

/// A reactive view of a target.
///
/// Cloning produces another handle to the same wrapper; two handles are
/// equal exactly when they are the same wrapper.
#[derive(Clone)]
pub struct Reactive {
    inner: Arc<ProxyInner>,
}

type CacheEntry = SmallVec<[(Flags, Weak<ProxyInner>); 2]>;

fn cache() -> &'static DashMap<TargetId, CacheEntry> {
    static CACHE: OnceLock<DashMap<TargetId, CacheEntry>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Drop every cached wrapper of `target`.
pub(crate) fn forget_target(target: TargetId) {
    cache().remove(&target);
}

fn wrap(target: Target, flags: Flags) -> Reactive {
    let mut entry = cache().entry(target.id()).or_default();

    if let Some(inner) = entry
        .iter()
        .find(|(cached, _)| *cached == flags)
        .and_then(|(_, weak)| weak.upgrade())
    {
        return Reactive { inner };
    }

    let inner = Arc::new(ProxyInner { target, flags });
    entry.retain(|(cached, weak)| *cached != flags && weak.strong_count() > 0);
    entry.push((flags, Arc::downgrade(&inner)));
    tracing::trace!(target = inner.target.id().raw(), ?flags, "wrap");

    Reactive { inner }
}

fn create_reactive_object(value: Value, readonly: bool, shallow: bool) -> Value {
    match value {
        Value::Object(target) if target.is_marked_raw() => Value::Object(target),
        Value::Object(target) => Value::Proxy(wrap(
            target,
            Flags {
                readonly,
                shallow,
                tracked: !readonly,
            },
        )),
        Value::Proxy(proxy) if readonly && !proxy.is_readonly() => Value::Proxy(wrap(
            proxy.raw(),
            Flags {
                readonly: true,
                shallow,
                tracked: true,
            },
        )),
        Value::Proxy(proxy) => Value::Proxy(proxy),
        other => {
            tracing::warn!(value = ?other, "value cannot be made reactive");
            other
        }
    }
}

/// Deep mutable wrapper. Non-composite values are returned unchanged.
pub fn reactive(value: impl Into<Value>) -> Value {
    let value = value.into();
    // A read-only wrapper stays read-only.
    if let Value::Proxy(proxy) = &value {
        if proxy.is_readonly() {
            return value;
        }
    }
    create_reactive_object(value, false, false)
}

/// Mutable wrapper that leaves nested composites raw.
pub fn shallow_reactive(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), false, true)
}

/// Deep read-only wrapper.
pub fn readonly(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), true, false)
}

/// Read-only wrapper that leaves nested composites raw.
pub fn shallow_readonly(value: impl Into<Value>) -> Value {
    create_reactive_object(value.into(), true, true)
}

/// Strip wrappers: a wrapper becomes its raw target, anything else is
/// returned unchanged.
pub fn to_raw(value: &Value) -> Value {
    match value {
        Value::Proxy(proxy) => Value::Object(proxy.raw()),
        other => other.clone(),
    }
}

/// Wrap deeply if composite, otherwise return as is.
pub(crate) fn to_reactive(value: Value) -> Value {
    match value {
        Value::Object(_) => reactive(value),
        other => other,
    }
}

/// True for mutable wrappers and for read-only views of them.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Proxy(proxy) if proxy.inner.flags.tracked)
}

pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Proxy(proxy) if proxy.is_readonly())
}

pub fn is_shallow(value: &Value) -> bool {
    matches!(value, Value::Proxy(proxy) if proxy.is_shallow())
}

pub fn is_proxy(value: &Value) -> bool {
    matches!(value, Value::Proxy(_))
}

/// Exclude a composite from ever being wrapped. Returns the value raw.
pub fn mark_raw(value: impl Into<Value>) -> Value {
    let value = to_raw(&value.into());
    if let Value::Object(target) = &value {
        target.mark_raw();
    }
    value
}

impl Reactive {
    /// Wrap a target directly.
    pub fn new(target: Target) -> Self {
        wrap(
            target,
            Flags {
                readonly: false,
                shallow: false,
                tracked: true,
            },
        )
    }

    /// Shallow mutable wrapper of a target.
    pub fn shallow(target: Target) -> Self {
        wrap(
            target,
            Flags {
                readonly: false,
                shallow: true,
                tracked: true,
            },
        )
    }

    /// A read-only view of this wrapper. Reads through the view track
    /// whenever reads through `self` would.
    pub fn readonly_view(&self) -> Self {
        wrap(
            self.raw(),
            Flags {
                readonly: true,
                shallow: self.is_shallow(),
                tracked: self.inner.flags.tracked,
            },
        )
    }

    /// The raw target behind this wrapper.
    pub fn raw(&self) -> Target {
        self.inner.target.clone()
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.flags.readonly
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.flags.shallow
    }

    fn track(&self, key: &PropKey) {
        if self.inner.flags.tracked {
            track(self.inner.target.id(), key);
        }
    }

    fn trigger(&self, key: &PropKey) {
        trigger(self.inner.target.id(), key);
    }

    /// Read a property. Nested composites come back wrapped with this
    /// wrapper's variant, unless shallow.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let key = key.into();
        self.track(&key);

        let value = self.inner.target.get(&key);
        if self.is_shallow() {
            return value;
        }
        match value {
            Value::Object(target) if target.is_marked_raw() => Value::Object(target),
            // A read-only view of tracked state keeps tracking nested reads.
            Value::Object(target) if self.is_readonly() => Value::Proxy(wrap(
                target,
                Flags {
                    readonly: true,
                    shallow: false,
                    tracked: self.inner.flags.tracked,
                },
            )),
            Value::Object(_) => reactive(value),
            other => other,
        }
    }

    /// Write a property. Returns `true` if the stored value changed.
    ///
    /// A read-only wrapper rejects the write with a warning and returns
    /// `false`.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> bool {
        match self.try_set(key, value) {
            Ok(changed) => changed,
            Err(err) => {
                tracing::warn!(%err, "write rejected");
                false
            }
        }
    }

    /// Write a property, reporting rejected writes as errors.
    pub fn try_set(
        &self,
        key: impl Into<PropKey>,
        value: impl Into<Value>,
    ) -> Result<bool, ReactiveError> {
        let key = key.into();
        if self.is_readonly() {
            return Err(ReactiveError::ReadonlyWrite { key });
        }

        let value = value.into();
        let value = if self.is_shallow() { value } else { to_raw(&value) };

        let outcome = self.inner.target.write(&key, value.clone())?;
        if outcome.added() {
            self.trigger(&key);
            self.trigger(&PropKey::Iterate);
            return Ok(true);
        }

        let changed = outcome.old.as_ref().is_some_and(|old| !old.same(&value));
        if changed {
            self.trigger(&key);
        }
        Ok(changed)
    }

    /// Remove a property. Returns `true` if it existed.
    pub fn delete(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        if self.is_readonly() {
            tracing::warn!(%key, "delete rejected: target is read-only");
            return false;
        }

        let target = &self.inner.target;
        let len = target.len();
        let existed = target.remove(&key).is_some();
        if !existed {
            return false;
        }

        // Removing from a list shifts its tail, so every later index changes.
        match key {
            PropKey::Index(index) if target.is_list() => {
                for shifted in index..len {
                    self.trigger(&PropKey::Index(shifted));
                }
            }
            _ => self.trigger(&key),
        }
        self.trigger(&PropKey::Iterate);
        true
    }

    /// Whether the property exists.
    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        let found = self.inner.target.contains(&key);
        self.track(&key);
        if !found {
            self.track(&PropKey::Iterate);
        }
        found
    }

    /// Keys in iteration order.
    pub fn keys(&self) -> Vec<PropKey> {
        self.track(&PropKey::Iterate);
        self.inner.target.keys()
    }

    /// Number of keys (or elements).
    pub fn len(&self) -> usize {
        self.track(&PropKey::Iterate);
        self.inner.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append to a list. Returns the new element's index.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize, ReactiveError> {
        if self.is_readonly() {
            return Err(ReactiveError::ReadonlyWrite {
                key: PropKey::Iterate,
            });
        }

        let value = value.into();
        let value = if self.is_shallow() { value } else { to_raw(&value) };
        let index = self.inner.target.append(value)?;

        self.trigger(&PropKey::Index(index));
        self.trigger(&PropKey::Iterate);
        Ok(index)
    }

    /// Snapshot as JSON, without tracking.
    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.raw()).to_json()
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Reactive {}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("target", &self.inner.target)
            .field("readonly", &self.inner.flags.readonly)
            .field("shallow", &self.inner.flags.shallow)
            .finish()
    }
}
