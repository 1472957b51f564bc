//! Values and Targets
//!
//! Reactive state is dynamic: a reactive object can hold numbers, strings,
//! nested objects and arrays, refs, and wrappers, and any of those can be
//! swapped for another kind at runtime. [`Value`] is that dynamic value.
//!
//! A [`Target`] is a raw composite (a record of named fields, or a list)
//! with its own identity. Targets are shared by handle, never copied, and
//! the dependency graph refers to them only by [`TargetId`].
//!
//! # Identity
//!
//! [`Value::same`] follows `Object.is` semantics: scalars compare by value
//! (with `NaN` equal to itself and `0.0` distinct from `-0.0`), composites,
//! refs and wrappers compare by identity. This is the comparison every
//! "did this write change anything" check uses.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard};

use super::cell::Ref;
use super::proxy::{self, Reactive};
use super::runtime::DependencyGraph;
use super::subscriber::TargetId;
use crate::error::ReactiveError;

/// A property key of a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// A named field of a record.
    Field(Arc<str>),

    /// A position in a list.
    Index(usize),

    /// The key set (or length) of a target as a whole. Reads that enumerate
    /// a target track this key; writes that add or remove keys trigger it.
    Iterate,
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Field(name) => f.write_str(name),
            PropKey::Index(index) => write!(f, "{index}"),
            PropKey::Iterate => f.write_str("<iterate>"),
        }
    }
}

impl From<&str> for PropKey {
    fn from(name: &str) -> Self {
        PropKey::Field(Arc::from(name))
    }
}

impl From<String> for PropKey {
    fn from(name: String) -> Self {
        PropKey::Field(Arc::from(name))
    }
}

impl From<Arc<str>> for PropKey {
    fn from(name: Arc<str>) -> Self {
        PropKey::Field(name)
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        PropKey::Index(index)
    }
}

/// Contents of a target.
#[derive(Debug, Clone)]
pub enum Composite {
    /// Named fields, in insertion order. Plain objects and map-like
    /// containers are records.
    Record(IndexMap<Arc<str>, Value>),

    /// Positional elements. Arrays and set-like containers are lists.
    List(Vec<Value>),
}

/// What a raw write did.
#[derive(Debug)]
pub(crate) struct WriteOutcome {
    /// The previous value, if the key existed.
    pub old: Option<Value>,
}

impl WriteOutcome {
    pub(crate) fn added(&self) -> bool {
        self.old.is_none()
    }
}

pub(crate) struct TargetInner {
    id: TargetId,
    data: RwLock<Composite>,
    skip: AtomicBool,
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        DependencyGraph::global().remove_target(self.id);
        proxy::forget_target(self.id);
    }
}

/// An identity-bearing raw composite value.
///
/// Cloning a target produces another handle to the same object.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

impl Target {
    fn from_composite(data: Composite) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: TargetId::new(),
                data: RwLock::new(data),
                skip: AtomicBool::new(false),
            }),
        }
    }

    /// An empty record.
    pub fn record() -> Self {
        Self::from_composite(Composite::Record(IndexMap::new()))
    }

    /// An empty list.
    pub fn list() -> Self {
        Self::from_composite(Composite::List(Vec::new()))
    }

    pub fn from_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        Self::from_composite(Composite::Record(
            fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        ))
    }

    pub fn from_values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::from_composite(Composite::List(values.into_iter().map(Into::into).collect()))
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn is_list(&self) -> bool {
        matches!(*self.inner.data.read(), Composite::List(_))
    }

    pub fn ptr_eq(&self, other: &Target) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Exclude this target from ever being wrapped.
    pub fn mark_raw(&self) -> &Self {
        self.inner.skip.store(true, Ordering::SeqCst);
        self
    }

    pub fn is_marked_raw(&self) -> bool {
        self.inner.skip.load(Ordering::SeqCst)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Composite> {
        self.inner.data.read()
    }

    /// Read a property without tracking.
    pub fn get(&self, key: &PropKey) -> Value {
        let data = self.inner.data.read();
        let found = match (&*data, key) {
            (Composite::Record(fields), PropKey::Field(name)) => fields.get(name).cloned(),
            (Composite::Record(fields), PropKey::Index(index)) => {
                fields.get(index.to_string().as_str()).cloned()
            }
            (Composite::List(values), PropKey::Index(index)) => values.get(*index).cloned(),
            (Composite::List(values), PropKey::Field(name)) => name
                .parse::<usize>()
                .ok()
                .and_then(|index| values.get(index).cloned()),
            (_, PropKey::Iterate) => None,
        };
        found.unwrap_or(Value::Null)
    }

    /// Whether the property exists, without tracking.
    pub fn contains(&self, key: &PropKey) -> bool {
        let data = self.inner.data.read();
        match (&*data, key) {
            (Composite::Record(fields), PropKey::Field(name)) => fields.contains_key(name),
            (Composite::Record(fields), PropKey::Index(index)) => {
                fields.contains_key(index.to_string().as_str())
            }
            (Composite::List(values), PropKey::Index(index)) => *index < values.len(),
            (Composite::List(values), PropKey::Field(name)) => name
                .parse::<usize>()
                .map(|index| index < values.len())
                .unwrap_or(false),
            (_, PropKey::Iterate) => false,
        }
    }

    /// Keys in iteration order, without tracking.
    pub fn keys(&self) -> Vec<PropKey> {
        match &*self.inner.data.read() {
            Composite::Record(fields) => fields.keys().cloned().map(PropKey::Field).collect(),
            Composite::List(values) => (0..values.len()).map(PropKey::Index).collect(),
        }
    }

    /// Values in iteration order, without tracking.
    pub fn values(&self) -> Vec<Value> {
        match &*self.inner.data.read() {
            Composite::Record(fields) => fields.values().cloned().collect(),
            Composite::List(values) => values.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match &*self.inner.data.read() {
            Composite::Record(fields) => fields.len(),
            Composite::List(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a property without triggering.
    ///
    /// Writing past the end of a list pads it with `Null`.
    pub(crate) fn write(&self, key: &PropKey, value: Value) -> Result<WriteOutcome, ReactiveError> {
        let mut data = self.inner.data.write();
        let old = match (&mut *data, key) {
            (Composite::Record(fields), PropKey::Field(name)) => fields.insert(name.clone(), value),
            (Composite::Record(fields), PropKey::Index(index)) => {
                fields.insert(Arc::from(index.to_string()), value)
            }
            (Composite::List(values), PropKey::Index(index)) => write_index(values, *index, value)
                .ok_or_else(|| ReactiveError::InvalidKey { key: key.clone() })?,
            (Composite::List(values), PropKey::Field(name)) => name
                .parse::<usize>()
                .ok()
                .and_then(|index| write_index(values, index, value))
                .ok_or_else(|| ReactiveError::InvalidKey { key: key.clone() })?,
            (_, PropKey::Iterate) => return Err(ReactiveError::InvalidKey { key: key.clone() }),
        };
        Ok(WriteOutcome { old })
    }

    /// Remove a property without triggering. Lists shift their tail left.
    pub(crate) fn remove(&self, key: &PropKey) -> Option<Value> {
        let mut data = self.inner.data.write();
        match (&mut *data, key) {
            (Composite::Record(fields), PropKey::Field(name)) => fields.shift_remove(name),
            (Composite::Record(fields), PropKey::Index(index)) => {
                fields.shift_remove(index.to_string().as_str())
            }
            (Composite::List(values), PropKey::Index(index)) if *index < values.len() => {
                Some(values.remove(*index))
            }
            _ => None,
        }
    }

    /// Append to a list without triggering. Returns the new index.
    pub(crate) fn append(&self, value: Value) -> Result<usize, ReactiveError> {
        let mut data = self.inner.data.write();
        match &mut *data {
            Composite::List(values) => {
                values.push(value);
                Ok(values.len() - 1)
            }
            Composite::Record(_) => Err(ReactiveError::NotAList),
        }
    }
}

/// Most `Null` padding a single write past the end of a list may add.
pub const MAX_LIST_PADDING: usize = 1 << 16;

/// Returns `None` when the write would pad past [`MAX_LIST_PADDING`],
/// otherwise the previous value (if the index existed).
fn write_index(values: &mut Vec<Value>, index: usize, value: Value) -> Option<Option<Value>> {
    if index < values.len() {
        return Some(Some(std::mem::replace(&mut values[index], value)));
    }
    if index - values.len() > MAX_LIST_PADDING {
        return None;
    }
    values.resize(index, Value::Null);
    values.push(value);
    Some(None)
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target#{}", self.id().raw())
    }
}

/// A dynamic reactive value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A raw, unwrapped target.
    Object(Target),
    /// A wrapper around a target.
    Proxy(Reactive),
    Ref(Ref),
}

impl Value {
    /// `Object.is` comparison.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Proxy(a), Value::Proxy(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Reactive> {
        match self {
            Value::Proxy(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_ref_cell(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// The target behind a raw object or a wrapper.
    pub fn target(&self) -> Option<Target> {
        match self {
            Value::Object(target) => Some(target.clone()),
            Value::Proxy(proxy) => Some(proxy.raw()),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Proxy(_))
    }

    /// Build a value from JSON. Objects and arrays become fresh targets.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(Arc::from(s)),
            serde_json::Value::Array(items) => {
                Value::Object(Target::from_values(items.into_iter().map(Value::from_json)))
            }
            serde_json::Value::Object(fields) => Value::Object(Target::from_fields(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::from_json(value))),
            )),
        }
    }

    /// Snapshot as JSON, without tracking. Refs are read through; a target
    /// already being serialized higher up renders as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_inner(&mut HashSet::new())
    }

    fn to_json_inner(&self, seen: &mut HashSet<TargetId>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Ref(r) => r.get_untracked().to_json_inner(seen),
            Value::Object(_) | Value::Proxy(_) => {
                let Some(target) = self.target() else {
                    return serde_json::Value::Null;
                };
                if !seen.insert(target.id()) {
                    return serde_json::Value::Null;
                }
                let json = match &*target.read() {
                    Composite::Record(fields) => serde_json::Value::Object(
                        fields
                            .iter()
                            .map(|(key, value)| (key.to_string(), value.to_json_inner(seen)))
                            .collect(),
                    ),
                    Composite::List(values) => serde_json::Value::Array(
                        values.iter().map(|value| value.to_json_inner(seen)).collect(),
                    ),
                };
                seen.remove(&target.id());
                json
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Object(target) => write!(f, "Object({target:?})"),
            Value::Proxy(proxy) => write!(f, "Proxy({proxy:?})"),
            Value::Ref(r) => write!(f, "Ref({r:?})"),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Target> for Value {
    fn from(target: Target) -> Self {
        Value::Object(target)
    }
}

impl From<Reactive> for Value {
    fn from(proxy: Reactive) -> Self {
        Value::Proxy(proxy)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::Ref(r)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
