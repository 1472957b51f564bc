//! Watchers
//!
//! A watcher observes a source and calls back with the new and old value
//! when the source changes. Callbacks never run synchronously inside the
//! write that caused them: the watcher's effect queues a job on the
//! scheduler, and the callback runs when the queue is flushed. Several
//! writes before a flush produce one callback.
//!
//! # Sources
//!
//! - a [`Ref`] or [`Computed`]: watched by value
//! - a [`Reactive`] wrapper: always watched deeply
//! - a getter: watched by its return value
//! - a list of the above: watched element-wise
//!
//! Deep watching visits every nested property (see [`traverse`]), so a write
//! anywhere inside the source fires the callback.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use super::cell::Ref;
use super::computed::Computed;
use super::effect::{queued_effect, ReactiveEffect};
use super::proxy::Reactive;
use super::subscriber::TargetId;
use super::value::{Composite, Target, Value};

/// Options for [`watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Call back once on creation, with `Null` as the old value.
    pub immediate: bool,

    /// Visit nested properties and fire on any change inside the source.
    pub deep: bool,
}

/// What a watcher observes.
#[derive(Clone)]
pub enum WatchSource {
    Ref(Ref),
    Computed(Computed),
    Reactive(Reactive),
    Many(Vec<WatchSource>),
    Getter(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl WatchSource {
    pub fn getter<F, R>(f: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Value>,
    {
        WatchSource::Getter(Arc::new(move || f().into()))
    }

    fn read(&self) -> Value {
        match self {
            WatchSource::Ref(r) => r.get(),
            WatchSource::Computed(c) => c.get(),
            WatchSource::Reactive(proxy) => {
                let value = Value::Proxy(proxy.clone());
                traverse(&value);
                value
            }
            WatchSource::Many(sources) => {
                Value::Object(Target::from_values(sources.iter().map(WatchSource::read)))
            }
            WatchSource::Getter(getter) => getter(),
        }
    }
}

impl From<Ref> for WatchSource {
    fn from(r: Ref) -> Self {
        WatchSource::Ref(r)
    }
}

impl From<Computed> for WatchSource {
    fn from(c: Computed) -> Self {
        WatchSource::Computed(c)
    }
}

impl From<Reactive> for WatchSource {
    fn from(proxy: Reactive) -> Self {
        WatchSource::Reactive(proxy)
    }
}

impl From<Vec<WatchSource>> for WatchSource {
    fn from(sources: Vec<WatchSource>) -> Self {
        WatchSource::Many(sources)
    }
}

/// Handle to a running watcher.
#[derive(Clone, Debug)]
pub struct WatchHandle {
    effect: ReactiveEffect,
}

impl WatchHandle {
    /// Stop the watcher. A callback already queued does not run.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

/// Whether a new source value should fire the callback.
fn has_changed(old: &Value, new: &Value, many: bool) -> bool {
    if many {
        if let (Value::Object(old), Value::Object(new)) = (old, new) {
            let (old, new) = (old.values(), new.values());
            return old.len() != new.len() || old.iter().zip(&new).any(|(a, b)| !a.same(b));
        }
    }
    !old.same(new)
}

/// Watch `source`, calling `callback(new, old)` after it changes.
pub fn watch<S, F>(source: S, callback: F, options: WatchOptions) -> WatchHandle
where
    S: Into<WatchSource>,
    F: Fn(&Value, &Value) + Send + Sync + 'static,
{
    let source = source.into();
    let many = matches!(source, WatchSource::Many(_));
    let deep = options.deep || matches!(source, WatchSource::Reactive(_));

    let getter = move || {
        let value = source.read();
        if deep {
            traverse(&value);
        }
        value
    };

    // `None` until the first run, which forces the immediate callback.
    let old_value: Arc<Mutex<Option<Value>>> = Arc::default();

    let job_old = Arc::clone(&old_value);
    let (effect, job) = queued_effect(getter, move |effect| {
        let Some(new) = effect.run() else {
            return;
        };
        let old = job_old.lock().clone();
        let fire = match &old {
            None => true,
            Some(old) => deep || has_changed(old, &new, many),
        };
        if fire {
            callback(&new, &old.unwrap_or_default());
            *job_old.lock() = Some(new);
        }
    });

    if options.immediate {
        job.run();
    } else {
        *old_value.lock() = effect.run();
    }

    tracing::debug!(effect = ?effect.id(), deep, immediate = options.immediate, "watch");
    WatchHandle { effect }
}

/// Run `f` now and again, batched, whenever anything it read changes.
pub fn watch_effect<F>(f: F) -> WatchHandle
where
    F: Fn() + Send + Sync + 'static,
{
    let (effect, _job) = queued_effect(f, |effect| {
        effect.run();
    });
    effect.run();

    WatchHandle { effect }
}

/// Read every nested property of `value` through its wrappers, entering
/// refs, so the running effect subscribes to all of them.
///
/// Each target and ref is visited at most once, so cyclic structures
/// terminate.
pub fn traverse(value: &Value) {
    traverse_inner(value, &mut HashSet::new());
}

fn traverse_inner(value: &Value, seen: &mut HashSet<TargetId>) {
    match value {
        Value::Proxy(proxy) => {
            if !seen.insert(proxy.raw().id()) {
                return;
            }
            for key in proxy.keys() {
                traverse_inner(&proxy.get(key), seen);
            }
        }
        Value::Ref(r) => {
            if seen.insert(r.id()) {
                traverse_inner(&r.get(), seen);
            }
        }
        Value::Object(target) => {
            if !seen.insert(target.id()) {
                return;
            }
            let children: Vec<Value> = match &*target.read() {
                Composite::Record(fields) => fields.values().cloned().collect(),
                Composite::List(values) => values.clone(),
            };
            for child in &children {
                traverse_inner(child, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{reactive, ref_cell};
    use crate::scheduler::tick;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<(Value, Value)>>>, impl Fn(&Value, &Value) + Send + Sync) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        (calls, move |new: &Value, old: &Value| {
            sink.lock().push((new.clone(), old.clone()))
        })
    }

    #[test]
    fn watch_ref_is_batched() {
        let count = ref_cell(0);
        let (calls, callback) = recorder();
        let _handle = watch(count.clone(), callback, WatchOptions::default());

        count.set(1);
        count.set(2);
        assert!(calls.lock().is_empty());

        tick();
        assert_eq!(*calls.lock(), vec![(Value::Int(2), Value::Int(0))]);
    }

    #[test]
    fn immediate_watch_calls_back_on_creation() {
        let count = ref_cell(5);
        let (calls, callback) = recorder();
        let _handle = watch(
            count,
            callback,
            WatchOptions {
                immediate: true,
                ..Default::default()
            },
        );

        assert_eq!(*calls.lock(), vec![(Value::Int(5), Value::Null)]);
    }

    #[test]
    fn watching_reactive_is_deep() {
        let state = reactive(json!({ "user": { "name": "ada" } }));
        let proxy = state.as_proxy().cloned().unwrap();
        let fired = Arc::new(AtomicI32::new(0));

        let f = fired.clone();
        let _handle = watch(
            proxy.clone(),
            move |_, _| {
                f.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::default(),
        );

        let user = proxy.get("user").as_proxy().cloned().unwrap();
        user.set("name", "grace");
        tick();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn watching_many_compares_elementwise() {
        let a = ref_cell(1);
        let b = ref_cell(2);
        let (calls, callback) = recorder();
        let _handle = watch(
            vec![WatchSource::from(a.clone()), WatchSource::from(b.clone())],
            callback,
            WatchOptions::default(),
        );

        // Same values: a fresh list is produced, but nothing changed.
        a.set(10);
        a.set(1);
        tick();
        assert!(calls.lock().is_empty());

        b.set(3);
        tick();
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.to_json(), json!([1, 3]));
        assert_eq!(calls[0].1.to_json(), json!([1, 2]));
    }

    #[test]
    fn getter_source_fires_on_result_change() {
        let count = ref_cell(1);
        let c = count.clone();
        let (calls, callback) = recorder();
        let _handle = watch(
            WatchSource::getter(move || c.get().as_int().unwrap_or(0) % 2),
            callback,
            WatchOptions::default(),
        );

        count.set(3);
        tick();
        assert!(calls.lock().is_empty());

        count.set(4);
        tick();
        assert_eq!(*calls.lock(), vec![(Value::Int(0), Value::Int(1))]);
    }

    #[test]
    fn stopped_watcher_skips_queued_callback() {
        let count = ref_cell(0);
        let (calls, callback) = recorder();
        let handle = watch(count.clone(), callback, WatchOptions::default());

        count.set(1);
        handle.stop();
        tick();

        assert!(calls.lock().is_empty());
        assert!(!handle.is_active());
    }

    #[test]
    fn watch_effect_runs_now_and_after_flush() {
        let count = ref_cell(0);
        let seen = Arc::new(AtomicI32::new(-1));

        let c = count.clone();
        let s = seen.clone();
        let _handle = watch_effect(move || {
            s.store(c.get().as_int().unwrap_or(0) as i32, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        count.set(9);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        tick();
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn traverse_terminates_on_cycles() {
        let state = reactive(json!({ "a": { "b": 1 } }));
        let proxy = state.as_proxy().cloned().unwrap();
        proxy.set("me", state.clone());

        traverse(&state);

        proxy.delete("me");
    }
}
