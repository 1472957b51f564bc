//! Effect Implementation
//!
//! An effect is a re-runnable computation. While it runs it sits on top of
//! the reactive context stack, so every reactive read it performs is
//! attributed to it; when any of those reads later changes, the effect is
//! notified.
//!
//! # How Effects Work
//!
//! 1. `run()` first detaches the effect from every dep it was recorded in
//!    by the previous run, then pushes it on the context stack and calls
//!    its function. The dependencies of the new run are collected from
//!    scratch.
//!
//! 2. When a dependency changes, the effect is notified. If it carries a
//!    scheduler, only the scheduler is called (computed cells, watchers and
//!    component renders use this to defer or batch work). Otherwise the
//!    effect re-runs synchronously.
//!
//! 3. `stop()` removes the effect from every dep and deactivates it for
//!    good. A stopped effect can still be run by hand; it then executes its
//!    function without collecting anything.
//!
//! # Re-entrancy
//!
//! An effect that is already running is never run again from inside its
//! own execution: a write performed by its own body does not re-invoke it.
//! `run()` returns `None` in that case.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::runtime::Dep;
use super::subscriber::EffectId;
use super::value::Value;
use crate::scheduler::{queue_job, Job};

/// Callback invoked instead of re-running an effect when it is notified.
pub type Scheduler = Arc<dyn Fn() + Send + Sync>;

type EffectFn = Box<dyn Fn() -> Value + Send + Sync>;

struct EffectInner {
    id: EffectId,

    /// The computation.
    func: EffectFn,

    /// Called on notification instead of `func`, if present.
    scheduler: Option<Scheduler>,

    /// Cleared by `stop()`, never set again.
    active: AtomicBool,

    /// Set for the duration of a tracked run.
    running: AtomicBool,

    /// Deps this effect was recorded in during its most recent run.
    deps: Mutex<SmallVec<[Weak<Dep>; 4]>>,

    /// Number of tracked runs so far.
    run_count: AtomicUsize,
}

/// A re-runnable computation subscribed to the reactive state it reads.
///
/// Cloning an effect produces another handle to the same effect.
#[derive(Clone)]
pub struct ReactiveEffect {
    inner: Arc<EffectInner>,
}

/// Resets the `running` flag when a run ends, including by panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ReactiveEffect {
    /// Create an effect without running it.
    pub fn new<F, R>(func: F, scheduler: Option<Scheduler>) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Value>,
    {
        Self {
            inner: Arc::new(EffectInner {
                id: EffectId::new(),
                func: Box::new(move || func().into()),
                scheduler,
                active: AtomicBool::new(true),
                running: AtomicBool::new(false),
                deps: Mutex::new(SmallVec::new()),
                run_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Whether the effect still collects dependencies.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Whether a tracked run of this effect is in progress.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn has_scheduler(&self) -> bool {
        self.inner.scheduler.is_some()
    }

    /// Number of tracked runs so far.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of live deps the effect is currently recorded in.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .deps
            .lock()
            .iter()
            .filter(|dep| dep.strong_count() > 0)
            .count()
    }

    /// Run the computation.
    ///
    /// Active effects collect dependencies; stopped effects run untracked.
    /// Returns `None` if this effect is already running on the stack.
    ///
    /// A panic in the computation propagates to the caller; the context
    /// stack and the running flag are restored first.
    pub fn run(&self) -> Option<Value> {
        if !self.is_active() {
            let _ctx = ReactiveContext::untracked();
            return Some((self.inner.func)());
        }

        if self.inner.running.swap(true, Ordering::SeqCst) {
            tracing::trace!(effect = ?self.id(), "re-entrant run suppressed");
            return None;
        }
        let _running = RunningGuard(&self.inner.running);

        self.cleanup();
        let _ctx = ReactiveContext::enter(self.clone());
        self.inner.run_count.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(effect = ?self.id(), "run");

        Some((self.inner.func)())
    }

    /// Remove the effect from every dep and deactivate it.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            self.cleanup();
            tracing::debug!(effect = ?self.id(), "effect stopped");
        }
    }

    /// Called by `trigger` when a dependency of this effect changed.
    pub(crate) fn notify(&self) {
        if !self.is_active() {
            return;
        }
        if self.is_running() {
            return;
        }
        match &self.inner.scheduler {
            Some(scheduler) => scheduler(),
            None => {
                self.run();
            }
        }
    }

    /// A handle that does not keep the effect alive.
    pub fn downgrade(&self) -> WeakEffect {
        WeakEffect {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Record the reverse link from this effect to `dep`.
    pub(crate) fn record_dep(&self, dep: &Arc<Dep>) {
        self.inner.deps.lock().push(Arc::downgrade(dep));
    }

    /// Detach the effect from every dep it is recorded in.
    fn cleanup(&self) {
        // Take the list first so no effect lock is held while deps are locked.
        let deps = std::mem::take(&mut *self.inner.deps.lock());
        for dep in deps.iter().filter_map(Weak::upgrade) {
            dep.remove(self.id());
        }
    }
}

impl PartialEq for ReactiveEffect {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ReactiveEffect {}

impl std::fmt::Debug for ReactiveEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("id", &self.id())
            .field("active", &self.is_active())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// Non-owning handle to a [`ReactiveEffect`].
///
/// Jobs that re-run an effect from its own scheduler hold one of these, so
/// the effect does not end up owning itself.
#[derive(Clone, Default)]
pub struct WeakEffect {
    inner: Weak<EffectInner>,
}

impl WeakEffect {
    pub fn upgrade(&self) -> Option<ReactiveEffect> {
        self.inner.upgrade().map(|inner| ReactiveEffect { inner })
    }
}

/// Options for [`effect_with`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run the effect on creation.
    pub lazy: bool,

    /// Call this instead of re-running the effect on notification.
    pub scheduler: Option<Scheduler>,
}

/// Handle returned by [`effect`]: runs the effect on demand and exposes it
/// for disposal.
#[derive(Clone, Debug)]
pub struct EffectRunner {
    effect: ReactiveEffect,
}

impl EffectRunner {
    /// Force a run of the underlying effect.
    pub fn run(&self) -> Option<Value> {
        self.effect.run()
    }

    pub fn effect(&self) -> &ReactiveEffect {
        &self.effect
    }

    /// Stop the underlying effect.
    pub fn stop(&self) {
        self.effect.stop();
    }
}

/// Create an effect and run it immediately.
///
/// # Example
///
/// ```rust,ignore
/// let count = ref_cell(0);
///
/// let c = count.clone();
/// let runner = effect(move || println!("count is {}", c.get()));
///
/// count.set(5); // prints "count is 5"
/// runner.stop();
/// ```
pub fn effect<F, R>(func: F) -> EffectRunner
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Into<Value>,
{
    effect_with(func, EffectOptions::default())
}

/// Create an effect with options.
pub fn effect_with<F, R>(func: F, options: EffectOptions) -> EffectRunner
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Into<Value>,
{
    let effect = ReactiveEffect::new(func, options.scheduler);
    if !options.lazy {
        effect.run();
    }
    EffectRunner { effect }
}

/// Create an effect whose notifications queue a job instead of re-running
/// it. The job calls `body` with the effect, unless the effect has been
/// stopped or dropped by then.
///
/// The effect's scheduler owns the job, so the job holds the effect weakly.
pub(crate) fn queued_effect<F, R, B>(func: F, body: B) -> (ReactiveEffect, Job)
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Into<Value>,
    B: Fn(&ReactiveEffect) + Send + Sync + 'static,
{
    let slot: Arc<OnceLock<WeakEffect>> = Arc::default();

    let job_slot = Arc::clone(&slot);
    let job = Job::new(move || {
        let Some(effect) = job_slot.get().and_then(WeakEffect::upgrade) else {
            return;
        };
        if effect.is_active() {
            body(&effect);
        }
    });

    let scheduled = job.clone();
    let effect = ReactiveEffect::new(func, Some(Arc::new(move || queue_job(scheduled.clone()))));
    let _ = slot.set(effect.downgrade());

    (effect, job)
}

/// Stop the effect behind `runner`.
pub fn stop(runner: &EffectRunner) {
    runner.stop();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::runtime::{track, trigger};
    use crate::reactive::{PropKey, TargetId};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let runner = effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(runner.effect().run_count(), 1);
    }

    #[test]
    fn lazy_effect_does_not_run_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let runner = effect_with(
            move || {
                run_count_clone.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );

        assert_eq!(run_count.load(Ordering::SeqCst), 0);

        runner.run();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_returns_computation_result() {
        let effect = ReactiveEffect::new(|| 41 + 1, None);
        assert_eq!(effect.run(), Some(Value::Int(42)));
    }

    #[test]
    fn effect_reruns_on_trigger() {
        let target = TargetId::new();
        let key = PropKey::from("count");
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _runner = effect(move || {
            track(target, &PropKey::from("count"));
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        trigger(target, &key);
        trigger(target, &key);
        assert_eq!(run_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stopped_effect_is_not_notified_but_can_run_untracked() {
        let target = TargetId::new();
        let key = PropKey::from("count");
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let runner = effect(move || {
            track(target, &PropKey::from("count"));
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runner.effect().dependency_count(), 1);

        runner.stop();
        runner.stop();
        assert!(!runner.effect().is_active());
        assert_eq!(runner.effect().dependency_count(), 0);

        trigger(target, &key);
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        // Manual runs still execute, but collect nothing.
        runner.run();
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
        assert_eq!(runner.effect().dependency_count(), 0);
    }

    #[test]
    fn rerun_drops_stale_dependencies() {
        let target = TargetId::new();
        let flag = Arc::new(AtomicBool::new(true));
        let flag_clone = flag.clone();

        let runner = effect(move || {
            if flag_clone.load(Ordering::SeqCst) {
                track(target, &PropKey::from("a"));
            } else {
                track(target, &PropKey::from("b"));
            }
        });

        let graph = crate::reactive::DependencyGraph::global();
        assert_eq!(graph.subscriber_count(target, &PropKey::from("a")), 1);

        flag.store(false, Ordering::SeqCst);
        runner.run();

        assert_eq!(graph.subscriber_count(target, &PropKey::from("a")), 0);
        assert_eq!(graph.subscriber_count(target, &PropKey::from("b")), 1);
    }

    #[test]
    fn self_trigger_does_not_recurse() {
        let target = TargetId::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _runner = effect(move || {
            let key = PropKey::from("x");
            track(target, &key);
            run_count_clone.fetch_add(1, Ordering::SeqCst);
            trigger(target, &key);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_effect_leaves_outer_reads_with_outer() {
        let target = TargetId::new();
        let outer_runs = Arc::new(AtomicI32::new(0));
        let inner_runs = Arc::new(AtomicI32::new(0));
        let inner_slot = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o = outer_runs.clone();
        let i = inner_runs.clone();
        let slot = inner_slot.clone();
        let outer = effect(move || {
            o.fetch_add(1, Ordering::SeqCst);
            track(target, &PropKey::from("before"));

            let i = i.clone();
            slot.lock().push(effect(move || {
                i.fetch_add(1, Ordering::SeqCst);
                track(target, &PropKey::from("inner"));
            }));

            track(target, &PropKey::from("after"));
        });

        let graph = crate::reactive::DependencyGraph::global();
        assert_eq!(outer.effect().dependency_count(), 2);
        assert_eq!(graph.subscriber_count(target, &PropKey::from("before")), 1);
        assert_eq!(graph.subscriber_count(target, &PropKey::from("after")), 1);
        assert_eq!(graph.subscriber_count(target, &PropKey::from("inner")), 1);

        trigger(target, &PropKey::from("inner"));
        assert_eq!(outer_runs.load(Ordering::SeqCst), 1);
        assert_eq!(inner_runs.load(Ordering::SeqCst), 2);

        trigger(target, &PropKey::from("after"));
        assert_eq!(outer_runs.load(Ordering::SeqCst), 2);

        for runner in inner_slot.lock().iter() {
            runner.stop();
        }
    }

    #[test]
    fn effect_stopping_itself_during_trigger_spares_siblings() {
        let target = TargetId::new();
        let key = PropKey::from("count");
        let first_runs = Arc::new(AtomicI32::new(0));
        let second_runs = Arc::new(AtomicI32::new(0));
        let me: Arc<std::sync::OnceLock<ReactiveEffect>> = Arc::default();

        let runs = first_runs.clone();
        let slot = me.clone();
        let first = effect(move || {
            track(target, &PropKey::from("count"));
            if runs.fetch_add(1, Ordering::SeqCst) >= 1 {
                if let Some(me) = slot.get() {
                    me.stop();
                }
            }
        });
        let _ = me.set(first.effect().clone());

        let runs = second_runs.clone();
        let _second = effect(move || {
            track(target, &PropKey::from("count"));
            runs.fetch_add(1, Ordering::SeqCst);
        });

        trigger(target, &key);
        assert_eq!(first_runs.load(Ordering::SeqCst), 2);
        assert_eq!(second_runs.load(Ordering::SeqCst), 2);
        assert!(!first.effect().is_active());

        let graph = crate::reactive::DependencyGraph::global();
        assert_eq!(graph.subscriber_count(target, &key), 1);

        trigger(target, &key);
        assert_eq!(first_runs.load(Ordering::SeqCst), 2);
        assert_eq!(second_runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panic_in_body_restores_context() {
        let runner = effect_with(
            || -> Value { panic!("computation failed") },
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| runner.run()));

        assert!(result.is_err());
        assert_eq!(ReactiveContext::depth(), 0);
        assert!(!runner.effect().is_running());
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = ReactiveEffect::new(|| {}, None);
        let effect2 = effect1.clone();

        assert_eq!(effect1, effect2);
        effect1.run();
        assert_eq!(effect2.run_count(), 1);

        effect1.stop();
        assert!(!effect2.is_active());
    }
}
