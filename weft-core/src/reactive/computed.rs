//! Computed Implementation
//!
//! A computed cell is a cached derived value that re-evaluates only when one
//! of the values it read last time changes.
//!
//! # How Computed Cells Work
//!
//! 1. The getter runs inside an internal lazy effect, on first access.
//!
//! 2. When accessed again and nothing it read has changed, the cached value
//!    is returned.
//!
//! 3. When a dependency changes, the internal effect does not re-run. Its
//!    scheduler only marks the cell dirty and notifies the cell's own
//!    subscribers, once per clean-to-dirty transition.
//!
//! 4. The next access re-runs the getter and caches the result.
//!
//! Cells that are never read again stay dirty and cost nothing. A chain of
//! computed cells propagates dirtiness without evaluating anything.
//!
//! # Thread Safety
//!
//! The getter is never called with a lock held: the cached value is only
//! locked to store or clone it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::effect::ReactiveEffect;
use super::runtime::{track_effects, trigger_effects, Dep};
use super::value::Value;
use crate::error::ReactiveError;

type Setter = Box<dyn Fn(Value) + Send + Sync>;

/// Shared between the cell and its effect's scheduler.
struct DirtyState {
    dirty: AtomicBool,
    dep: Arc<Dep>,
}

/// Marks the cell dirty again if the getter panics, so the next read
/// retries instead of serving the stale cache.
struct DirtyOnUnwind<'a>(&'a DirtyState);

impl Drop for DirtyOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.dirty.store(true, Ordering::SeqCst);
        }
    }
}

struct ComputedInner {
    state: Arc<DirtyState>,
    value: Mutex<Value>,
    effect: ReactiveEffect,
    setter: Option<Setter>,
}

/// A cached derived value.
///
/// Cloning produces another handle to the same cell.
#[derive(Clone)]
pub struct Computed {
    inner: Arc<ComputedInner>,
}

impl Computed {
    fn create<F, R>(getter: F, setter: Option<Setter>) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Value>,
    {
        let state = Arc::new(DirtyState {
            dirty: AtomicBool::new(true),
            dep: Dep::new(),
        });

        let scheduler_state = Arc::clone(&state);
        let effect = ReactiveEffect::new(
            getter,
            Some(Arc::new(move || {
                if !scheduler_state.dirty.swap(true, Ordering::SeqCst) {
                    trigger_effects(&scheduler_state.dep);
                }
            })),
        );

        Self {
            inner: Arc::new(ComputedInner {
                state,
                value: Mutex::new(Value::Null),
                effect,
                setter,
            }),
        }
    }

    /// Read the value, recomputing if dirty.
    pub fn get(&self) -> Value {
        track_effects(&self.inner.state.dep);

        // Cleared before running: a dependency written during the getter
        // marks the cell dirty again.
        if self.inner.state.dirty.swap(false, Ordering::SeqCst) {
            let _restore = DirtyOnUnwind(&self.inner.state);
            match self.inner.effect.run() {
                Some(value) => *self.inner.value.lock() = value,
                // Re-entrant read from inside the getter: keep the cache.
                None => self.inner.state.dirty.store(true, Ordering::SeqCst),
            }
        }

        self.inner.value.lock().clone()
    }

    /// Assign through the setter.
    pub fn set(&self, value: impl Into<Value>) -> Result<(), ReactiveError> {
        match &self.inner.setter {
            Some(setter) => {
                setter(value.into());
                Ok(())
            }
            None => {
                tracing::warn!("write to computed value without a setter");
                Err(ReactiveError::ComputedWithoutSetter)
            }
        }
    }

    /// Whether the next `get` recomputes.
    pub fn is_dirty(&self) -> bool {
        self.inner.state.dirty.load(Ordering::SeqCst)
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.setter.is_none()
    }

    /// The internal effect running the getter.
    pub fn effect(&self) -> &ReactiveEffect {
        &self.inner.effect
    }

    /// Detach the cell from its dependencies. It keeps returning its last
    /// value until something forces a recompute.
    pub fn stop(&self) {
        self.inner.effect.stop();
    }

    /// Number of effects subscribed to the cell.
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.dep.len()
    }

    pub fn ptr_eq(&self, other: &Computed) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("dirty", &self.is_dirty())
            .field("readonly", &self.is_readonly())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a read-only computed cell. The getter runs on first access.
pub fn computed<F, R>(getter: F) -> Computed
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Into<Value>,
{
    Computed::create(getter, None)
}

/// Create a computed cell whose assignments go through `setter`.
pub fn computed_with_setter<F, R, S>(getter: F, setter: S) -> Computed
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Into<Value>,
    S: Fn(Value) + Send + Sync + 'static,
{
    Computed::create(getter, Some(Box::new(setter)))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
