//! Reactive Primitives
//!
//! This module implements the reactive state layer: proxies over records
//! and lists, ref cells, computed values, effects and watchers.
//!
//! # Concepts
//!
//! ## Targets and Proxies
//!
//! A [`Target`] is a raw record or list. Wrapping it with [`reactive`]
//! yields a proxy: reads through the proxy are tracked, writes through it
//! notify whoever read the written key. Nested records and lists are
//! wrapped lazily as they are read, and the same target always yields the
//! same proxy for the same flags.
//!
//! ## Refs
//!
//! A [`Ref`] is a single reactive cell. Composite values stored in a deep
//! ref are made reactive.
//!
//! ## Computed
//!
//! A [`Computed`] caches a derived value and recomputes lazily, on the
//! first read after one of its dependencies changed.
//!
//! ## Effects and Watchers
//!
//! An effect re-runs when anything it read changes. Watchers build on
//! effects but defer their callback to the scheduler, so several writes
//! produce one callback.
//!
//! # Implementation Notes
//!
//! Dependencies live in a global graph keyed by target and property. The
//! running effect is found on a thread-local context stack: when a tracked
//! read happens, the effect on top of the stack is recorded for that key.

mod cell;
mod computed;
mod context;
mod effect;
mod proxy;
mod runtime;
mod subscriber;
mod value;
mod watch;

pub use cell::{is_ref, ref_cell, shallow_ref, unref, Ref};
pub use computed::{computed, computed_with_setter, Computed};
pub use context::{untracked, ReactiveContext};
pub use effect::{
    effect, effect_with, stop, EffectOptions, EffectRunner, ReactiveEffect, Scheduler, WeakEffect,
};
pub use proxy::{
    is_proxy, is_reactive, is_readonly, is_shallow, mark_raw, reactive, readonly,
    shallow_reactive, shallow_readonly, to_raw, Reactive,
};
pub use runtime::{track, trigger, Dep, DependencyGraph};
pub use subscriber::{EffectId, TargetId};
pub use value::{Composite, PropKey, Target, Value, MAX_LIST_PADDING};
pub use watch::{traverse, watch, watch_effect, WatchHandle, WatchOptions, WatchSource};

pub(crate) use effect::queued_effect;
