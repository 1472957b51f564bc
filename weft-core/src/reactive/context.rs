//! Reactive Context
//!
//! The reactive context tracks which effect is currently running. This is
//! what lets a property read attribute itself to a computation without any
//! explicit registration: `track` simply asks the context for the top of the
//! stack.
//!
//! # Implementation
//!
//! We use a thread-local stack. Running an effect pushes it, and the guard
//! returned by [`ReactiveContext::enter`] pops it again when dropped, so the
//! previous effect is restored even if the computation panics.
//!
//! An entry may also be empty: [`ReactiveContext::untracked`] pushes a slot
//! that hides every outer effect, which is how a stopped effect runs its
//! body without collecting dependencies.

use std::cell::RefCell;

use super::effect::ReactiveEffect;
use super::subscriber::EffectId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<ReactiveEffect>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    effect_id: Option<EffectId>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given effect.
    ///
    /// While this context is active, any reactive read records `effect` as
    /// a subscriber. The context is exited when the returned guard drops.
    pub fn enter(effect: ReactiveEffect) -> Self {
        let effect_id = Some(effect.id());
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Some(effect)));
        Self { effect_id }
    }

    /// Enter a context in which reads are not tracked by anyone.
    pub fn untracked() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(None));
        Self { effect_id: None }
    }

    /// Check if there is an effect collecting dependencies right now.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// Get the effect currently collecting dependencies, if any.
    pub fn current() -> Option<ReactiveEffect> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Get the ID of the current effect, if any.
    pub fn current_id() -> Option<EffectId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.as_ref().map(ReactiveEffect::id))
        })
    }

    /// Number of entries on this thread's stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        // The popped effect is dropped after the borrow ends; dropping the last
        // handle of an effect must not re-enter the stack while it is borrowed.
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        if let Some(entry) = &popped {
            debug_assert_eq!(
                entry.as_ref().map(ReactiveEffect::id),
                self.effect_id,
                "ReactiveContext mismatch: expected {:?}",
                self.effect_id,
            );
        }
        drop(popped);
    }
}

/// Run `f` with dependency tracking paused.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}
