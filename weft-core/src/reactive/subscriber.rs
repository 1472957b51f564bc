//! Identity types for the reactive system.
//!
//! Every effect and every target object gets a unique, process-wide ID when
//! created. IDs are how the dependency graph keys its entries and how
//! dependency-sets deduplicate subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an effect.
///
/// Effects (plain, computed, watch and component render effects) are
/// recorded in dependency-sets by this ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    /// Generate a new unique effect ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a target object.
///
/// The dependency graph and the proxy caches are keyed by target identity,
/// never by target contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}
