//! Host Operations
//!
//! The renderer never touches a real tree directly. Everything it does to
//! the host goes through [`HostOps`]: a DOM, a terminal UI, or the in-memory
//! tree in [`MemoryHost`](super::MemoryHost) used by the tests.
//!
//! Host nodes are identified by [`NodeId`] handles that the host hands out
//! when it creates them.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::reactive::Value;

/// Handle to a node owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node handle.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// The primitive operations a host tree supports.
///
/// `insert` has DOM `insertBefore` semantics: inserting a node that is
/// already attached moves it, and a missing anchor appends.
pub trait HostOps: Send + 'static {
    fn create_element(&mut self, tag: &str) -> NodeId;

    fn create_text(&mut self, text: &str) -> NodeId;

    fn create_comment(&mut self, text: &str) -> NodeId;

    /// Replace the content of a text or comment node.
    fn set_text(&mut self, node: NodeId, text: &str);

    /// Replace every child of an element with a single text.
    fn set_element_text(&mut self, el: NodeId, text: &str);

    fn insert(&mut self, child: NodeId, parent: NodeId, anchor: Option<NodeId>);

    /// Detach a node from its parent.
    fn remove(&mut self, child: NodeId);

    /// Apply a property change. `next` is `None` when the property is gone.
    fn patch_prop(&mut self, el: NodeId, key: &str, prev: Option<&Value>, next: Option<&Value>);

    fn parent_node(&self, node: NodeId) -> Option<NodeId>;

    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;
}
