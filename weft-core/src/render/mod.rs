//! Rendering
//!
//! Virtual trees, the host abstraction they are rendered into, and the
//! renderer that keeps the two in sync.
//!
//! - [`VNode`]: an immutable description of what should be on screen
//! - [`HostOps`]: the primitive operations of a host tree
//! - [`Renderer`]: patches a new virtual tree against the previous one and
//!   issues the minimal host operations
//! - [`Component`]: a render function whose output re-renders itself,
//!   batched, when reactive state it read changes

mod component;
mod host;
mod memory;
mod renderer;
mod sequence;
mod vnode;

pub use component::{Component, ComponentInstance};
pub use host::{HostOps, NodeId};
pub use memory::{HostOp, MemoryHost};
pub use renderer::Renderer;
pub use sequence::get_sequence;
pub use vnode::{h, Children, Key, Props, VNode, VNodeType};
