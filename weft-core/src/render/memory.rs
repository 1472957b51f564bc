//! In-memory host tree.
//!
//! [`MemoryHost`] implements [`HostOps`] over a plain arena and records every
//! operation it receives, so tests can assert both on the resulting tree and
//! on exactly which host calls the renderer made.

use std::collections::HashMap;
use std::fmt::Write as _;

use indexmap::IndexMap;

use super::host::{HostOps, NodeId};
use crate::reactive::Value;

/// One recorded host call.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    Create { node: NodeId, kind: String },
    Insert { child: NodeId, parent: NodeId, anchor: Option<NodeId> },
    Remove { node: NodeId },
    SetText { node: NodeId, text: String },
    SetElementText { node: NodeId, text: String },
    PatchProp { node: NodeId, key: String, next: Option<Value> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MemKind {
    Root,
    Element(String),
    Text,
    Comment,
}

#[derive(Debug)]
struct MemNode {
    kind: MemKind,
    text: String,
    props: IndexMap<String, Value>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl MemNode {
    fn new(kind: MemKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
            props: IndexMap::new(),
            children: Vec::new(),
            parent: None,
        }
    }
}

/// A host tree held in memory.
#[derive(Debug, Default)]
pub struct MemoryHost {
    nodes: HashMap<NodeId, MemNode>,
    ops: Vec<HostOp>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached container to render into. Not recorded.
    pub fn create_root(&mut self) -> NodeId {
        let id = NodeId::new();
        self.nodes.insert(id, MemNode::new(MemKind::Root, ""));
        id
    }

    /// Every operation recorded so far.
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    /// Return the recorded operations and start a new log.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Number of live nodes, roots included. Removed subtrees are freed.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(&node)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Tag of an element, `None` for other nodes.
    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.nodes.get(&node)?.kind {
            MemKind::Element(tag) => Some(tag),
            _ => None,
        }
    }

    /// Content of a text or comment node.
    pub fn text(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node).map(|n| n.text.as_str())
    }

    pub fn prop(&self, node: NodeId, key: &str) -> Option<&Value> {
        self.nodes.get(&node)?.props.get(key)
    }

    /// Serialize the subtree under `node`, HTML-style. Empty text nodes
    /// (fragment anchors) render as nothing.
    pub fn to_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        match &n.kind {
            MemKind::Root => {
                for child in &n.children {
                    self.write_html(*child, out);
                }
            }
            MemKind::Text => out.push_str(&n.text),
            MemKind::Comment => {
                let _ = write!(out, "<!--{}-->", n.text);
            }
            MemKind::Element(tag) => {
                out.push('<');
                out.push_str(tag);
                for (key, value) in &n.props {
                    let rendered = match value {
                        Value::Str(s) => s.to_string(),
                        other => other.to_json().to_string(),
                    };
                    let _ = write!(out, " {key}=\"{rendered}\"");
                }
                out.push('>');
                for child in &n.children {
                    self.write_html(*child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn create(&mut self, kind: MemKind, text: &str, label: &str) -> NodeId {
        let id = NodeId::new();
        self.nodes.insert(id, MemNode::new(kind, text));
        self.ops.push(HostOp::Create {
            node: id,
            kind: label.to_string(),
        });
        id
    }

    /// Forget `node` and everything below it.
    fn drop_subtree(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.remove(&id) {
                stack.extend(n.children);
            }
        }
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.nodes.get_mut(&child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
    }
}

impl HostOps for MemoryHost {
    fn create_element(&mut self, tag: &str) -> NodeId {
        self.create(MemKind::Element(tag.to_string()), "", tag)
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.create(MemKind::Text, text, "#text")
    }

    fn create_comment(&mut self, text: &str) -> NodeId {
        self.create(MemKind::Comment, text, "#comment")
    }

    fn set_text(&mut self, node: NodeId, text: &str) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.text = text.to_string();
        }
        self.ops.push(HostOp::SetText {
            node,
            text: text.to_string(),
        });
    }

    fn set_element_text(&mut self, el: NodeId, text: &str) {
        let old = self
            .nodes
            .get_mut(&el)
            .map(|n| std::mem::take(&mut n.children))
            .unwrap_or_default();
        for child in old {
            self.drop_subtree(child);
        }

        if !text.is_empty() {
            let id = NodeId::new();
            let mut node = MemNode::new(MemKind::Text, text);
            node.parent = Some(el);
            self.nodes.insert(id, node);
            if let Some(n) = self.nodes.get_mut(&el) {
                n.children.push(id);
            }
        }

        self.ops.push(HostOp::SetElementText {
            node: el,
            text: text.to_string(),
        });
    }

    fn insert(&mut self, child: NodeId, parent: NodeId, anchor: Option<NodeId>) {
        self.detach(child);

        if let Some(p) = self.nodes.get_mut(&parent) {
            let at = anchor
                .and_then(|a| p.children.iter().position(|c| *c == a))
                .unwrap_or(p.children.len());
            p.children.insert(at, child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }

        self.ops.push(HostOp::Insert {
            child,
            parent,
            anchor,
        });
    }

    fn remove(&mut self, child: NodeId) {
        self.detach(child);
        self.drop_subtree(child);
        self.ops.push(HostOp::Remove { node: child });
    }

    fn patch_prop(&mut self, el: NodeId, key: &str, _prev: Option<&Value>, next: Option<&Value>) {
        if let Some(n) = self.nodes.get_mut(&el) {
            match next {
                Some(value) => {
                    n.props.insert(key.to_string(), value.clone());
                }
                None => {
                    n.props.shift_remove(key);
                }
            }
        }
        self.ops.push(HostOp::PatchProp {
            node: el,
            key: key.to_string(),
            next: next.cloned(),
        });
    }

    fn parent_node(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node)?.parent
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent_node(node)?;
        let siblings = &self.nodes.get(&parent)?.children;
        let at = siblings.iter().position(|c| *c == node)?;
        siblings.get(at + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_with_anchor_and_move() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let a = host.create_text("a");
        let b = host.create_text("b");

        host.insert(a, root, None);
        host.insert(b, root, Some(a));
        assert_eq!(host.to_html(root), "ba");

        // Re-inserting an attached node moves it.
        host.insert(b, root, None);
        assert_eq!(host.to_html(root), "ab");
        assert_eq!(host.children(root), &[a, b]);
        assert_eq!(host.next_sibling(a), Some(b));
    }

    #[test]
    fn element_text_replaces_children() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let div = host.create_element("div");
        let span = host.create_element("span");
        host.insert(div, root, None);
        host.insert(span, div, None);

        host.set_element_text(div, "hi");
        assert_eq!(host.to_html(root), "<div>hi</div>");
        assert_eq!(host.parent_node(span), None);
        assert_eq!(host.tag(span), None);
    }

    #[test]
    fn removed_subtrees_are_freed() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let ul = host.create_element("ul");
        host.insert(ul, root, None);
        for text in ["a", "b"] {
            let li = host.create_element("li");
            let t = host.create_text(text);
            host.insert(t, li, None);
            host.insert(li, ul, None);
        }
        assert_eq!(host.node_count(), 6);

        host.remove(ul);
        assert_eq!(host.node_count(), 1);
        assert_eq!(host.to_html(root), "");
    }

    #[test]
    fn props_render_in_html() {
        let mut host = MemoryHost::new();
        let root = host.create_root();
        let div = host.create_element("div");
        host.insert(div, root, None);

        host.patch_prop(div, "id", None, Some(&Value::from("x")));
        host.patch_prop(div, "n", None, Some(&Value::Int(3)));
        assert_eq!(host.to_html(root), r#"<div id="x" n="3"></div>"#);

        host.patch_prop(div, "id", None, None);
        assert_eq!(host.prop(div, "id"), None);
    }
}
