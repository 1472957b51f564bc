//! Virtual nodes.
//!
//! A [`VNode`] describes one node of the tree to render: an element with
//! props and children, a text, a comment, a fragment of several siblings,
//! or a component. After it is mounted it also carries the host handles the
//! renderer created for it, which the next patch reuses.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::component::{Component, ComponentInstance};
use super::host::NodeId;
use crate::reactive::Value;

/// Identity of a node among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Str(Arc<str>),
    Int(i64),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(Arc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(Arc::from(s))
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Int(i as i64)
    }
}

/// Properties of an element or component, in insertion order.
pub type Props = IndexMap<Arc<str>, Value>;

/// What a node is.
#[derive(Clone)]
pub enum VNodeType {
    Element(Arc<str>),
    Text,
    Comment,
    Fragment,
    Component(Component),
}

impl PartialEq for VNodeType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (VNodeType::Element(a), VNodeType::Element(b)) => a == b,
            (VNodeType::Text, VNodeType::Text)
            | (VNodeType::Comment, VNodeType::Comment)
            | (VNodeType::Fragment, VNodeType::Fragment) => true,
            (VNodeType::Component(a), VNodeType::Component(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for VNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VNodeType::Element(tag) => write!(f, "Element({tag})"),
            VNodeType::Text => f.write_str("Text"),
            VNodeType::Comment => f.write_str("Comment"),
            VNodeType::Fragment => f.write_str("Fragment"),
            VNodeType::Component(c) => write!(f, "Component({})", c.name()),
        }
    }
}

/// Children of a node. Text and comment nodes keep their content here.
#[derive(Clone, Debug, Default)]
pub enum Children {
    #[default]
    None,
    Text(Arc<str>),
    List(Vec<VNode>),
}

/// A node of the virtual tree.
#[derive(Clone)]
pub struct VNode {
    pub(crate) kind: VNodeType,
    pub(crate) key: Option<Key>,
    pub(crate) props: Props,
    pub(crate) children: Children,

    /// Host node: the element or text itself, a fragment's start anchor,
    /// or a component's root host node.
    pub(crate) el: Option<NodeId>,

    /// A fragment's end anchor.
    pub(crate) anchor: Option<NodeId>,

    pub(crate) component: Option<Arc<ComponentInstance>>,
}

/// An element node with the given tag.
pub fn h(tag: &str) -> VNode {
    VNode::new(VNodeType::Element(Arc::from(tag)), Children::None)
}

impl VNode {
    fn new(kind: VNodeType, children: Children) -> Self {
        Self {
            kind,
            key: None,
            props: Props::new(),
            children,
            el: None,
            anchor: None,
            component: None,
        }
    }

    pub fn text(content: impl Into<Arc<str>>) -> Self {
        Self::new(VNodeType::Text, Children::Text(content.into()))
    }

    pub fn comment(content: impl Into<Arc<str>>) -> Self {
        Self::new(VNodeType::Comment, Children::Text(content.into()))
    }

    pub fn fragment(children: impl IntoIterator<Item = VNode>) -> Self {
        Self::new(
            VNodeType::Fragment,
            Children::List(children.into_iter().collect()),
        )
    }

    pub fn component(component: &Component) -> Self {
        Self::new(VNodeType::Component(component.clone()), Children::None)
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.props.insert(Arc::from(name), value.into());
        self
    }

    /// Append a child node. Replaces text children.
    pub fn child(mut self, child: VNode) -> Self {
        match &mut self.children {
            Children::List(list) => list.push(child),
            _ => self.children = Children::List(vec![child]),
        }
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = VNode>) -> Self {
        self.children = Children::List(children.into_iter().collect());
        self
    }

    /// Set the element's content to a single text.
    pub fn text_content(mut self, text: impl Into<Arc<str>>) -> Self {
        self.children = Children::Text(text.into());
        self
    }

    pub fn kind(&self) -> &VNodeType {
        &self.kind
    }

    pub fn get_key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    pub fn get_children(&self) -> &Children {
        &self.children
    }

    /// Host node of a mounted node.
    pub fn el(&self) -> Option<NodeId> {
        self.el
    }

    /// Instance of a mounted component node.
    pub fn instance(&self) -> Option<&Arc<ComponentInstance>> {
        self.component.as_ref()
    }

    /// Two nodes can be patched into one another when type and key agree.
    pub fn is_same_type(&self, other: &VNode) -> bool {
        self.kind == other.kind && self.key == other.key
    }

    pub(crate) fn text_of(&self) -> &str {
        match &self.children {
            Children::Text(text) => text,
            _ => "",
        }
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VNode")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("props", &self.props)
            .field("children", &self.children)
            .field("el", &self.el)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let node = h("ul")
            .prop("id", "list")
            .child(h("li").key(1).text_content("one"))
            .child(h("li").key(2).text_content("two"));

        assert_eq!(node.props().get("id"), Some(&Value::from("list")));
        match node.get_children() {
            Children::List(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1].get_key(), Some(&Key::Int(2)));
            }
            other => panic!("unexpected children {other:?}"),
        }
    }

    #[test]
    fn same_type_needs_matching_key() {
        assert!(h("li").key("a").is_same_type(&h("li").key("a")));
        assert!(!h("li").key("a").is_same_type(&h("li").key("b")));
        assert!(!h("li").is_same_type(&h("p")));
        assert!(VNode::text("x").is_same_type(&VNode::text("y")));
    }
}
