//! Renderer
//!
//! The renderer turns virtual trees into host operations. Given the tree
//! mounted last time and a new one, [`Renderer::patch`] applies the
//! smallest set of [`HostOps`] calls that makes the host match the new tree,
//! reusing host nodes wherever the old and new node are the same type with
//! the same key.
//!
//! # Keyed Children
//!
//! Child lists are diffed in five steps:
//!
//! 1. Patch the common prefix of same-type nodes.
//! 2. Patch the common suffix.
//! 3. If only new nodes remain, mount them; if only old ones remain,
//!    unmount them.
//! 4. Otherwise map every new key to its new index, walk the remaining old
//!    nodes, and patch each one that has a counterpart in place (unmounting
//!    the rest). Record for each new position which old position it came
//!    from.
//! 5. If anything moved, compute the longest increasing subsequence of that
//!    record. Walking the new nodes backwards, mount the ones with no old
//!    counterpart and move the reused ones that are not on the subsequence.
//!
//! Nodes on the subsequence already sit in the right order relative to one
//! another, so they are never touched by the host.
//!
//! # Host Access
//!
//! The host is shared behind a mutex, and each host operation takes the
//! lock on its own. The lock is never held while user code (a component's
//! render function) runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::component::{first_host_node, ComponentInstance};
use super::host::{HostOps, NodeId};
use super::sequence::get_sequence;
use super::vnode::{Children, Key, Props, VNode, VNodeType};
use crate::error::RenderError;
use crate::reactive::queued_effect;
use crate::scheduler;

enum Shape {
    Element(Arc<str>),
    Text,
    Comment,
    Fragment,
    Component,
}

fn shape(kind: &VNodeType) -> Shape {
    match kind {
        VNodeType::Element(tag) => Shape::Element(tag.clone()),
        VNodeType::Text => Shape::Text,
        VNodeType::Comment => Shape::Comment,
        VNodeType::Fragment => Shape::Fragment,
        VNodeType::Component(_) => Shape::Component,
    }
}

/// Patches virtual trees into a host.
///
/// Cloning produces another handle to the same renderer and host.
pub struct Renderer<H: HostOps> {
    host: Arc<Mutex<H>>,

    /// The tree last rendered into each container.
    roots: Arc<Mutex<HashMap<NodeId, VNode>>>,
}

impl<H: HostOps> Clone for Renderer<H> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            roots: Arc::clone(&self.roots),
        }
    }
}

impl<H: HostOps> Renderer<H> {
    pub fn new(host: H) -> Self {
        Self {
            host: Arc::new(Mutex::new(host)),
            roots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `f` with exclusive access to the host.
    pub fn with_host<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.host.lock())
    }

    /// Render `vnode` into `container`, patching against whatever was
    /// rendered there before. `None` unmounts the previous tree.
    ///
    /// Post-flush callbacks queued by the render (mounted hooks) run before
    /// this returns.
    pub fn render(&self, vnode: Option<VNode>, container: NodeId) -> Result<(), RenderError> {
        let prev = self.roots.lock().remove(&container);

        let result = match (prev, vnode) {
            (Some(mut prev), None) => self.unmount(&mut prev),
            (mut prev, Some(mut next)) => {
                let result = self.patch(prev.as_mut(), &mut next, container, None);
                self.roots.lock().insert(container, next);
                result
            }
            (None, None) => Ok(()),
        };

        scheduler::flush_post_flush_cbs();
        result
    }

    /// First host node of the tree rendered into `container`.
    pub fn root_el(&self, container: NodeId) -> Option<NodeId> {
        self.roots.lock().get(&container).and_then(first_host_node)
    }

    /// Make the host match `n2`, given that it currently shows `n1`.
    ///
    /// New host nodes are inserted into `container` before `anchor`. On
    /// return `n2` carries the host handles; `n1` has given its handles up
    /// and must not be patched again.
    pub fn patch(
        &self,
        n1: Option<&mut VNode>,
        n2: &mut VNode,
        container: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), RenderError> {
        let (n1, anchor) = match n1 {
            Some(old) if !old.is_same_type(n2) => {
                let anchor = self.next_host_node(old).or(anchor);
                self.unmount(old)?;
                (None, anchor)
            }
            other => (other, anchor),
        };

        match shape(&n2.kind) {
            Shape::Text => self.process_text(n1, n2, container, anchor),
            Shape::Comment => self.process_comment(n1, n2, container, anchor),
            Shape::Fragment => self.process_fragment(n1, n2, container, anchor),
            Shape::Element(tag) => match n1 {
                None => self.mount_element(&tag, n2, container, anchor),
                Some(n1) => self.patch_element(n1, n2),
            },
            Shape::Component => match n1 {
                None => self.mount_component(n2, container, anchor),
                Some(n1) => self.update_component(n1, n2),
            },
        }
    }

    fn process_text(
        &self,
        n1: Option<&mut VNode>,
        n2: &mut VNode,
        container: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), RenderError> {
        match n1 {
            None => {
                let mut host = self.host.lock();
                let el = host.create_text(n2.text_of());
                host.insert(el, container, anchor);
                n2.el = Some(el);
            }
            Some(n1) => {
                let el = n1.el.ok_or(RenderError::Unmounted { what: "text node" })?;
                n2.el = Some(el);
                if n1.text_of() != n2.text_of() {
                    self.host.lock().set_text(el, n2.text_of());
                }
            }
        }
        Ok(())
    }

    fn process_comment(
        &self,
        n1: Option<&mut VNode>,
        n2: &mut VNode,
        container: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), RenderError> {
        match n1 {
            None => {
                let mut host = self.host.lock();
                let el = host.create_comment(n2.text_of());
                host.insert(el, container, anchor);
                n2.el = Some(el);
            }
            // Comments are static.
            Some(n1) => n2.el = n1.el,
        }
        Ok(())
    }

    fn process_fragment(
        &self,
        n1: Option<&mut VNode>,
        n2: &mut VNode,
        container: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), RenderError> {
        match n1 {
            None => {
                let (start, end) = {
                    let mut host = self.host.lock();
                    let start = host.create_text("");
                    let end = host.create_text("");
                    host.insert(start, container, anchor);
                    host.insert(end, container, anchor);
                    (start, end)
                };
                n2.el = Some(start);
                n2.anchor = Some(end);
                if let Children::List(children) = &mut n2.children {
                    self.mount_children(children, container, Some(end))?;
                }
                Ok(())
            }
            Some(n1) => {
                n2.el = n1.el;
                n2.anchor = n1.anchor;
                let end = n2.anchor;
                self.patch_children(n1, n2, container, end)
            }
        }
    }

    fn mount_element(
        &self,
        tag: &str,
        n2: &mut VNode,
        container: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), RenderError> {
        let el = self.host.lock().create_element(tag);
        n2.el = Some(el);

        match &mut n2.children {
            Children::Text(text) => self.host.lock().set_element_text(el, text),
            Children::List(children) => self.mount_children(children, el, None)?,
            Children::None => {}
        }

        let mut host = self.host.lock();
        for (key, value) in &n2.props {
            host.patch_prop(el, key, None, Some(value));
        }
        host.insert(el, container, anchor);
        Ok(())
    }

    fn patch_element(&self, n1: &mut VNode, n2: &mut VNode) -> Result<(), RenderError> {
        let el = n1.el.ok_or(RenderError::Unmounted { what: "element" })?;
        n2.el = Some(el);

        self.patch_children(n1, n2, el, None)?;
        self.patch_props(el, &n1.props, &n2.props);
        Ok(())
    }

    fn patch_props(&self, el: NodeId, old: &Props, new: &Props) {
        let mut host = self.host.lock();
        for (key, prev) in old {
            if !new.contains_key(key) {
                host.patch_prop(el, key, Some(prev), None);
            }
        }
        for (key, next) in new {
            let prev = old.get(key);
            if prev.map_or(true, |prev| !prev.same(next)) {
                host.patch_prop(el, key, prev, Some(next));
            }
        }
    }

    fn patch_children(
        &self,
        n1: &mut VNode,
        n2: &mut VNode,
        container: NodeId,
        parent_anchor: Option<NodeId>,
    ) -> Result<(), RenderError> {
        let old = std::mem::take(&mut n1.children);

        match (old, &mut n2.children) {
            (Children::List(mut c1), Children::List(c2)) => {
                self.patch_keyed_children(&mut c1, c2, container, parent_anchor)
            }
            (Children::List(mut c1), Children::Text(text)) => {
                self.unmount_children(&mut c1)?;
                self.host.lock().set_element_text(container, text);
                Ok(())
            }
            (Children::List(mut c1), Children::None) => self.unmount_children(&mut c1),
            (Children::Text(old), Children::Text(text)) => {
                if old != *text {
                    self.host.lock().set_element_text(container, text);
                }
                Ok(())
            }
            (Children::None, Children::Text(text)) => {
                self.host.lock().set_element_text(container, text);
                Ok(())
            }
            (Children::Text(_), Children::List(c2)) => {
                self.host.lock().set_element_text(container, "");
                self.mount_children(c2, container, parent_anchor)
            }
            (Children::Text(_), Children::None) => {
                self.host.lock().set_element_text(container, "");
                Ok(())
            }
            (Children::None, Children::List(c2)) => {
                self.mount_children(c2, container, parent_anchor)
            }
            (Children::None, Children::None) => Ok(()),
        }
    }

    fn mount_children(
        &self,
        children: &mut [VNode],
        container: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), RenderError> {
        for child in children {
            self.patch(None, child, container, anchor)?;
        }
        Ok(())
    }

    fn unmount_children(&self, children: &mut [VNode]) -> Result<(), RenderError> {
        for child in children {
            self.unmount(child)?;
        }
        Ok(())
    }

    fn patch_keyed_children(
        &self,
        c1: &mut [VNode],
        c2: &mut [VNode],
        container: NodeId,
        parent_anchor: Option<NodeId>,
    ) -> Result<(), RenderError> {
        let l2 = c2.len();
        let mut i = 0usize;
        let mut e1 = c1.len() as isize - 1;
        let mut e2 = l2 as isize - 1;

        // 1. common prefix
        while (i as isize) <= e1 && (i as isize) <= e2 {
            if !c1[i].is_same_type(&c2[i]) {
                break;
            }
            self.patch(Some(&mut c1[i]), &mut c2[i], container, None)?;
            i += 1;
        }

        // 2. common suffix
        while (i as isize) <= e1 && (i as isize) <= e2 {
            let (old, new) = (e1 as usize, e2 as usize);
            if !c1[old].is_same_type(&c2[new]) {
                break;
            }
            self.patch(Some(&mut c1[old]), &mut c2[new], container, None)?;
            e1 -= 1;
            e2 -= 1;
        }

        // 3. only additions or only removals left
        if (i as isize) > e1 {
            if (i as isize) <= e2 {
                let next_pos = (e2 + 1) as usize;
                let anchor = if next_pos < l2 {
                    first_host_node(&c2[next_pos])
                } else {
                    parent_anchor
                };
                for node in &mut c2[i..=e2 as usize] {
                    self.patch(None, node, container, anchor)?;
                }
            }
            return Ok(());
        }
        if (i as isize) > e2 {
            return self.unmount_children(&mut c1[i..=e1 as usize]);
        }

        // 4. unknown middle: patch what can be reused, unmount the rest
        let (s1, s2) = (i, i);
        let (e1, e2) = (e1 as usize, e2 as usize);

        let mut key_to_new_index: HashMap<Key, usize> = HashMap::new();
        for (index, node) in c2.iter().enumerate().take(e2 + 1).skip(s2) {
            if let Some(key) = &node.key {
                if key_to_new_index.insert(key.clone(), index).is_some() {
                    tracing::warn!(%key, "duplicate key among siblings");
                }
            }
        }

        let to_be_patched = e2 - s2 + 1;
        // 0 means "new node"; otherwise old index + 1.
        let mut new_index_to_old_index = vec![0usize; to_be_patched];
        let mut moved = false;
        let mut max_new_index_so_far = 0;
        let mut patched = 0;

        for old_index in s1..=e1 {
            if patched >= to_be_patched {
                self.unmount(&mut c1[old_index])?;
                continue;
            }

            let new_index = match &c1[old_index].key {
                Some(key) => key_to_new_index.get(key).copied(),
                None => (s2..=e2).find(|&j| {
                    new_index_to_old_index[j - s2] == 0
                        && c2[j].key.is_none()
                        && c1[old_index].is_same_type(&c2[j])
                }),
            };

            // A slot already claimed means a duplicate key: reuse only once.
            let new_index = new_index.filter(|&j| new_index_to_old_index[j - s2] == 0);

            match new_index {
                None => self.unmount(&mut c1[old_index])?,
                Some(j) => {
                    new_index_to_old_index[j - s2] = old_index + 1;
                    if j >= max_new_index_so_far {
                        max_new_index_so_far = j;
                    } else {
                        moved = true;
                    }
                    self.patch(Some(&mut c1[old_index]), &mut c2[j], container, None)?;
                    patched += 1;
                }
            }
        }

        // 5. move and mount
        let sequence = if moved {
            get_sequence(&new_index_to_old_index)
        } else {
            Vec::new()
        };
        let mut stable = sequence.iter().rev().peekable();

        for offset in (0..to_be_patched).rev() {
            let index = s2 + offset;
            let anchor = if index + 1 < l2 {
                first_host_node(&c2[index + 1])
            } else {
                parent_anchor
            };

            if new_index_to_old_index[offset] == 0 {
                self.patch(None, &mut c2[index], container, anchor)?;
            } else if moved {
                if stable.peek() == Some(&&offset) {
                    stable.next();
                } else {
                    self.move_node(&c2[index], container, anchor);
                }
            }
        }

        Ok(())
    }

    /// Re-insert the host nodes of a mounted node before `anchor`.
    fn move_node(&self, vnode: &VNode, container: NodeId, anchor: Option<NodeId>) {
        if let Some(instance) = &vnode.component {
            if let Some(sub_tree) = instance.sub_tree.lock().as_ref() {
                self.move_node(sub_tree, container, anchor);
            }
            return;
        }

        match &vnode.kind {
            VNodeType::Fragment => {
                if let Some(start) = vnode.el {
                    self.host.lock().insert(start, container, anchor);
                }
                if let Children::List(children) = &vnode.children {
                    for child in children {
                        self.move_node(child, container, anchor);
                    }
                }
                if let Some(end) = vnode.anchor {
                    self.host.lock().insert(end, container, anchor);
                }
            }
            _ => {
                if let Some(el) = vnode.el {
                    self.host.lock().insert(el, container, anchor);
                }
            }
        }
    }

    /// The host node right after everything `vnode` rendered.
    fn next_host_node(&self, vnode: &VNode) -> Option<NodeId> {
        if let Some(instance) = &vnode.component {
            return instance
                .sub_tree
                .lock()
                .as_ref()
                .and_then(|sub_tree| self.next_host_node(sub_tree));
        }

        let last = match vnode.kind {
            VNodeType::Fragment => vnode.anchor,
            _ => vnode.el,
        };
        last.and_then(|node| self.host.lock().next_sibling(node))
    }

    /// Remove everything `vnode` rendered and stop its components.
    pub fn unmount(&self, vnode: &mut VNode) -> Result<(), RenderError> {
        self.unmount_inner(vnode, true)
    }

    /// `remove` is false below an element that is itself being removed: its
    /// descendants leave the host with it, but their components must still
    /// be stopped.
    fn unmount_inner(&self, vnode: &mut VNode, remove: bool) -> Result<(), RenderError> {
        if let Some(instance) = vnode.component.take() {
            instance.stop();
            tracing::debug!(component = instance.name(), uid = instance.uid(), "unmount");
            let sub_tree = instance.sub_tree.lock().take();
            if let Some(mut sub_tree) = sub_tree {
                self.unmount_inner(&mut sub_tree, remove)?;
            }
            return Ok(());
        }

        match &vnode.kind {
            VNodeType::Fragment => {
                if let Children::List(children) = &mut vnode.children {
                    for child in children {
                        self.unmount_inner(child, remove)?;
                    }
                }
                if remove {
                    let mut host = self.host.lock();
                    for node in [vnode.el, vnode.anchor].into_iter().flatten() {
                        host.remove(node);
                    }
                }
            }
            VNodeType::Element(_) => {
                if let Children::List(children) = &mut vnode.children {
                    for child in children {
                        self.unmount_inner(child, false)?;
                    }
                }
                if remove {
                    if let Some(el) = vnode.el {
                        self.host.lock().remove(el);
                    }
                }
            }
            _ => {
                if remove {
                    if let Some(el) = vnode.el {
                        self.host.lock().remove(el);
                    }
                }
            }
        }
        Ok(())
    }

    fn mount_component(
        &self,
        n2: &mut VNode,
        container: NodeId,
        anchor: Option<NodeId>,
    ) -> Result<(), RenderError> {
        let VNodeType::Component(def) = &n2.kind else {
            return Ok(());
        };
        let instance = Arc::new(ComponentInstance::new(
            def.clone(),
            &n2.props,
            container,
            anchor,
        ));
        tracing::debug!(component = instance.name(), uid = instance.uid(), "mount");

        self.setup_render_effect(&instance);
        n2.el = instance.host_el();
        n2.component = Some(Arc::clone(&instance));
        instance.take_error()
    }

    fn update_component(&self, n1: &mut VNode, n2: &mut VNode) -> Result<(), RenderError> {
        let instance = n1
            .component
            .take()
            .ok_or(RenderError::Unmounted { what: "component" })?;

        if instance.update_props(&n2.props) {
            instance.update();
        }
        n2.el = instance.host_el();
        n2.component = Some(Arc::clone(&instance));
        instance.take_error()
    }

    /// Create the instance's render effect and run it once.
    fn setup_render_effect(&self, instance: &Arc<ComponentInstance>) {
        let renderer = self.clone();
        let weak = Arc::downgrade(instance);

        let (effect, update) = queued_effect(
            move || {
                let Some(instance) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = renderer.render_component(&instance) {
                    tracing::error!(%err, component = instance.name(), "render failed");
                    *instance.last_error.lock() = Some(err);
                }
            },
            |effect| {
                effect.run();
            },
        );

        instance.attach(effect.clone(), update);
        effect.run();
    }

    /// Render the instance and patch the result against its previous
    /// sub-tree.
    fn render_component(&self, instance: &ComponentInstance) -> Result<(), RenderError> {
        let mut next = instance.render();
        let prev = instance.sub_tree.lock().take();

        match prev {
            None => {
                let result = self.patch(None, &mut next, instance.container(), instance.anchor());
                *instance.sub_tree.lock() = Some(next);
                result?;
                instance.mark_mounted();
            }
            Some(mut prev) => {
                let container = match first_host_node(&prev) {
                    Some(el) => self.host.lock().parent_node(el),
                    None => Some(instance.container()),
                };
                let Some(container) = container else {
                    *instance.sub_tree.lock() = Some(prev);
                    return Err(RenderError::NoParent);
                };
                let anchor = self.next_host_node(&prev);

                let result = self.patch(Some(&mut prev), &mut next, container, anchor);
                *instance.sub_tree.lock() = Some(next);
                result?;
                instance.mark_updated();
            }
        }

        tracing::trace!(component = instance.name(), "rendered");
        Ok(())
    }
}
