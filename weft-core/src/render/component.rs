//! Components
//!
//! A [`Component`] is a render function plus optional lifecycle hooks. Each
//! time a component node is mounted, a [`ComponentInstance`] is created for
//! it with:
//!
//! - its props, held in a shallow reactive record and handed to the render
//!   function through a read-only view
//! - a render effect: running it calls the render function and patches the
//!   result against the previous sub-tree. Anything the render function
//!   reads becomes a dependency.
//! - an update job on the scheduler. The render effect never re-runs
//!   synchronously on a state change; it queues the update job, so several
//!   writes before a flush cause one re-render.
//!
//! `mounted` and `updated` hooks run as post-flush callbacks, after the
//! host tree reflects the render.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::host::NodeId;
use super::vnode::{Props, VNode};
use crate::error::RenderError;
use crate::reactive::{PropKey, Reactive, ReactiveEffect, Target};
use crate::scheduler::{self, Job};

type RenderFn = dyn Fn(&Reactive) -> VNode + Send + Sync;
type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct ComponentDef {
    name: Arc<str>,
    render: Arc<RenderFn>,
    mounted: Option<Hook>,
    updated: Option<Hook>,
}

/// A component definition. Clones share identity, and two component nodes
/// are the same type only if they share a definition.
#[derive(Clone)]
pub struct Component {
    def: Arc<ComponentDef>,
}

impl Component {
    pub fn new<F>(name: &str, render: F) -> Self
    where
        F: Fn(&Reactive) -> VNode + Send + Sync + 'static,
    {
        Self {
            def: Arc::new(ComponentDef {
                name: Arc::from(name),
                render: Arc::new(render),
                mounted: None,
                updated: None,
            }),
        }
    }

    fn with_def(self, f: impl FnOnce(&mut ComponentDef)) -> Self {
        let mut def = Arc::try_unwrap(self.def).unwrap_or_else(|shared| (*shared).clone());
        f(&mut def);
        Self { def: Arc::new(def) }
    }

    /// Run `hook` after the component's first render reached the host.
    pub fn on_mounted(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.with_def(|def| def.mounted = Some(Arc::new(hook)))
    }

    /// Run `hook` after each re-render reached the host.
    pub fn on_updated(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.with_def(|def| def.updated = Some(Arc::new(hook)))
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn ptr_eq(&self, other: &Component) -> bool {
        Arc::ptr_eq(&self.def, &other.def)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component").field("name", &self.def.name).finish()
    }
}

/// A mounted component.
pub struct ComponentInstance {
    uid: u64,
    def: Component,

    /// Shallow reactive record of the current props.
    props: Reactive,

    /// What the render function sees.
    props_view: Reactive,

    pub(crate) sub_tree: Mutex<Option<VNode>>,
    effect: OnceLock<ReactiveEffect>,
    update: OnceLock<Job>,
    mounted: AtomicBool,

    /// Where the first render is mounted.
    container: NodeId,
    anchor: Option<NodeId>,

    /// Error from the most recent render, if it failed.
    pub(crate) last_error: Mutex<Option<RenderError>>,

    mounted_hook: Option<Job>,
    updated_hook: Option<Job>,
}

impl ComponentInstance {
    pub(crate) fn new(
        def: Component,
        props: &Props,
        container: NodeId,
        anchor: Option<NodeId>,
    ) -> Self {
        static UID: AtomicU64 = AtomicU64::new(0);

        let record = Target::from_fields(props.iter().map(|(k, v)| (k.clone(), v.clone())));
        let props = Reactive::shallow(record);
        let props_view = props.readonly_view();
        let hook_job = |hook: &Option<Hook>| {
            hook.clone().map(|hook| Job::new(move || hook()))
        };

        Self {
            uid: UID.fetch_add(1, Ordering::Relaxed),
            mounted_hook: hook_job(&def.def.mounted),
            updated_hook: hook_job(&def.def.updated),
            def,
            props,
            props_view,
            sub_tree: Mutex::new(None),
            effect: OnceLock::new(),
            update: OnceLock::new(),
            mounted: AtomicBool::new(false),
            container,
            anchor,
            last_error: Mutex::new(None),
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// Read-only view of the current props.
    pub fn props(&self) -> &Reactive {
        &self.props_view
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Number of renders so far.
    pub fn render_count(&self) -> usize {
        self.effect.get().map_or(0, ReactiveEffect::run_count)
    }

    /// First host node of the rendered sub-tree.
    pub fn host_el(&self) -> Option<NodeId> {
        self.sub_tree.lock().as_ref().and_then(first_host_node)
    }

    pub(crate) fn container(&self) -> NodeId {
        self.container
    }

    pub(crate) fn anchor(&self) -> Option<NodeId> {
        self.anchor
    }

    pub(crate) fn attach(&self, effect: ReactiveEffect, update: Job) {
        let _ = self.effect.set(effect);
        let _ = self.update.set(update);
    }

    /// Call the render function.
    pub(crate) fn render(&self) -> VNode {
        (self.def.def.render)(&self.props_view)
    }

    pub(crate) fn mark_mounted(&self) {
        self.mounted.store(true, Ordering::SeqCst);
        if let Some(hook) = &self.mounted_hook {
            scheduler::queue_post_flush_cb(hook.clone());
        }
    }

    pub(crate) fn mark_updated(&self) {
        if let Some(hook) = &self.updated_hook {
            scheduler::queue_post_flush_cb(hook.clone());
        }
    }

    /// Apply new props. Returns `true` if any prop changed.
    pub(crate) fn update_props(&self, next: &Props) -> bool {
        let mut changed = false;
        for (key, value) in next {
            changed |= self.props.set(key.clone(), value.clone());
        }
        for key in self.props.raw().keys() {
            if let PropKey::Field(name) = &key {
                if !next.contains_key(name) {
                    changed |= self.props.delete(key.clone());
                }
            }
        }
        changed
    }

    /// Re-render now, dropping any queued update.
    pub(crate) fn update(&self) {
        if let Some(job) = self.update.get() {
            scheduler::invalidate_job(job.id());
        }
        if let Some(effect) = self.effect.get() {
            effect.run();
        }
    }

    /// Stop rendering for good. A queued update becomes a no-op.
    pub(crate) fn stop(&self) {
        if let Some(effect) = self.effect.get() {
            effect.stop();
        }
        if let Some(job) = self.update.get() {
            scheduler::invalidate_job(job.id());
        }
        self.mounted.store(false, Ordering::SeqCst);
    }

    pub(crate) fn take_error(&self) -> Result<(), RenderError> {
        match self.last_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("uid", &self.uid)
            .field("name", &self.name())
            .field("mounted", &self.is_mounted())
            .field("render_count", &self.render_count())
            .finish()
    }
}

/// First host node of a mounted node, looking through components.
pub(crate) fn first_host_node(vnode: &VNode) -> Option<NodeId> {
    match &vnode.component {
        Some(instance) => instance.host_el(),
        None => vnode.el,
    }
}
