//! Integration Tests for the Reactive Runtime
//!
//! These tests verify that reactive state, the scheduler and the renderer
//! work together correctly.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use weft_core::error::ReactiveError;
use weft_core::reactive::{
    computed, effect, is_reactive, is_readonly, reactive, readonly, ref_cell, to_raw, watch,
    watch_effect, Target, Value, WatchOptions,
};
use weft_core::render::{h, Component, HostOp, MemoryHost, Renderer, VNode};
use weft_core::scheduler::{next_tick, tick};

fn setup() -> (Renderer<MemoryHost>, weft_core::render::NodeId) {
    let mut host = MemoryHost::new();
    let root = host.create_root();
    (Renderer::new(host), root)
}

fn keyed_list(keys: &[&str]) -> VNode {
    h("ul").children(keys.iter().map(|k| h("li").key(*k).text_content(*k)))
}

/// Test that an effect re-runs when a reactive property it read changes.
#[test]
fn effect_tracks_reactive_property() {
    let state = reactive(json!({ "count": 0 }));
    let proxy = state.as_proxy().cloned().unwrap();
    let observed = Arc::new(AtomicI32::new(-1));

    let p = proxy.clone();
    let o = observed.clone();
    let _runner = effect(move || {
        o.store(p.get("count").as_int().unwrap_or(-1) as i32, Ordering::SeqCst);
    });
    assert_eq!(observed.load(Ordering::SeqCst), 0);

    proxy.set("count", 42);
    assert_eq!(observed.load(Ordering::SeqCst), 42);
}

/// Test that a plain effect logs synchronously while a watcher waits for
/// the flush.
#[tokio::test]
async fn effect_is_sync_and_watch_is_deferred() {
    let count = ref_cell(0);
    let log = Arc::new(Mutex::new(Vec::new()));

    let c = count.clone();
    let l = log.clone();
    let runner = effect(move || {
        l.lock().push(c.get());
    });
    assert_eq!(*log.lock(), vec![Value::Int(0)]);

    count.set(1);
    assert_eq!(*log.lock(), vec![Value::Int(0), Value::Int(1)]);
    runner.stop();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let _handle = watch(
        count.clone(),
        move |new, old| sink.lock().push((new.clone(), old.clone())),
        WatchOptions::default(),
    );

    count.set(2);
    assert!(calls.lock().is_empty());

    next_tick().await;
    assert_eq!(*calls.lock(), vec![(Value::Int(2), Value::Int(1))]);
}

/// Test that a computed value is cached and recomputed lazily.
#[test]
fn computed_is_memoized() {
    let count = ref_cell(1);
    let compute_count = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    let cc = compute_count.clone();
    let doubled = computed(move || {
        cc.fetch_add(1, Ordering::SeqCst);
        c.get().as_int().unwrap_or(0) * 2
    });

    // Nothing computed until read.
    assert_eq!(compute_count.load(Ordering::SeqCst), 0);

    assert_eq!(doubled.get(), Value::Int(2));
    assert_eq!(doubled.get(), Value::Int(2));
    assert_eq!(compute_count.load(Ordering::SeqCst), 1);

    // Writes only mark it dirty.
    count.set(2);
    count.set(3);
    assert_eq!(compute_count.load(Ordering::SeqCst), 1);

    assert_eq!(doubled.get(), Value::Int(6));
    assert_eq!(compute_count.load(Ordering::SeqCst), 2);
}

/// Test that a chain of computed values feeds an effect.
#[test]
fn computed_chain_drives_effect() {
    let base = ref_cell(2);

    let b = base.clone();
    let squared = computed(move || b.get().as_int().unwrap_or(0).pow(2));
    let s = squared.clone();
    let plus_one = computed(move || s.get().as_int().unwrap_or(0) + 1);

    let seen = Arc::new(AtomicI32::new(0));
    let p = plus_one.clone();
    let o = seen.clone();
    let _runner = effect(move || {
        o.store(p.get().as_int().unwrap_or(0) as i32, Ordering::SeqCst);
    });
    assert_eq!(seen.load(Ordering::SeqCst), 5);

    base.set(3);
    assert_eq!(seen.load(Ordering::SeqCst), 10);
}

/// Test that wrapping is idempotent and reversible.
#[test]
fn wrapping_identity() {
    let raw = Target::from_fields([("a", 1)]);

    let first = reactive(raw.clone());
    let second = reactive(raw.clone());
    assert!(first.same(&second));
    assert!(reactive(first.clone()).same(&first));

    let unwrapped = to_raw(&first);
    assert!(unwrapped.target().unwrap().ptr_eq(&raw));
    assert!(!is_reactive(&unwrapped));
}

/// Test that a read-only view rejects writes but still tracks.
#[test]
fn readonly_view_of_reactive_state() {
    let state = reactive(json!({ "n": 1 }));
    let view = readonly(state.clone());
    assert!(is_readonly(&view));
    assert!(is_reactive(&view));

    let err = view
        .as_proxy()
        .unwrap()
        .try_set("n", 2)
        .unwrap_err();
    assert!(matches!(err, ReactiveError::ReadonlyWrite { .. }));

    let seen = Arc::new(AtomicI32::new(0));
    let v = view.as_proxy().cloned().unwrap();
    let o = seen.clone();
    let _runner = effect(move || {
        o.store(v.get("n").as_int().unwrap_or(0) as i32, Ordering::SeqCst);
    });

    state.as_proxy().unwrap().set("n", 7);
    assert_eq!(seen.load(Ordering::SeqCst), 7);
}

/// Test that many writes before a flush cause one watcher run.
#[test]
fn writes_are_batched_until_tick() {
    let count = ref_cell(0);
    let runs = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    let r = runs.clone();
    let _handle = watch_effect(move || {
        c.get();
        r.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    for i in 1..=10 {
        count.set(i);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let report = tick();
    assert!(report.is_ok());
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// Test that writes to several independent sources of one watcher are
/// batched into a single run.
#[test]
fn writes_to_independent_sources_are_batched() {
    let a = ref_cell(1);
    let b = ref_cell(2);
    let c = ref_cell(3);
    let sums = Arc::new(Mutex::new(Vec::new()));

    let (ra, rb, rc) = (a.clone(), b.clone(), c.clone());
    let s = sums.clone();
    let _handle = watch_effect(move || {
        let sum = [&ra, &rb, &rc]
            .iter()
            .map(|r| r.get().as_int().unwrap_or(0))
            .sum::<i64>();
        s.lock().push(sum);
    });
    assert_eq!(*sums.lock(), vec![6]);

    a.set(10);
    b.set(20);
    c.set(30);
    assert_eq!(*sums.lock(), vec![6]);

    let report = tick();
    assert!(report.is_ok());
    assert_eq!(report.jobs_run, 1);
    assert_eq!(*sums.lock(), vec![6, 60]);
}

/// Test that a watcher callback fires once the runtime gets a turn, with no
/// explicit flush call.
#[tokio::test]
async fn watch_callback_fires_after_yielding_to_the_runtime() {
    let count = ref_cell(0);
    let calls = Arc::new(Mutex::new(Vec::new()));

    let sink = calls.clone();
    let _handle = watch(
        count.clone(),
        move |new, old| sink.lock().push((new.clone(), old.clone())),
        WatchOptions::default(),
    );

    count.set(1);
    count.set(2);
    assert!(calls.lock().is_empty());

    tokio::task::yield_now().await;
    assert_eq!(*calls.lock(), vec![(Value::Int(2), Value::Int(0))]);
    assert!(!weft_core::scheduler::has_pending_flush());

    count.set(3);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert_eq!(
        *calls.lock(),
        vec![(Value::Int(2), Value::Int(0)), (Value::Int(3), Value::Int(2))]
    );
}

/// Test that swapping two keyed children issues a single move.
#[test]
fn keyed_swap_is_one_move() {
    let (renderer, root) = setup();
    renderer.render(Some(keyed_list(&["a", "b", "c"])), root).unwrap();

    let (ul, b) = renderer.with_host(|host| {
        let ul = host.children(root)[0];
        (ul, host.children(ul)[1])
    });
    renderer.with_host(|host| host.take_ops());

    renderer.render(Some(keyed_list(&["a", "c", "b"])), root).unwrap();

    let ops = renderer.with_host(|host| host.take_ops());
    assert_eq!(
        ops,
        vec![HostOp::Insert {
            child: b,
            parent: ul,
            anchor: None
        }]
    );
    assert_eq!(
        renderer.with_host(|host| host.to_html(root)),
        "<ul><li>a</li><li>c</li><li>b</li></ul>"
    );
}

/// Test that appending a keyed child creates only that child.
#[test]
fn keyed_append_creates_one_node() {
    let (renderer, root) = setup();
    renderer.render(Some(keyed_list(&["a", "b", "c"])), root).unwrap();
    renderer.with_host(|host| host.take_ops());

    renderer
        .render(Some(keyed_list(&["a", "b", "c", "d"])), root)
        .unwrap();

    let ops = renderer.with_host(|host| host.take_ops());
    let creates = ops
        .iter()
        .filter(|op| matches!(op, HostOp::Create { .. }))
        .count();
    assert_eq!(creates, 1);
    assert!(!ops.iter().any(|op| matches!(op, HostOp::Remove { .. })));
}

/// Test that removing keyed children only removes them.
#[test]
fn keyed_removal_touches_only_removed_nodes() {
    let (renderer, root) = setup();
    renderer
        .render(Some(keyed_list(&["a", "b", "c", "d"])), root)
        .unwrap();
    renderer.with_host(|host| host.take_ops());

    renderer.render(Some(keyed_list(&["a", "d"])), root).unwrap();

    let ops = renderer.with_host(|host| host.take_ops());
    assert_eq!(ops.len(), 2);
    assert!(ops.iter().all(|op| matches!(op, HostOp::Remove { .. })));
}

/// Test that a component re-renders once per flush after its state changes.
#[tokio::test]
async fn component_rerenders_after_next_tick() {
    let count = ref_cell(0);

    let c = count.clone();
    let counter = Component::new("Counter", move |_props| {
        let n = c.get().as_int().unwrap_or(0);
        h("p").text_content(format!("count: {n}"))
    });

    let (renderer, root) = setup();
    renderer
        .render(Some(VNode::component(&counter)), root)
        .unwrap();
    assert_eq!(
        renderer.with_host(|host| host.to_html(root)),
        "<p>count: 0</p>"
    );

    count.set(1);
    count.set(2);
    // Not rendered synchronously.
    assert_eq!(
        renderer.with_host(|host| host.to_html(root)),
        "<p>count: 0</p>"
    );

    let report = next_tick().await;
    assert!(report.is_ok());
    assert_eq!(
        renderer.with_host(|host| host.to_html(root)),
        "<p>count: 2</p>"
    );
}

/// Test that a parent re-render pushes new props into its child.
#[test]
fn props_flow_from_parent_to_child() {
    let label = ref_cell("first");
    let child_renders = Arc::new(AtomicUsize::new(0));

    let cr = child_renders.clone();
    let child = Component::new("Label", move |props| {
        cr.fetch_add(1, Ordering::SeqCst);
        let text = props.get("text");
        h("span").text_content(text.as_str().unwrap_or_default().to_string())
    });

    let l = label.clone();
    let parent = Component::new("Parent", move |_props| {
        h("div").child(VNode::component(&child).prop("text", l.get()))
    });

    let (renderer, root) = setup();
    renderer.render(Some(VNode::component(&parent)), root).unwrap();
    assert_eq!(
        renderer.with_host(|host| host.to_html(root)),
        "<div><span>first</span></div>"
    );
    assert_eq!(child_renders.load(Ordering::SeqCst), 1);

    label.set("second");
    tick();

    assert_eq!(
        renderer.with_host(|host| host.to_html(root)),
        "<div><span>second</span></div>"
    );
    // Updated synchronously by the parent, not again by the queue.
    assert_eq!(child_renders.load(Ordering::SeqCst), 2);
}

/// Test that mounted hooks run once the tree is in the host.
#[test]
fn mounted_hook_sees_mounted_tree() {
    let mounted = Arc::new(AtomicUsize::new(0));

    let m = mounted.clone();
    let component = Component::new("Hooked", |_| h("div")).on_mounted(move || {
        m.fetch_add(1, Ordering::SeqCst);
    });

    let (renderer, root) = setup();
    renderer
        .render(Some(VNode::component(&component)), root)
        .unwrap();

    assert_eq!(mounted.load(Ordering::SeqCst), 1);
    assert!(renderer.root_el(root).is_some());
}

/// Test that an unmounted component stops reacting.
#[test]
fn unmounted_component_stops_rendering() {
    let count = ref_cell(0);
    let renders = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    let r = renders.clone();
    let component = Component::new("Gone", move |_| {
        r.fetch_add(1, Ordering::SeqCst);
        h("i").text_content(c.get().to_json().to_string())
    });

    let (renderer, root) = setup();
    renderer
        .render(Some(VNode::component(&component)), root)
        .unwrap();
    renderer.render(None, root).unwrap();

    count.set(5);
    tick();

    assert_eq!(renders.load(Ordering::SeqCst), 1);
    assert_eq!(renderer.with_host(|host| host.to_html(root)), "");
}

/// Test that keyed components keep their instances across a reorder.
#[test]
fn keyed_components_are_moved_not_recreated() {
    let mounts = Arc::new(AtomicUsize::new(0));

    let m = mounts.clone();
    let item = Component::new("Item", |props| {
        h("li").text_content(props.get("name").as_str().unwrap_or_default().to_string())
    })
    .on_mounted(move || {
        m.fetch_add(1, Ordering::SeqCst);
    });

    let list = |names: &[&str]| {
        h("ul").children(
            names
                .iter()
                .map(|n| VNode::component(&item).key(*n).prop("name", *n)),
        )
    };

    let (renderer, root) = setup();
    renderer.render(Some(list(&["x", "y", "z"])), root).unwrap();
    assert_eq!(mounts.load(Ordering::SeqCst), 3);

    renderer.render(Some(list(&["z", "x", "y"])), root).unwrap();

    assert_eq!(mounts.load(Ordering::SeqCst), 3);
    assert_eq!(
        renderer.with_host(|host| host.to_html(root)),
        "<ul><li>z</li><li>x</li><li>y</li></ul>"
    );
}
