//! Weft Core
//!
//! This crate provides the core runtime for the Weft UI framework.
//! It implements:
//!
//! - Reactive state (proxies, refs, computed values, effects, watchers)
//! - A batching job scheduler
//! - Virtual trees and a keyed reconciler that patches them into a host
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: reactive primitives and dependency tracking
//! - `scheduler`: the job queue that batches re-renders and watcher callbacks
//! - `render`: virtual nodes, components and the renderer
//! - `error`: error types
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_core::reactive::{computed, effect, ref_cell};
//!
//! let count = ref_cell(0);
//!
//! let c = count.clone();
//! let doubled = computed(move || c.get().as_int().unwrap_or(0) * 2);
//!
//! let d = doubled.clone();
//! effect(move || println!("doubled: {:?}", d.get()));
//!
//! count.set(5);
//! // Effect re-runs, prints: "doubled: Int(10)"
//! ```

pub mod error;
pub mod reactive;
pub mod render;
pub mod scheduler;
