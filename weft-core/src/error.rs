//! Error types.
//!
//! Most reactive operations cannot fail: re-entrant effect runs are
//! suppressed silently, and a panic inside an effect body propagates to the
//! caller of `run()`. The errors below cover the cases that are surfaced to
//! callers as values instead.

use thiserror::Error;

use crate::reactive::PropKey;
use crate::scheduler::JobId;

/// Errors raised by the reactive layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// A write went through a read-only wrapper.
    #[error("cannot write `{key}`: target is read-only")]
    ReadonlyWrite { key: PropKey },

    /// A computed cell without a setter was assigned to.
    #[error("computed value has no setter")]
    ComputedWithoutSetter,

    /// A list operation was applied to a record.
    #[error("target is not a list")]
    NotAList,

    /// The key cannot address a property of this target.
    #[error("`{key}` is not a valid key for this target")]
    InvalidKey { key: PropKey },
}

/// Errors collected while flushing the job queue.
///
/// A failing job never stops the flush; its error is recorded in the
/// [`FlushReport`](crate::scheduler::FlushReport) and the next job runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("job {job:?} panicked: {message}")]
    JobPanicked { job: JobId, message: String },

    #[error("job {job:?} re-queued itself more than {limit} times in one flush")]
    RecursionLimitExceeded { job: JobId, limit: u32 },
}

/// Errors raised while patching a tree against the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// A node that should already be mounted carries no host handle.
    #[error("{what} is not mounted")]
    Unmounted { what: &'static str },

    /// The host reported no parent for a node that must have one.
    #[error("host node has no parent")]
    NoParent,
}
