//! Job Scheduler
//!
//! The scheduler batches deferred work. Watchers and component renders do
//! not react to a write synchronously; their effects queue a [`Job`], and the
//! queue is drained later by a flush. Queuing a job that is already pending
//! is a no-op, so any number of writes before a flush cost one run.
//!
//! # Flushing
//!
//! 1. Jobs run in the order they were queued. A job queued while the flush
//!    is in progress (a parent render updating a child's props, say) is run
//!    by the same flush.
//!
//! 2. Once the main queue is empty, post-flush callbacks run (mounted and
//!    updated hooks). If they queue more jobs, the flush goes around again.
//!
//! 3. A job that keeps re-queuing itself is cut off after
//!    [`SchedulerConfig::recursion_limit`] runs in one flush.
//!
//! A job that panics is isolated: the panic is caught, logged and reported,
//! and the flush continues with the next job.
//!
//! # Event Loops
//!
//! Queues are per thread: each thread is its own event loop, and a job runs
//! on the thread whose state change queued it.
//!
//! When work is queued on a thread driving a current-thread tokio runtime,
//! a flush task is spawned on that runtime, so the queue drains at the next
//! await point without any explicit call. Only one flush task is pending at
//! a time. Multi-thread runtimes may resume the task on another worker, and
//! threads with no runtime have nowhere to spawn it; both drain by calling
//! [`tick`] (synchronous) or awaiting [`next_tick`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::SchedulerError;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A deferred unit of work.
///
/// Clones share identity: queuing two clones of one job runs it once.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    func: Arc<dyn Fn() + Send + Sync>,
}

impl Job {
    pub fn new(func: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            id: JobId::new(),
            func: Arc::new(func),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Run the job now, outside of any flush.
    pub fn run(&self) {
        (self.func)()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish()
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum runs of one job within one flush.
    pub recursion_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 100,
        }
    }
}

/// Summary of one flush.
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Jobs and post-flush callbacks that ran.
    pub jobs_run: usize,

    /// Jobs that panicked or hit the recursion limit.
    pub errors: Vec<SchedulerError>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
struct JobQueue {
    jobs: VecDeque<Job>,
    pending: HashSet<JobId>,
}

impl JobQueue {
    fn push(&mut self, job: Job) -> bool {
        if !self.pending.insert(job.id) {
            return false;
        }
        self.jobs.push_back(job);
        true
    }

    fn pop(&mut self) -> Option<Job> {
        let job = self.jobs.pop_front()?;
        self.pending.remove(&job.id);
        Some(job)
    }

    fn remove(&mut self, id: JobId) -> bool {
        if !self.pending.remove(&id) {
            return false;
        }
        self.jobs.retain(|job| job.id != id);
        true
    }

    fn take(&mut self) -> VecDeque<Job> {
        self.pending.clear();
        std::mem::take(&mut self.jobs)
    }

    fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[derive(Default)]
struct SchedulerState {
    queue: JobQueue,
    post: JobQueue,
    flushing: bool,
    flush_pending: bool,
    config: SchedulerConfig,
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

fn with_state<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    SCHEDULER.with(|state| f(&mut state.borrow_mut()))
}

/// Replace this thread's scheduler settings.
pub fn configure(config: SchedulerConfig) {
    with_state(|state| state.config = config);
}

pub fn config() -> SchedulerConfig {
    with_state(|state| state.config)
}

/// Queue `job` unless it is already pending, and schedule a flush if none
/// is pending.
pub fn queue_job(job: Job) {
    let id = job.id;
    if with_state(|state| state.queue.push(job)) {
        tracing::trace!(job = ?id, "job queued");
        queue_flush();
    }
}

/// Queue a callback to run after the main queue of the next flush.
pub fn queue_post_flush_cb(job: Job) {
    let id = job.id;
    if with_state(|state| state.post.push(job)) {
        tracing::trace!(job = ?id, "post-flush callback queued");
        queue_flush();
    }
}

/// Spawn a flush task on the current runtime unless one is pending or a
/// flush is running.
fn queue_flush() {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    if handle.runtime_flavor() != tokio::runtime::RuntimeFlavor::CurrentThread {
        return;
    }

    let schedule = with_state(|state| {
        let schedule = !state.flushing && !state.flush_pending;
        if schedule {
            state.flush_pending = true;
        }
        schedule
    });
    if schedule {
        tracing::trace!("flush scheduled");
        handle.spawn(async {
            flush_jobs();
        });
    }
}

/// Drop `job` from the queue if it is pending. Used when the work it would
/// do has just been done synchronously.
pub fn invalidate_job(id: JobId) {
    if with_state(|state| state.queue.remove(id)) {
        tracing::trace!(job = ?id, "job invalidated");
    }
}

/// Whether a spawned flush task has not run yet.
pub fn is_flush_scheduled() -> bool {
    with_state(|state| state.flush_pending)
}

/// Whether work is waiting for a flush.
pub fn has_pending_flush() -> bool {
    with_state(|state| !state.queue.is_empty() || !state.post.is_empty())
}

pub fn is_flushing() -> bool {
    with_state(|state| state.flushing)
}

/// Clears the flushing flag when a flush ends.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        with_state(|state| state.flushing = false);
    }
}

fn run_isolated(job: &Job, report: &mut FlushReport) {
    report.jobs_run += 1;
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        tracing::error!(job = ?job.id, %message, "job panicked");
        report.errors.push(SchedulerError::JobPanicked {
            job: job.id,
            message,
        });
    }
}

/// Drain the queue now.
///
/// Calling this from inside a running job does nothing; the outer flush
/// picks up whatever was queued.
pub fn flush_jobs() -> FlushReport {
    let mut report = FlushReport::default();

    let (entered, limit) = with_state(|state| {
        let entered = !state.flushing;
        state.flushing = true;
        state.flush_pending = false;
        (entered, state.config.recursion_limit)
    });
    if !entered {
        return report;
    }
    let _guard = FlushGuard;
    tracing::debug!("flush start");

    let mut runs: HashMap<JobId, u32> = HashMap::new();
    loop {
        while let Some(job) = with_state(|state| state.queue.pop()) {
            let count = runs.entry(job.id).or_insert(0);
            *count += 1;
            if *count > limit {
                tracing::error!(job = ?job.id, limit, "recursive update limit exceeded");
                report.errors.push(SchedulerError::RecursionLimitExceeded { job: job.id, limit });
                continue;
            }
            run_isolated(&job, &mut report);
        }

        let post = with_state(|state| state.post.take());
        if post.is_empty() {
            break;
        }
        for job in &post {
            run_isolated(job, &mut report);
        }
    }

    tracing::debug!(jobs_run = report.jobs_run, errors = report.errors.len(), "flush complete");
    report
}

/// Run pending post-flush callbacks now, outside of a flush.
///
/// Used after a synchronous render so mounted hooks see the mounted tree.
pub fn flush_post_flush_cbs() -> FlushReport {
    let mut report = FlushReport::default();
    if is_flushing() {
        return report;
    }
    loop {
        let post = with_state(|state| state.post.take());
        if post.is_empty() {
            break;
        }
        for job in &post {
            run_isolated(job, &mut report);
        }
    }
    report
}

/// Flush if anything is pending.
pub fn tick() -> FlushReport {
    if has_pending_flush() {
        flush_jobs()
    } else {
        FlushReport::default()
    }
}

/// Yield to the async runtime, then flush whatever is still pending.
///
/// A scheduled flush task usually runs during the yield, in which case the
/// returned report is empty.
pub async fn next_tick() -> FlushReport {
    tokio::task::yield_now().await;
    tick()
}
