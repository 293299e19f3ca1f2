//! Deferred execution queue
//!
//! A thread-wide FIFO of zero-argument jobs. Every continuation dispatch goes
//! through here, so nothing a deferred value does runs inside the caller's
//! stack frame. Jobs appended while the queue drains run after everything
//! already queued, never ahead of it.

use crate::diagnostics;
use crate::error::Failure;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

/// A queued unit of work.
pub type Job = Box<dyn FnOnce()>;

/// Executed slots are compacted out once more than this many accumulate.
const COMPACT_THRESHOLD: usize = 1024;

struct JobQueue {
    /// Slot at `start` is `None` while its job runs.
    jobs: Vec<Option<Job>>,
    /// Index of the next job to run.
    start: usize,
    /// Host "run soon" primitive, fired on the empty -> non-empty transition.
    run_soon: Option<Rc<dyn Fn()>>,
    total_enqueued: u64,
    /// Bumped by `reset`, so a drain never retires a slot of a newer queue.
    epoch: u64,
}

impl JobQueue {
    fn new(epoch: u64) -> Self {
        Self {
            jobs: Vec::new(),
            start: 0,
            run_soon: None,
            total_enqueued: 0,
            epoch,
        }
    }

    fn pending(&self) -> usize {
        self.jobs.len() - self.start
    }

    fn take_head(&mut self) -> Option<(Job, u64)> {
        let epoch = self.epoch;
        self.jobs
            .get_mut(self.start)
            .and_then(Option::take)
            .map(|job| (job, epoch))
    }

    /// Retire the head slot taken during `epoch`. A no-op if the queue was
    /// reset while that job ran.
    fn advance(&mut self, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        self.start += 1;
        if self.start >= self.jobs.len() {
            self.jobs.clear();
            self.start = 0;
        } else if self.start > COMPACT_THRESHOLD {
            self.jobs.drain(..self.start);
            self.start = 0;
        }
    }
}

thread_local! {
    static QUEUE: RefCell<JobQueue> = RefCell::new(JobQueue::new(0));
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Schedule `job` to run after the current synchronous work.
pub fn soon<F>(job: F)
where
    F: FnOnce() + 'static,
{
    let run_soon = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        q.jobs.push(Some(Box::new(job)));
        q.total_enqueued += 1;
        if q.pending() == 1 {
            q.run_soon.clone()
        } else {
            None
        }
    });

    if let Some(hook) = run_soon {
        hook();
    }
}

/// Clears the draining flag even if a reporter panics mid-drain.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|d| d.set(false));
    }
}

/// Run queued jobs until none are left, including jobs queued along the way.
/// Returns the number of jobs run.
///
/// Called from inside a job this returns 0 immediately; the outer drain picks
/// the new work up in order.
pub fn run_until_stalled() -> usize {
    if DRAINING.with(|d| d.replace(true)) {
        return 0;
    }
    let _guard = DrainGuard;

    let mut ran = 0;
    loop {
        let Some((job, epoch)) = QUEUE.with(|q| q.borrow_mut().take_head()) else {
            break;
        };

        let result = catch_unwind(AssertUnwindSafe(job));
        // Retire the slot before reporting: the reporter is user code too.
        QUEUE.with(|q| q.borrow_mut().advance(epoch));
        ran += 1;

        if let Err(payload) = result {
            diagnostics::report_error(&Value::Error(Failure::from_panic(payload)));
        }
    }
    ran
}

/// Number of jobs waiting to run.
pub fn pending_jobs() -> usize {
    QUEUE.with(|q| q.borrow().pending())
}

pub fn has_pending_jobs() -> bool {
    pending_jobs() > 0
}

/// Number of jobs ever enqueued on this thread since the last reset.
pub fn total_enqueued() -> u64 {
    QUEUE.with(|q| q.borrow().total_enqueued)
}

/// Install the host primitive that requests a drain.
pub fn set_run_soon_hook<F>(hook: F)
where
    F: Fn() + 'static,
{
    QUEUE.with(|q| q.borrow_mut().run_soon = Some(Rc::new(hook)));
}

pub fn clear_run_soon_hook() {
    QUEUE.with(|q| q.borrow_mut().run_soon = None);
}

/// Drop all queued jobs and the run-soon hook.
///
/// Safe to call from inside a job: the running drain keeps going with
/// whatever is queued after the reset.
pub fn reset() {
    let dropped = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        let next = JobQueue::new(q.epoch.wrapping_add(1));
        std::mem::replace(&mut *q, next)
    });
    // Jobs may own deferred values; drop them outside the borrow.
    drop(dropped);
}
