//! Schedulers decouple the call stack of a producer from that of a consumer.
//!
//! A [`Scheduler`] creates isolated [`Worker`]s. A worker runs the tasks
//! scheduled on it one at a time, in FIFO order. Workers are single-owner and
//! not meant to be shared across threads.

pub mod local;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

pub use local::LocalScheduler;

/// A unit of work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Shared handle to a scheduler.
pub type SchedulerRef = Rc<dyn Scheduler>;

/// Creates workers that represent sequential execution of tasks.
pub trait Scheduler {
    /// Create an isolated, sequential worker.
    fn create_worker(&self) -> Rc<dyn Worker>;
}

/// A sequential executor of tasks.
pub trait Worker {
    /// Schedule a task. It runs eventually, after every task previously
    /// scheduled on this worker, and never overlapping with another one.
    fn schedule(&self, task: Task);

    /// Number of tasks accepted but not yet started.
    fn pending(&self) -> usize {
        0
    }
}

/// A scheduler whose workers drain their queue on the calling thread.
///
/// Scheduling from inside a running task appends to the queue instead of
/// running immediately, so a chain of synchronous pull/push round-trips is
/// executed as an iterative loop rather than as nested stack frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrampolineScheduler;

impl TrampolineScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TrampolineScheduler {
    fn create_worker(&self) -> Rc<dyn Worker> {
        Rc::new(TrampolineWorker::new())
    }
}

/// Worker of a [`TrampolineScheduler`].
#[derive(Default)]
pub struct TrampolineWorker {
    queue: RefCell<VecDeque<Task>>,
    draining: Cell<bool>,
}

impl TrampolineWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the worker is currently running its queue.
    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }
}

impl Worker for TrampolineWorker {
    fn schedule(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
        if self.draining.get() {
            return;
        }

        let _guard = DrainGuard::enter(&self.draining);
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
    }

    fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

/// Clears the draining flag even if a task unwinds.
struct DrainGuard<'a>(&'a Cell<bool>);

impl<'a> DrainGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A scheduler whose workers run every task inline, immediately.
///
/// No asynchrony boundary and no protection against deep recursion; useful to
/// run a pipeline exactly as if it were connected directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl ImmediateScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for ImmediateScheduler {
    fn create_worker(&self) -> Rc<dyn Worker> {
        Rc::new(ImmediateWorker)
    }
}

struct ImmediateWorker;

impl Worker for ImmediateWorker {
    fn schedule(&self, task: Task) {
        task();
    }
}
