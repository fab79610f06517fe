//! A scheduler backed by a tokio [`LocalSet`].
//!
//! Each worker owns an unbounded channel drained by one local task, so the
//! tasks of a worker run sequentially and in FIFO order, each on a later turn
//! of the event loop than the call that scheduled it. Everything stays on the
//! thread driving the `LocalSet`, which is what allows stages to be `!Send`.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, LocalSet};
use tracing::debug;

use super::{Scheduler, Task, Worker};

/// Scheduler whose workers hand tasks to a tokio `LocalSet`.
///
/// Tasks only make progress while the set is driven, e.g. through
/// [`LocalScheduler::run_until`].
#[derive(Clone, Default)]
pub struct LocalScheduler {
    tasks: Rc<LocalSet>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a future on the underlying `LocalSet`.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.tasks.spawn_local(future)
    }

    /// Drive the scheduled work until `future` completes.
    pub async fn run_until<F: Future>(&self, future: F) -> F::Output {
        self.tasks.run_until(future).await
    }
}

impl Scheduler for LocalScheduler {
    fn create_worker(&self) -> Rc<dyn Worker> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let pending = Rc::new(Cell::new(0usize));
        let drained = Rc::clone(&pending);

        self.tasks.spawn_local(async move {
            while let Some(task) = rx.recv().await {
                drained.set(drained.get().saturating_sub(1));
                task();
            }
        });

        Rc::new(LocalWorker { tx, pending })
    }
}

struct LocalWorker {
    tx: mpsc::UnboundedSender<Task>,
    pending: Rc<Cell<usize>>,
}

impl Worker for LocalWorker {
    fn schedule(&self, task: Task) {
        if self.tx.send(task).is_err() {
            debug!("worker queue is closed, task dropped");
            return;
        }
        self.pending.set(self.pending.get() + 1);
    }

    fn pending(&self) -> usize {
        self.pending.get()
    }
}
