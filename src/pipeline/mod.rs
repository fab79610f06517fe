//! Pipeline assembly and execution.
//!
//! A [`Pipeline`] closes a graph: one fully composed source bound to one fully
//! composed sink. Starting it inserts a scheduler boundary at the sink edge,
//! so every pull or cancel the sink issues goes through a scheduler worker
//! instead of calling back into the producer directly.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::core::{Error, Inlet, InletPort, Result, Sink, SinkLogic, SinkRef, SourceRef};
use crate::scheduler::{SchedulerRef, Worker};

/// A closed, runnable graph through which elements flow.
///
/// The pipeline is a blueprint: every call to [`Pipeline::start`] creates new
/// logic instances for each stage.
pub struct Pipeline<T> {
    source: SourceRef<T>,
    sink: SinkRef<T>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
            sink: Rc::clone(&self.sink),
        }
    }
}

impl<T: 'static> Pipeline<T> {
    /// Bind a source to a sink.
    pub fn new(source: SourceRef<T>, sink: SinkRef<T>) -> Self {
        Self { source, sink }
    }

    /// The source of the pipeline.
    pub fn source(&self) -> &SourceRef<T> {
        &self.source
    }

    /// The sink of the pipeline.
    pub fn sink(&self) -> &SinkRef<T> {
        &self.sink
    }

    /// Start the pipeline, routing the sink's demand through `scheduler`.
    ///
    /// Returns once the connection is established; with a trampoline
    /// scheduler every synchronous stage has run to completion or is waiting
    /// for an external event by then.
    pub fn start(&self, scheduler: &SchedulerRef) -> Result<()> {
        let sink: SinkRef<T> = Rc::new(ScheduledSink {
            inner: Rc::clone(&self.sink),
            scheduler: Rc::clone(scheduler),
        });
        debug!("starting pipeline");
        self.source.connect(&sink)
    }
}

/// Sink adapter that binds the wrapped sink's logic to a scheduler worker.
struct ScheduledSink<T> {
    inner: SinkRef<T>,
    scheduler: SchedulerRef,
}

impl<T: 'static> Sink for ScheduledSink<T> {
    type Item = T;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = T>>> {
        Ok(Rc::new(ScheduledLogic {
            inner: self.inner.create_logic()?,
            worker: self.scheduler.create_worker(),
            port: RefCell::new(Weak::new()),
            cancelled: Rc::new(Cell::new(false)),
        }))
    }
}

/// Only the wrapped logic owns the scheduled inlet; the adapter keeps a weak
/// handle, so the connection stays reachable exactly when it would be if the
/// wrapped logic were connected directly.
struct ScheduledLogic<T> {
    inner: Rc<dyn SinkLogic<Item = T>>,
    worker: Rc<dyn Worker>,
    port: RefCell<Weak<ScheduledInlet>>,
    cancelled: Rc<Cell<bool>>,
}

impl<T: 'static> ScheduledLogic<T> {
    /// The scheduled inlet the wrapped logic currently holds, or a new one
    /// over `upstream` if it kept none.
    fn inlet(&self, upstream: &Inlet) -> Inlet {
        let mut port = self.port.borrow_mut();
        if let Some(live) = port.upgrade() {
            return Inlet::new(live);
        }
        let live = Rc::new(ScheduledInlet {
            parent: upstream.clone(),
            worker: Rc::clone(&self.worker),
            cancelled: Rc::clone(&self.cancelled),
        });
        *port = Rc::downgrade(&live);
        Inlet::new(live)
    }
}

impl<T: 'static> SinkLogic for ScheduledLogic<T> {
    type Item = T;

    fn on_connect(&self, inlet: &Inlet) {
        self.inner.on_connect(&self.inlet(inlet));
    }

    fn on_push(&self, inlet: &Inlet, element: T) {
        self.inner.on_push(&self.inlet(inlet), element);
    }

    fn on_upstream_finish(&self) {
        self.inner.on_upstream_finish();
    }

    fn on_upstream_failure(&self, failure: Error) {
        self.inner.on_upstream_failure(failure);
    }
}

/// Inlet that reschedules pull and cancel onto a worker.
///
/// After a cancel it is inert: later pulls are dropped without touching the
/// upstream connection.
struct ScheduledInlet {
    parent: Inlet,
    worker: Rc<dyn Worker>,
    cancelled: Rc<Cell<bool>>,
}

impl InletPort for ScheduledInlet {
    fn pull(&self, n: u64) {
        if self.cancelled.get() {
            debug!(n, "pull after cancel dropped");
            return;
        }
        let parent = self.parent.clone();
        let worker = Rc::clone(&self.worker);
        worker.schedule(Box::new(move || parent.pull(n)));
    }

    fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        let parent = self.parent.clone();
        let worker = Rc::clone(&self.worker);
        worker.schedule(Box::new(move || parent.cancel()));
    }
}
