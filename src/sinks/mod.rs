//! Sink implementations.
//!
//! Every requesting sink here pulls through a [`DemandWindow`], one element at
//! a time unless configured otherwise with a [`DemandConfig`].

pub mod demand;
pub mod stream;

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use tokio::sync::Notify;
use tracing::debug;

use crate::core::{Error, Inlet, Result, Sink, SinkLogic, SinkRef};

pub use demand::{DemandConfig, DemandWindow};
pub use stream::{to_stream, SinkStream};

/// A sink that calls `f` for every element, one element at a time.
pub fn foreach<T, F>(f: F) -> SinkRef<T>
where
    T: 'static,
    F: Fn(T) + 'static,
{
    Rc::new(ForEach {
        f: Rc::new(f),
        config: DemandConfig::default(),
        _marker: PhantomData,
    })
}

/// Like [`foreach`], requesting elements through the given demand window.
pub fn foreach_with<T, F>(f: F, config: DemandConfig) -> Result<SinkRef<T>>
where
    T: 'static,
    F: Fn(T) + 'static,
{
    config.validate()?;
    Ok(Rc::new(ForEach {
        f: Rc::new(f),
        config,
        _marker: PhantomData,
    }))
}

/// A sink that drops every element while keeping demand up.
pub fn ignore<T: 'static>() -> SinkRef<T> {
    foreach(|_| {})
}

/// A sink that cancels as soon as it is connected.
pub fn cancelled<T: 'static>() -> SinkRef<T> {
    Rc::new(Cancelled(PhantomData))
}

struct ForEach<T, F> {
    f: Rc<F>,
    config: DemandConfig,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> Sink for ForEach<T, F>
where
    T: 'static,
    F: Fn(T) + 'static,
{
    type Item = T;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = T>>> {
        Ok(Rc::new(ForEachLogic {
            f: Rc::clone(&self.f),
            window: DemandWindow::new(self.config),
            _marker: PhantomData,
        }))
    }
}

struct ForEachLogic<T, F> {
    f: Rc<F>,
    window: DemandWindow,
    _marker: PhantomData<fn(T)>,
}

impl<T, F: Fn(T)> SinkLogic for ForEachLogic<T, F> {
    type Item = T;

    fn on_connect(&self, inlet: &Inlet) {
        self.window.start(inlet);
    }

    fn on_push(&self, inlet: &Inlet, element: T) {
        (self.f)(element);
        self.window.received(inlet);
    }

    fn on_upstream_failure(&self, failure: Error) {
        debug!(error = %failure, "foreach sink stopped by upstream failure");
    }
}

struct Cancelled<T>(PhantomData<fn(T)>);

impl<T: 'static> Sink for Cancelled<T> {
    type Item = T;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = T>>> {
        Ok(Rc::new(CancelledLogic(PhantomData)))
    }
}

struct CancelledLogic<T>(PhantomData<fn(T)>);

impl<T> SinkLogic for CancelledLogic<T> {
    type Item = T;

    fn on_connect(&self, inlet: &Inlet) {
        inlet.cancel();
    }

    fn on_push(&self, _inlet: &Inlet, _element: T) {}
}

struct Collected<T> {
    items: Vec<T>,
    outcome: Option<Result<()>>,
}

/// A sink that records every element and how the stream ended.
///
/// The handle is cheap to clone and every clone observes the same storage,
/// so a test can keep one copy while the pipeline owns another. Each
/// connection appends to the same list.
pub struct CollectSink<T> {
    state: Rc<RefCell<Collected<T>>>,
    done: Rc<Notify>,
    config: DemandConfig,
}

impl<T> Clone for CollectSink<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            done: Rc::clone(&self.done),
            config: self.config,
        }
    }
}

impl<T: Clone + 'static> CollectSink<T> {
    /// Create a new collect sink
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(Collected {
                items: Vec::new(),
                outcome: None,
            })),
            done: Rc::new(Notify::new()),
            config: DemandConfig::default(),
        }
    }

    /// Create a collect sink requesting through the given demand window
    pub fn with_demand(config: DemandConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// This collector as a sink blueprint.
    pub fn as_sink(&self) -> SinkRef<T> {
        Rc::new(self.clone())
    }

    /// The elements received so far.
    pub fn items(&self) -> Vec<T> {
        self.state.borrow().items.clone()
    }

    /// How the last connection ended, if it has.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.state.borrow().outcome.clone()
    }

    /// Wait until upstream completes or fails.
    pub async fn finished(&self) -> Result<()> {
        loop {
            let notified = self.done.notified();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl<T: Clone + 'static> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Sink for CollectSink<T> {
    type Item = T;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = T>>> {
        Ok(Rc::new(CollectLogic {
            state: Rc::clone(&self.state),
            done: Rc::clone(&self.done),
            window: DemandWindow::new(self.config),
        }))
    }
}

struct CollectLogic<T> {
    state: Rc<RefCell<Collected<T>>>,
    done: Rc<Notify>,
    window: DemandWindow,
}

impl<T> CollectLogic<T> {
    fn finish(&self, outcome: Result<()>) {
        self.state.borrow_mut().outcome = Some(outcome);
        self.done.notify_waiters();
    }
}

impl<T> SinkLogic for CollectLogic<T> {
    type Item = T;

    fn on_connect(&self, inlet: &Inlet) {
        self.window.start(inlet);
    }

    fn on_push(&self, inlet: &Inlet, element: T) {
        self.state.borrow_mut().items.push(element);
        self.window.received(inlet);
    }

    fn on_upstream_finish(&self) {
        self.finish(Ok(()));
    }

    fn on_upstream_failure(&self, failure: Error) {
        self.finish(Err(failure));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Source, SourceExt};
    use crate::sources;
    use std::cell::Cell;

    #[test]
    fn foreach_sees_every_element() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let sink = foreach(move |x: i64| log.borrow_mut().push(x));

        sources::count(0, 5).connect(&sink).unwrap();

        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn foreach_with_rejects_a_bad_window() {
        let result = foreach_with(|_: i64| {}, DemandConfig::new().max_demand(0));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn batched_window_delivers_everything() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let config = DemandConfig::new().max_demand(8).min_demand(2);
        let sink = foreach_with(move |_: i64| counter.set(counter.get() + 1), config).unwrap();

        sources::count(0, 100).connect(&sink).unwrap();

        assert_eq!(calls.get(), 100);
    }

    #[test]
    fn collect_records_items_and_outcome() {
        let collect = CollectSink::new();
        sources::count(3, 6).connect(&collect.as_sink()).unwrap();

        assert_eq!(collect.items(), vec![3, 4, 5]);
        assert!(matches!(collect.outcome(), Some(Ok(()))));
    }

    #[test]
    fn collect_records_failure() {
        let collect = CollectSink::<i64>::new();
        sources::failed::<i64>(Error::custom("boom"))
            .connect(&collect.as_sink())
            .unwrap();

        assert!(collect.items().is_empty());
        match collect.outcome() {
            Some(Err(err)) => assert_eq!(err.to_string(), "boom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn ignore_drains_the_source() {
        let collect = CollectSink::new();
        let tapped = sources::count(0, 10).via(crate::flows::inspect(|_: &i64| {}));
        tapped.connect(&ignore()).unwrap();
        tapped.connect(&collect.as_sink()).unwrap();

        assert_eq!(collect.items().len(), 10);
    }
}
