//! Stage contracts.
//!
//! [`Source`], [`Sink`] and [`Flow`] are stateless blueprints: they can be
//! composed and connected any number of times. Connecting creates live logic
//! instances ([`SourceLogic`], [`SinkLogic`]) that exist for exactly one
//! connection and exchange signals through its ports.
//!
//! Blueprints are shared behind `Rc`, so nested stages are released when their
//! last holder goes away and a stage reachable through two paths is never
//! released twice.

use std::rc::Rc;

use tracing::warn;

use crate::core::connection::{Inlet, Outlet};
use crate::core::error::{Error, Result};
use crate::pipeline::Pipeline;

/// Shared handle to a source blueprint.
pub type SourceRef<T> = Rc<dyn Source<Item = T>>;

/// Shared handle to a sink blueprint.
pub type SinkRef<T> = Rc<dyn Sink<Item = T>>;

/// Shared handle to a flow blueprint.
pub type FlowRef<A, B> = Rc<dyn Flow<In = A, Out = B>>;

/// A back-pressured producer of elements.
///
/// # Examples
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use pullstream::core::{connect, Outlet, Result, SinkRef, Source, SourceLogic};
///
/// struct Countdown(u32);
///
/// struct CountdownLogic {
///     left: Cell<u32>,
/// }
///
/// impl Source for Countdown {
///     type Item = u32;
///
///     fn connect(&self, sink: &SinkRef<u32>) -> Result<()> {
///         connect(Rc::new(CountdownLogic { left: Cell::new(self.0) }), sink)
///     }
/// }
///
/// impl SourceLogic for CountdownLogic {
///     type Item = u32;
///
///     fn on_pull(&self, outlet: &Outlet<u32>, n: u64) {
///         for _ in 0..n {
///             let left = self.left.get();
///             if left == 0 {
///                 outlet.complete();
///                 return;
///             }
///             self.left.set(left - 1);
///             if outlet.emit(left).is_err() {
///                 return;
///             }
///         }
///     }
/// }
/// ```
pub trait Source {
    /// The type of elements this source emits
    type Item: 'static;

    /// Create a fresh logic instance, create the logic of `sink`, wire a
    /// connection between them and notify the sink logic that it is connected.
    fn connect(&self, sink: &SinkRef<Self::Item>) -> Result<()>;
}

/// A consumer of elements that applies back-pressure upstream.
pub trait Sink {
    /// The type of elements this sink accepts
    type Item: 'static;

    /// Instantiate the per-connection state of this sink.
    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = Self::Item>>>;
}

/// A back-pressured transformer of elements.
pub trait Flow {
    /// Elements accepted from upstream
    type In: 'static;
    /// Elements delivered downstream
    type Out: 'static;

    /// Wrap a downstream sink into the upstream-facing sink that applies this
    /// flow's behaviour before delegating to it.
    fn connect_sink(&self, sink: SinkRef<Self::Out>) -> Result<SinkRef<Self::In>>;

    /// Wrap an upstream source so that connecting it to a sink transparently
    /// inserts this flow in between. Implementations return a [`FlowSource`].
    fn connect_source(self: Rc<Self>, source: SourceRef<Self::In>) -> SourceRef<Self::Out>;
}

/// Live state of a source for one connection.
pub trait SourceLogic {
    /// The type of elements this logic emits
    type Item;

    /// The sink requested `n` more elements. The logic may emit up to the
    /// available demand before returning, or keep `outlet` and emit later.
    ///
    /// Pulls issued while this call runs are not nested: their demand is
    /// added at once and delivered by a further call after this one returns.
    fn on_pull(&self, outlet: &Outlet<Self::Item>, n: u64);

    /// The sink no longer accepts elements. No further pulls will follow.
    fn on_downstream_finish(&self) {}
}

/// Live state of a sink for one connection.
pub trait SinkLogic {
    /// The type of elements this logic accepts
    type Item;

    /// The sink was connected; the first chance to pull.
    fn on_connect(&self, inlet: &Inlet);

    /// A new element is available.
    fn on_push(&self, inlet: &Inlet, element: Self::Item);

    /// The source finished; no more elements follow.
    fn on_upstream_finish(&self) {}

    /// The source failed; no more elements follow.
    fn on_upstream_failure(&self, failure: Error) {
        warn!(error = %failure, "upstream failure reached a sink that does not handle it");
    }
}

/// The source a flow produces when attached to an upstream source.
pub struct FlowSource<A, B> {
    flow: FlowRef<A, B>,
    source: SourceRef<A>,
}

impl<A: 'static, B: 'static> FlowSource<A, B> {
    pub fn new(flow: FlowRef<A, B>, source: SourceRef<A>) -> Self {
        Self { flow, source }
    }
}

impl<A: 'static, B: 'static> Source for FlowSource<A, B> {
    type Item = B;

    fn connect(&self, sink: &SinkRef<B>) -> Result<()> {
        let wrapped = self.flow.connect_sink(Rc::clone(sink))?;
        self.source.connect(&wrapped)
    }
}

/// Composition helpers for sources.
pub trait SourceExt<T: 'static> {
    /// Attach a flow downstream of this source.
    fn via<U: 'static>(self, flow: FlowRef<T, U>) -> SourceRef<U>;

    /// Close the graph with a sink, producing a runnable pipeline.
    fn to(self, sink: SinkRef<T>) -> Pipeline<T>;
}

impl<T: 'static> SourceExt<T> for SourceRef<T> {
    fn via<U: 'static>(self, flow: FlowRef<T, U>) -> SourceRef<U> {
        flow.connect_source(self)
    }

    fn to(self, sink: SinkRef<T>) -> Pipeline<T> {
        Pipeline::new(self, sink)
    }
}

/// Composition helpers for flows.
pub trait FlowExt<A: 'static, B: 'static> {
    /// Concatenate another flow after this one.
    fn via<C: 'static>(self, next: FlowRef<B, C>) -> FlowRef<A, C>;

    /// Attach a sink after this flow, producing a sink that accepts `A`.
    fn to(self, sink: SinkRef<B>) -> Result<SinkRef<A>>;
}

impl<A: 'static, B: 'static> FlowExt<A, B> for FlowRef<A, B> {
    fn via<C: 'static>(self, next: FlowRef<B, C>) -> FlowRef<A, C> {
        crate::flows::via(self, next)
    }

    fn to(self, sink: SinkRef<B>) -> Result<SinkRef<A>> {
        self.connect_sink(sink)
    }
}
