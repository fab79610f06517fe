//! Flow implementations.
//!
//! Every operator here is built with [`wrapper`]: a function that turns the
//! downstream sink into the upstream-facing sink, plus the context it needs.
//! Stateless operators only change what happens on push, so they are written
//! as a [`PushDecorator`] and lifted into a flow with [`decorate`].

pub mod combinators;

use std::marker::PhantomData;
use std::rc::Rc;

use crate::core::{
    Error, Flow, FlowRef, FlowSource, Inlet, Result, Sink, SinkLogic, SinkRef, SourceRef,
};

pub use combinators::{kill_switch, take};

#[cfg(feature = "metrics")]
pub use combinators::metered;

/// Generic operator: a flow defined by how it wraps a downstream sink.
pub struct Wrapper<A, B, C, W> {
    wrap: W,
    ctx: C,
    _marker: PhantomData<fn(A) -> B>,
}

impl<A, B, C, W> Flow for Wrapper<A, B, C, W>
where
    A: 'static,
    B: 'static,
    C: 'static,
    W: Fn(SinkRef<B>, &C) -> Result<SinkRef<A>> + 'static,
{
    type In = A;
    type Out = B;

    fn connect_sink(&self, sink: SinkRef<B>) -> Result<SinkRef<A>> {
        (self.wrap)(sink, &self.ctx)
    }

    fn connect_source(self: Rc<Self>, source: SourceRef<A>) -> SourceRef<B> {
        Rc::new(FlowSource::new(self, source))
    }
}

/// Build a flow from a sink-wrapping function and its context.
///
/// `wrap` is called once per connection with the downstream sink and must
/// return the sink the upstream source connects to.
pub fn wrapper<A, B, C, W>(wrap: W, ctx: C) -> FlowRef<A, B>
where
    A: 'static,
    B: 'static,
    C: 'static,
    W: Fn(SinkRef<B>, &C) -> Result<SinkRef<A>> + 'static,
{
    Rc::new(Wrapper {
        wrap,
        ctx,
        _marker: PhantomData,
    })
}

/// An operator that only intercepts pushed elements.
///
/// Connection, completion and failure are forwarded to the inner logic
/// unchanged.
pub trait PushDecorator {
    /// Elements accepted from upstream
    type In: 'static;
    /// Elements delivered downstream
    type Out: 'static;

    /// Handle one element; forwarding it (or not) to `inner` is up to the
    /// decorator.
    fn on_push(&self, inner: &dyn SinkLogic<Item = Self::Out>, inlet: &Inlet, element: Self::In);
}

/// Lift a push decorator into a flow.
pub fn decorate<D: PushDecorator + 'static>(decorator: D) -> FlowRef<D::In, D::Out> {
    wrapper(
        |inner: SinkRef<D::Out>, decorator: &Rc<D>| {
            let sink: SinkRef<D::In> = Rc::new(DecoratedSink {
                decorator: Rc::clone(decorator),
                inner,
            });
            Ok(sink)
        },
        Rc::new(decorator),
    )
}

struct DecoratedSink<D: PushDecorator> {
    decorator: Rc<D>,
    inner: SinkRef<D::Out>,
}

impl<D: PushDecorator + 'static> Sink for DecoratedSink<D> {
    type Item = D::In;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = D::In>>> {
        Ok(Rc::new(DecoratedLogic {
            decorator: Rc::clone(&self.decorator),
            inner: self.inner.create_logic()?,
        }))
    }
}

struct DecoratedLogic<D: PushDecorator> {
    decorator: Rc<D>,
    inner: Rc<dyn SinkLogic<Item = D::Out>>,
}

impl<D: PushDecorator> SinkLogic for DecoratedLogic<D> {
    type Item = D::In;

    fn on_connect(&self, inlet: &Inlet) {
        self.inner.on_connect(inlet);
    }

    fn on_push(&self, inlet: &Inlet, element: D::In) {
        self.decorator.on_push(&*self.inner, inlet, element);
    }

    fn on_upstream_finish(&self) {
        self.inner.on_upstream_finish();
    }

    fn on_upstream_failure(&self, failure: Error) {
        self.inner.on_upstream_failure(failure);
    }
}

struct Map<A, F> {
    f: F,
    _marker: PhantomData<fn(A)>,
}

impl<A, B, F> PushDecorator for Map<A, F>
where
    A: 'static,
    B: 'static,
    F: Fn(A) -> B,
{
    type In = A;
    type Out = B;

    fn on_push(&self, inner: &dyn SinkLogic<Item = B>, inlet: &Inlet, element: A) {
        inner.on_push(inlet, (self.f)(element));
    }
}

/// Transform every element with `f`.
pub fn map<A, B, F>(f: F) -> FlowRef<A, B>
where
    A: 'static,
    B: 'static,
    F: Fn(A) -> B + 'static,
{
    decorate(Map {
        f,
        _marker: PhantomData,
    })
}

struct Filter<T, F> {
    predicate: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> PushDecorator for Filter<T, F>
where
    T: 'static,
    F: Fn(&T) -> bool,
{
    type In = T;
    type Out = T;

    fn on_push(&self, inner: &dyn SinkLogic<Item = T>, inlet: &Inlet, element: T) {
        if (self.predicate)(&element) {
            inner.on_push(inlet, element);
        } else {
            // The dropped element used up demand the sink is still waiting on.
            inlet.pull(1);
        }
    }
}

/// Only pass the elements for which `predicate` holds.
pub fn filter<T, F>(predicate: F) -> FlowRef<T, T>
where
    T: 'static,
    F: Fn(&T) -> bool + 'static,
{
    decorate(Filter {
        predicate,
        _marker: PhantomData,
    })
}

struct Inspect<T, F> {
    f: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> PushDecorator for Inspect<T, F>
where
    T: 'static,
    F: Fn(&T),
{
    type In = T;
    type Out = T;

    fn on_push(&self, inner: &dyn SinkLogic<Item = T>, inlet: &Inlet, element: T) {
        (self.f)(&element);
        inner.on_push(inlet, element);
    }
}

/// Call `f` on every element before passing it on.
pub fn inspect<T, F>(f: F) -> FlowRef<T, T>
where
    T: 'static,
    F: Fn(&T) + 'static,
{
    decorate(Inspect {
        f,
        _marker: PhantomData,
    })
}

struct Composite<A, B, C> {
    first: FlowRef<A, B>,
    second: FlowRef<B, C>,
}

impl<A: 'static, B: 'static, C: 'static> Flow for Composite<A, B, C> {
    type In = A;
    type Out = C;

    fn connect_sink(&self, sink: SinkRef<C>) -> Result<SinkRef<A>> {
        let middle = self.second.connect_sink(sink)?;
        self.first.connect_sink(middle)
    }

    fn connect_source(self: Rc<Self>, source: SourceRef<A>) -> SourceRef<C> {
        Rc::new(FlowSource::new(self, source))
    }
}

/// The flow applying `first`, then `second`.
pub fn via<A, B, C>(first: FlowRef<A, B>, second: FlowRef<B, C>) -> FlowRef<A, C>
where
    A: 'static,
    B: 'static,
    C: 'static,
{
    Rc::new(Composite { first, second })
}
