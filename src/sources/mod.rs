//! Source implementations.
//!
//! Synchronous sources emit from inside `on_pull`, up to the outstanding
//! demand, and complete as soon as they know they are exhausted.

pub mod stream;

use std::cell::RefCell;
use std::iter::Peekable;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::core::{connect, Error, Outlet, Result, SinkRef, Source, SourceLogic, SourceRef};

pub use stream::from_stream;

/// A source of the integers in `from..to`.
pub fn count(from: i64, to: i64) -> SourceRef<i64> {
    iter(from..to)
}

/// A source that completes without emitting.
pub fn empty<T: 'static>() -> SourceRef<T> {
    iter(std::iter::empty())
}

/// A source of the elements of `items`.
///
/// `items` is cloned for every connection, so the blueprint can be connected
/// any number of times.
pub fn iter<I>(items: I) -> SourceRef<I::Item>
where
    I: IntoIterator + Clone + 'static,
    I::IntoIter: 'static,
    I::Item: 'static,
{
    Rc::new(IterSource { items })
}

/// A source that emits clones of `value` forever.
pub fn repeat<T: Clone + 'static>(value: T) -> SourceRef<T> {
    iter(std::iter::repeat(value))
}

/// A source that fails with `error` on the first pull.
pub fn failed<T: 'static>(error: Error) -> SourceRef<T> {
    Rc::new(Failed {
        error,
        _marker: PhantomData,
    })
}

/// A source driven by a generator.
///
/// `factory` builds a fresh generator for each connection. The generator
/// returns `Some(Ok(_))` for an element, `Some(Err(_))` to fail and `None`
/// to complete.
pub fn from_fn<T, F, G>(factory: F) -> SourceRef<T>
where
    T: 'static,
    F: Fn() -> G + 'static,
    G: FnMut() -> Option<Result<T>> + 'static,
{
    Rc::new(FromFn {
        factory,
        _marker: PhantomData,
    })
}

struct IterSource<I> {
    items: I,
}

impl<I> Source for IterSource<I>
where
    I: IntoIterator + Clone + 'static,
    I::IntoIter: 'static,
    I::Item: 'static,
{
    type Item = I::Item;

    fn connect(&self, sink: &SinkRef<I::Item>) -> Result<()> {
        let logic = IterLogic {
            items: RefCell::new(self.items.clone().into_iter().peekable()),
        };
        connect(Rc::new(logic), sink)
    }
}

struct IterLogic<I: Iterator> {
    items: RefCell<Peekable<I>>,
}

impl<I: Iterator> IterLogic<I>
where
    I::Item: 'static,
{
    fn drain(&self, outlet: &Outlet<I::Item>) {
        while outlet.available() {
            let next = self.items.borrow_mut().next();
            let Some(element) = next else {
                outlet.complete();
                return;
            };
            if outlet.emit(element).is_err() || outlet.is_closed() {
                return;
            }
            let exhausted = self.items.borrow_mut().peek().is_none();
            if exhausted {
                outlet.complete();
                return;
            }
        }
    }
}

impl<I: Iterator> SourceLogic for IterLogic<I>
where
    I::Item: 'static,
{
    type Item = I::Item;

    fn on_pull(&self, outlet: &Outlet<I::Item>, _n: u64) {
        self.drain(outlet);
    }
}

struct Failed<T> {
    error: Error,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Source for Failed<T> {
    type Item = T;

    fn connect(&self, sink: &SinkRef<T>) -> Result<()> {
        let logic: FailedLogic<T> = FailedLogic {
            error: self.error.clone(),
            _marker: PhantomData,
        };
        connect(Rc::new(logic), sink)
    }
}

struct FailedLogic<T> {
    error: Error,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> SourceLogic for FailedLogic<T> {
    type Item = T;

    fn on_pull(&self, outlet: &Outlet<T>, _n: u64) {
        outlet.fail(self.error.clone());
    }
}

struct FromFn<T, F> {
    factory: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F, G> Source for FromFn<T, F>
where
    T: 'static,
    F: Fn() -> G + 'static,
    G: FnMut() -> Option<Result<T>> + 'static,
{
    type Item = T;

    fn connect(&self, sink: &SinkRef<T>) -> Result<()> {
        let logic = FromFnLogic {
            generator: RefCell::new((self.factory)()),
        };
        connect(Rc::new(logic), sink)
    }
}

struct FromFnLogic<G> {
    generator: RefCell<G>,
}

impl<T, G> SourceLogic for FromFnLogic<G>
where
    T: 'static,
    G: FnMut() -> Option<Result<T>>,
{
    type Item = T;

    fn on_pull(&self, outlet: &Outlet<T>, _n: u64) {
        self.generate(outlet);
    }
}

impl<G> FromFnLogic<G> {
    fn generate<T: 'static>(&self, outlet: &Outlet<T>)
    where
        G: FnMut() -> Option<Result<T>>,
    {
        while outlet.available() {
            let next = (self.generator.borrow_mut())();
            match next {
                Some(Ok(element)) => {
                    if outlet.emit(element).is_err() {
                        return;
                    }
                }
                Some(Err(failure)) => {
                    outlet.fail(failure);
                    return;
                }
                None => {
                    outlet.complete();
                    return;
                }
            }
        }
    }
}
