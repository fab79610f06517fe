//! Source backed by an async [`Stream`].
//!
//! The stream is polled by a task on a [`LocalScheduler`], and only while the
//! connection has outstanding demand: a stream that outpaces its consumer is
//! simply not polled until the next pull.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use futures::stream::{LocalBoxStream, StreamExt};
use futures_core::Stream;
use tokio::sync::Notify;
use tracing::trace;

use crate::core::{connect, Outlet, Result, SinkRef, Source, SourceLogic, SourceRef};
use crate::scheduler::LocalScheduler;

/// A source emitting the items of the stream built by `factory`.
///
/// Each connection builds its own stream. `Err` items fail the connection,
/// the end of the stream completes it.
pub fn from_stream<T, S, F>(scheduler: &LocalScheduler, factory: F) -> SourceRef<T>
where
    T: 'static,
    S: Stream<Item = Result<T>> + 'static,
    F: Fn() -> S + 'static,
{
    Rc::new(StreamSource {
        scheduler: scheduler.clone(),
        factory,
        _marker: PhantomData,
    })
}

struct StreamSource<T, F> {
    scheduler: LocalScheduler,
    factory: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S, F> Source for StreamSource<T, F>
where
    T: 'static,
    S: Stream<Item = Result<T>> + 'static,
    F: Fn() -> S + 'static,
{
    type Item = T;

    fn connect(&self, sink: &SinkRef<T>) -> Result<()> {
        let logic = StreamLogic {
            scheduler: self.scheduler.clone(),
            wake: Rc::new(Notify::new()),
            stream: RefCell::new(Some((self.factory)().boxed_local())),
        };
        connect(Rc::new(logic), sink)
    }
}

struct StreamLogic<T> {
    scheduler: LocalScheduler,
    wake: Rc<Notify>,
    stream: RefCell<Option<LocalBoxStream<'static, Result<T>>>>,
}

impl<T: 'static> SourceLogic for StreamLogic<T> {
    type Item = T;

    fn on_pull(&self, outlet: &Outlet<T>, _n: u64) {
        let stream = self.stream.borrow_mut().take();
        match stream {
            Some(stream) => {
                trace!("starting stream pump");
                self.scheduler
                    .spawn(pump(stream, outlet.clone(), Rc::clone(&self.wake)));
            }
            None => self.wake.notify_one(),
        }
    }

    fn on_downstream_finish(&self) {
        self.wake.notify_one();
    }
}

async fn pump<T: 'static>(
    mut stream: LocalBoxStream<'static, Result<T>>,
    outlet: Outlet<T>,
    wake: Rc<Notify>,
) {
    loop {
        if outlet.is_closed() {
            trace!("stream pump stopped by cancellation");
            return;
        }
        if !outlet.available() {
            wake.notified().await;
            continue;
        }
        tokio::select! {
            next = stream.next() => match next {
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
            },
            // Cancelled while waiting on the stream; re-checked above.
            _ = wake.notified() => {}
        }
    }
}
