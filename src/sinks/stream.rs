//! Bridge from a sink to an async [`Stream`].
//!
//! [`to_stream`] returns a sink blueprint and the stream it feeds. The sink
//! only requests what the demand window allows, counting elements buffered
//! but not yet consumed, so a slow consumer slows the producer down. Dropping
//! the stream cancels upstream.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use futures_core::Stream;
use tracing::{debug, trace};

use crate::core::{Error, Inlet, Result, Sink, SinkLogic, SinkRef};
use crate::sinks::DemandConfig;

/// Create a sink and the stream of the elements pushed into it.
///
/// The sink can only be connected once; further connections fail with
/// [`Error::AlreadyConnected`].
pub fn to_stream<T: 'static>(config: DemandConfig) -> Result<(SinkRef<T>, SinkStream<T>)> {
    config.validate()?;
    let shared = Rc::new(RefCell::new(Bridge {
        config,
        buffer: VecDeque::new(),
        inlet: None,
        outstanding: 0,
        failure: None,
        ended: false,
        detached: false,
        connected: false,
        waker: None,
    }));
    let sink: SinkRef<T> = Rc::new(StreamSink {
        shared: Rc::clone(&shared),
    });
    Ok((sink, SinkStream { shared }))
}

struct Bridge<T> {
    config: DemandConfig,
    buffer: VecDeque<T>,
    inlet: Option<Inlet>,
    outstanding: u64,
    failure: Option<Error>,
    ended: bool,
    detached: bool,
    connected: bool,
    waker: Option<Waker>,
}

impl<T> Bridge<T> {
    /// Demand to request so that buffered plus outstanding is back at
    /// `max_demand`, once it has fallen to `min_demand`.
    fn refill(&mut self) -> Option<(Inlet, u64)> {
        if self.ended {
            return None;
        }
        let inlet = self.inlet.clone()?;
        let in_flight = self.buffer.len() as u64 + self.outstanding;
        if in_flight > self.config.min_demand {
            return None;
        }
        let n = self.config.max_demand - in_flight;
        self.outstanding += n;
        Some((inlet, n))
    }

    fn end(&mut self, failure: Option<Error>) -> Option<Waker> {
        self.ended = true;
        self.failure = failure;
        self.inlet = None;
        self.waker.take()
    }
}

struct StreamSink<T> {
    shared: Rc<RefCell<Bridge<T>>>,
}

impl<T: 'static> Sink for StreamSink<T> {
    type Item = T;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = T>>> {
        let mut bridge = self.shared.borrow_mut();
        if bridge.connected {
            return Err(Error::AlreadyConnected);
        }
        bridge.connected = true;
        Ok(Rc::new(StreamLogic {
            shared: Rc::clone(&self.shared),
        }))
    }
}

struct StreamLogic<T> {
    shared: Rc<RefCell<Bridge<T>>>,
}

impl<T> SinkLogic for StreamLogic<T> {
    type Item = T;

    fn on_connect(&self, inlet: &Inlet) {
        let refill = {
            let mut bridge = self.shared.borrow_mut();
            if bridge.detached {
                None
            } else {
                bridge.inlet = Some(inlet.clone());
                bridge.refill()
            }
        };
        match refill {
            Some((inlet, n)) => inlet.pull(n),
            None => {
                debug!("stream dropped before the sink was connected");
                inlet.cancel();
            }
        }
    }

    fn on_push(&self, _inlet: &Inlet, element: T) {
        let waker = {
            let mut bridge = self.shared.borrow_mut();
            bridge.outstanding = bridge.outstanding.saturating_sub(1);
            if bridge.detached {
                return;
            }
            bridge.buffer.push_back(element);
            bridge.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn on_upstream_finish(&self) {
        let waker = self.shared.borrow_mut().end(None);
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn on_upstream_failure(&self, failure: Error) {
        let waker = self.shared.borrow_mut().end(Some(failure));
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// The consuming end of [`to_stream`].
///
/// Yields each element as `Ok`, a single `Err` if upstream failed, and then
/// ends.
pub struct SinkStream<T> {
    shared: Rc<RefCell<Bridge<T>>>,
}

impl<T> SinkStream<T> {
    /// Number of elements received and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.shared.borrow().buffer.len()
    }
}

impl<T> Stream for SinkStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut bridge = self.shared.borrow_mut();
        if let Some(element) = bridge.buffer.pop_front() {
            let refill = bridge.refill();
            drop(bridge);
            if let Some((inlet, n)) = refill {
                trace!(n, "stream consumer refilling demand");
                inlet.pull(n);
            }
            return Poll::Ready(Some(Ok(element)));
        }
        if let Some(failure) = bridge.failure.take() {
            return Poll::Ready(Some(Err(failure)));
        }
        if bridge.ended {
            return Poll::Ready(None);
        }
        bridge.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> Drop for SinkStream<T> {
    fn drop(&mut self) {
        let inlet = {
            let mut bridge = self.shared.borrow_mut();
            bridge.detached = true;
            bridge.buffer.clear();
            bridge.waker = None;
            bridge.inlet.take()
        };
        if let Some(inlet) = inlet {
            debug!("stream dropped, cancelling upstream");
            inlet.cancel();
        }
    }
}
