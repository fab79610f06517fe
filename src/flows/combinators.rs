//! Stateful flows that end a stream early, and metering.

use std::cell::Cell;
use std::rc::Rc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{Error, FlowRef, Inlet, Result, Sink, SinkLogic, SinkRef};
use crate::flows::wrapper;

/// Pass at most `limit` elements, then cancel upstream and complete
/// downstream.
///
/// With a limit of zero the stage cancels as soon as it is connected and the
/// downstream sink only sees the completion.
pub fn take<T: 'static>(limit: u64) -> FlowRef<T, T> {
    wrapper(
        |inner: SinkRef<T>, limit: &u64| {
            let sink: SinkRef<T> = Rc::new(TakeSink {
                limit: *limit,
                inner,
            });
            Ok(sink)
        },
        limit,
    )
}

struct TakeSink<T> {
    limit: u64,
    inner: SinkRef<T>,
}

impl<T: 'static> Sink for TakeSink<T> {
    type Item = T;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = T>>> {
        Ok(Rc::new(TakeLogic {
            limit: self.limit,
            seen: Cell::new(0),
            done: Cell::new(false),
            inner: self.inner.create_logic()?,
        }))
    }
}

struct TakeLogic<T> {
    limit: u64,
    seen: Cell<u64>,
    done: Cell<bool>,
    inner: Rc<dyn SinkLogic<Item = T>>,
}

impl<T> SinkLogic for TakeLogic<T> {
    type Item = T;

    fn on_connect(&self, inlet: &Inlet) {
        if self.limit == 0 {
            self.done.set(true);
            inlet.cancel();
            self.inner.on_upstream_finish();
            return;
        }
        self.inner.on_connect(inlet);
    }

    fn on_push(&self, inlet: &Inlet, element: T) {
        if self.done.get() {
            return;
        }
        let seen = self.seen.get() + 1;
        self.seen.set(seen);
        if seen < self.limit {
            self.inner.on_push(inlet, element);
            return;
        }
        // Cancel first so that a pull issued by the last push is ignored.
        self.done.set(true);
        debug!(limit = self.limit, "take limit reached");
        inlet.cancel();
        self.inner.on_push(inlet, element);
        self.inner.on_upstream_finish();
    }

    fn on_upstream_finish(&self) {
        if !self.done.replace(true) {
            self.inner.on_upstream_finish();
        }
    }

    fn on_upstream_failure(&self, failure: Error) {
        if !self.done.replace(true) {
            self.inner.on_upstream_failure(failure);
        }
    }
}

/// A flow that can be stopped from the outside.
///
/// The token is checked on every signal passing through the stage. Once it
/// is cancelled, the next such signal cancels upstream and completes
/// downstream. A token cancelled before the pipeline starts stops it on
/// connect.
pub fn kill_switch<T: 'static>(token: CancellationToken) -> FlowRef<T, T> {
    wrapper(
        |inner: SinkRef<T>, token: &CancellationToken| {
            let sink: SinkRef<T> = Rc::new(KillSwitchSink {
                token: token.clone(),
                inner,
            });
            Ok(sink)
        },
        token,
    )
}

struct KillSwitchSink<T> {
    token: CancellationToken,
    inner: SinkRef<T>,
}

impl<T: 'static> Sink for KillSwitchSink<T> {
    type Item = T;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = T>>> {
        Ok(Rc::new(KillSwitchLogic {
            token: self.token.clone(),
            done: Cell::new(false),
            inner: self.inner.create_logic()?,
        }))
    }
}

struct KillSwitchLogic<T> {
    token: CancellationToken,
    done: Cell<bool>,
    inner: Rc<dyn SinkLogic<Item = T>>,
}

impl<T> KillSwitchLogic<T> {
    /// Whether the stage is finished, tripping it if the token was cancelled.
    fn tripped(&self, inlet: &Inlet) -> bool {
        if self.done.get() {
            return true;
        }
        if !self.token.is_cancelled() {
            return false;
        }
        debug!("kill switch tripped");
        self.done.set(true);
        inlet.cancel();
        self.inner.on_upstream_finish();
        true
    }
}

impl<T> SinkLogic for KillSwitchLogic<T> {
    type Item = T;

    fn on_connect(&self, inlet: &Inlet) {
        if !self.tripped(inlet) {
            self.inner.on_connect(inlet);
        }
    }

    fn on_push(&self, inlet: &Inlet, element: T) {
        if !self.tripped(inlet) {
            self.inner.on_push(inlet, element);
        }
    }

    fn on_upstream_finish(&self) {
        if !self.done.replace(true) {
            self.inner.on_upstream_finish();
        }
    }

    fn on_upstream_failure(&self, failure: Error) {
        if !self.done.replace(true) {
            self.inner.on_upstream_failure(failure);
        }
    }
}

/// Count elements, completions and failures passing through the stage.
///
/// Recorded as `pullstream_elements_total`, `pullstream_completions_total`
/// and `pullstream_failures_total`, labelled with `stage = name`.
#[cfg(feature = "metrics")]
pub fn metered<T: 'static>(name: impl Into<String>) -> FlowRef<T, T> {
    wrapper(
        |inner: SinkRef<T>, name: &String| {
            let sink: SinkRef<T> = Rc::new(MeteredSink {
                name: name.clone(),
                inner,
            });
            Ok(sink)
        },
        name.into(),
    )
}

#[cfg(feature = "metrics")]
struct MeteredSink<T> {
    name: String,
    inner: SinkRef<T>,
}

#[cfg(feature = "metrics")]
impl<T: 'static> Sink for MeteredSink<T> {
    type Item = T;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = T>>> {
        Ok(Rc::new(MeteredLogic {
            name: self.name.clone(),
            inner: self.inner.create_logic()?,
        }))
    }
}

#[cfg(feature = "metrics")]
struct MeteredLogic<T> {
    name: String,
    inner: Rc<dyn SinkLogic<Item = T>>,
}

#[cfg(feature = "metrics")]
impl<T> SinkLogic for MeteredLogic<T> {
    type Item = T;

    fn on_connect(&self, inlet: &Inlet) {
        self.inner.on_connect(inlet);
    }

    fn on_push(&self, inlet: &Inlet, element: T) {
        metrics::counter!("pullstream_elements_total", "stage" => self.name.clone()).increment(1);
        self.inner.on_push(inlet, element);
    }

    fn on_upstream_finish(&self) {
        metrics::counter!("pullstream_completions_total", "stage" => self.name.clone())
            .increment(1);
        self.inner.on_upstream_finish();
    }

    fn on_upstream_failure(&self, failure: Error) {
        metrics::counter!("pullstream_failures_total", "stage" => self.name.clone()).increment(1);
        self.inner.on_upstream_failure(failure);
    }
}
