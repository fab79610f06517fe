//! The connection protocol between one source logic and one sink logic.
//!
//! A [`Connection`] mediates exactly one producer/consumer pair and owns the
//! demand accounting for it. The sink side talks to it through an [`Inlet`]
//! (`pull` / `cancel`), the source side through an [`Outlet`]
//! (`available` / `emit` / `fail` / `complete`). Both are thin handles over the
//! same shared connection.
//!
//! Ownership: ports hold the connection, the connection holds both logic
//! instances until its first terminal transition and then releases them. A
//! logic that needs to act later keeps a clone of its port; that reference
//! cycle is broken by the terminal transition, so a closed connection never
//! keeps its logics alive, and the connection itself is freed with its last port.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::core::error::{Error, Result};
use crate::core::traits::{SinkLogic, SinkRef, SourceLogic};

/// Source of connection ids. The ids only tag log events.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outstanding demand on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Demand {
    /// Exact remaining number of elements the consumer accepts.
    Finite(u64),
    /// The consumer accepts any number of elements; never decremented.
    Unbounded,
}

impl Demand {
    /// No outstanding demand.
    pub const NONE: Demand = Demand::Finite(0);

    /// Returns `true` if at least one element may be emitted.
    #[must_use]
    pub const fn has_demand(&self) -> bool {
        match self {
            Demand::Unbounded => true,
            Demand::Finite(remaining) => *remaining > 0,
        }
    }

    /// Returns `true` if the demand is unbounded.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        matches!(self, Demand::Unbounded)
    }

    /// Returns the remaining finite demand, if any.
    #[must_use]
    pub const fn remaining(&self) -> Option<u64> {
        match self {
            Demand::Finite(remaining) => Some(*remaining),
            Demand::Unbounded => None,
        }
    }

    /// Adds `n` to the demand. A total that overflows, or reaches `u64::MAX`,
    /// saturates into [`Demand::Unbounded`].
    #[must_use]
    pub const fn add(self, n: u64) -> Demand {
        match self {
            Demand::Unbounded => Demand::Unbounded,
            Demand::Finite(current) => match current.checked_add(n) {
                Some(total) if total < u64::MAX => Demand::Finite(total),
                _ => Demand::Unbounded,
            },
        }
    }

    /// Consumes one unit of demand, returning what is left, or `None` if there
    /// was nothing to consume.
    #[must_use]
    pub const fn consume_one(self) -> Option<Demand> {
        match self {
            Demand::Unbounded => Some(Demand::Unbounded),
            Demand::Finite(0) => None,
            Demand::Finite(remaining) => Some(Demand::Finite(remaining - 1)),
        }
    }
}

impl Default for Demand {
    fn default() -> Self {
        Demand::NONE
    }
}

/// How a connection reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Termination {
    /// The consumer cancelled.
    Cancelled,
    /// The producer completed successfully.
    Completed,
    /// The producer failed.
    Failed,
}

/// Observable state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Open, with the given outstanding demand.
    Active(Demand),
    /// Permanently closed; every further signal is a no-op.
    Terminal(Termination),
}

impl ConnectionState {
    /// Returns `true` once the connection is closed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Terminal(_))
    }
}

/// The upstream-control half of a port, as seen by a sink logic.
///
/// The connection implements it directly; stages that interpose on demand
/// (such as the scheduler adapter of a pipeline) provide their own.
pub trait InletPort {
    /// Request `n` more elements.
    fn pull(&self, n: u64);

    /// Stop receiving elements.
    fn cancel(&self);
}

/// The sink-side view of a connection.
///
/// Inlets carry no elements, so they are not typed by the element type: a
/// decorating sink logic can hand its upstream inlet to an inner logic of a
/// different element type unchanged.
#[derive(Clone)]
pub struct Inlet {
    port: Rc<dyn InletPort>,
}

impl Inlet {
    /// Wrap a custom port.
    pub fn new(port: Rc<dyn InletPort>) -> Self {
        Self { port }
    }

    /// Signal demand for `n` more elements. The producer may emit within this
    /// call. Ignored once the connection is terminal, and for `n == 0`.
    pub fn pull(&self, n: u64) {
        self.port.pull(n);
    }

    /// Request to stop receiving elements. The producer is notified through
    /// `on_downstream_finish`; it is never asked to produce again.
    pub fn cancel(&self) {
        self.port.cancel();
    }
}

impl fmt::Debug for Inlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inlet").finish_non_exhaustive()
    }
}

/// The source-side view of a connection.
pub struct Outlet<T> {
    conn: Rc<Connection<T>>,
}

impl<T> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            conn: Rc::clone(&self.conn),
        }
    }
}

impl<T> fmt::Debug for Outlet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outlet")
            .field("connection", &self.conn.id)
            .field("state", &self.conn.state.get())
            .finish()
    }
}

impl<T: 'static> Outlet<T> {
    /// Whether an element may be emitted right now.
    pub fn available(&self) -> bool {
        match self.conn.state.get() {
            ConnectionState::Active(demand) => demand.has_demand(),
            ConnectionState::Terminal(_) => false,
        }
    }

    /// The outstanding demand, or `None` once the connection is closed.
    pub fn demand(&self) -> Option<Demand> {
        match self.conn.state.get() {
            ConnectionState::Active(demand) => Some(demand),
            ConnectionState::Terminal(_) => None,
        }
    }

    /// Whether the connection has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.conn.state.get().is_terminal()
    }

    /// The full connection state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state.get()
    }

    /// Push one element to the sink.
    ///
    /// # Errors
    ///
    /// [`Error::NoDemand`] if the sink has not requested it, [`Error::Closed`]
    /// if the connection is terminal. The element is dropped in both cases.
    pub fn emit(&self, element: T) -> Result<()> {
        self.conn.emit(element)
    }

    /// Signal a failure to the sink and close the connection.
    pub fn fail(&self, failure: Error) {
        self.conn.fail(failure);
    }

    /// Signal successful completion to the sink and close the connection.
    pub fn complete(&self) {
        self.conn.complete();
    }
}

type SourceSlot<T> = RefCell<Option<Rc<dyn SourceLogic<Item = T>>>>;
type SinkSlot<T> = RefCell<Option<Rc<dyn SinkLogic<Item = T>>>>;

/// Mediates one producer/consumer pair.
pub(crate) struct Connection<T> {
    id: u64,
    this: Weak<Connection<T>>,
    state: Cell<ConnectionState>,
    /// Set while the source logic runs `on_pull`.
    pulling: Cell<bool>,
    /// Demand added by pulls issued while `pulling` is set.
    deferred: Cell<u64>,
    source: SourceSlot<T>,
    sink: SinkSlot<T>,
}

impl<T: 'static> Connection<T> {
    fn open(
        source: Rc<dyn SourceLogic<Item = T>>,
        sink: Rc<dyn SinkLogic<Item = T>>,
    ) -> Rc<Self> {
        let conn = Rc::new_cyclic(|this| Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            this: this.clone(),
            state: Cell::new(ConnectionState::Active(Demand::NONE)),
            pulling: Cell::new(false),
            deferred: Cell::new(0),
            source: RefCell::new(Some(source)),
            sink: RefCell::new(Some(sink)),
        });
        trace!(connection = conn.id, "connection opened");
        conn
    }

    fn inlet(&self) -> Option<Inlet> {
        let conn: Rc<dyn InletPort> = self.this.upgrade()?;
        Some(Inlet::new(conn))
    }

    fn outlet(&self) -> Option<Outlet<T>> {
        self.this.upgrade().map(|conn| Outlet { conn })
    }

    /// Moves to the terminal state and hands back the released logics, or
    /// `None` if the connection was already terminal.
    fn terminate(
        &self,
        termination: Termination,
    ) -> Option<(
        Option<Rc<dyn SourceLogic<Item = T>>>,
        Option<Rc<dyn SinkLogic<Item = T>>>,
    )> {
        if let ConnectionState::Terminal(previous) = self.state.get() {
            debug!(
                connection = self.id,
                ?previous,
                ignored = ?termination,
                "connection already terminal"
            );
            return None;
        }
        self.state.set(ConnectionState::Terminal(termination));
        trace!(connection = self.id, ?termination, "connection terminal");
        let source = self.source.borrow_mut().take();
        let sink = self.sink.borrow_mut().take();
        Some((source, sink))
    }

    fn emit(&self, element: T) -> Result<()> {
        let demand = match self.state.get() {
            ConnectionState::Active(demand) => demand,
            ConnectionState::Terminal(_) => {
                debug!(connection = self.id, "emit on a closed connection rejected");
                return Err(Error::Closed);
            }
        };
        let Some(remaining) = demand.consume_one() else {
            debug!(connection = self.id, "emit without demand rejected");
            return Err(Error::NoDemand);
        };
        self.state.set(ConnectionState::Active(remaining));
        trace!(connection = self.id, ?remaining, "emit");

        let sink = self.sink.borrow().clone();
        if let (Some(sink), Some(inlet)) = (sink, self.inlet()) {
            sink.on_push(&inlet, element);
        }
        Ok(())
    }

    fn fail(&self, failure: Error) {
        if let Some((_source, sink)) = self.terminate(Termination::Failed) {
            trace!(connection = self.id, error = %failure, "fail");
            if let Some(sink) = sink {
                sink.on_upstream_failure(failure);
            }
        }
    }

    fn complete(&self) {
        if let Some((_source, sink)) = self.terminate(Termination::Completed) {
            if let Some(sink) = sink {
                sink.on_upstream_finish();
            }
        }
    }
}

impl<T: 'static> InletPort for Connection<T> {
    fn pull(&self, n: u64) {
        if n == 0 {
            debug!(connection = self.id, "pull of zero elements ignored");
            return;
        }
        let demand = match self.state.get() {
            ConnectionState::Active(demand) => demand.add(n),
            ConnectionState::Terminal(_) => {
                debug!(connection = self.id, n, "pull on a closed connection ignored");
                return;
            }
        };
        self.state.set(ConnectionState::Active(demand));
        trace!(connection = self.id, n, ?demand, "pull");

        // A pull issued from inside `on_pull` (directly, or from a push it
        // triggered) only records the demand; the running call delivers it.
        if self.pulling.get() {
            self.deferred.set(self.deferred.get().saturating_add(n));
            return;
        }

        let Some(outlet) = self.outlet() else {
            return;
        };
        self.pulling.set(true);
        let mut requested = n;
        loop {
            let source = self.source.borrow().clone();
            let Some(source) = source else {
                break;
            };
            source.on_pull(&outlet, requested);
            requested = self.deferred.replace(0);
            if requested == 0 || self.state.get().is_terminal() {
                break;
            }
        }
        self.deferred.set(0);
        self.pulling.set(false);
    }

    fn cancel(&self) {
        if let Some((source, _sink)) = self.terminate(Termination::Cancelled) {
            if let Some(source) = source {
                source.on_downstream_finish();
            }
        }
    }
}

impl<T> Drop for Connection<T> {
    fn drop(&mut self) {
        trace!(connection = self.id, "connection released");
    }
}

/// Wire an already created source logic and sink logic together and give the
/// sink its first opportunity to pull.
pub fn attach<T: 'static>(
    source: Rc<dyn SourceLogic<Item = T>>,
    sink: Rc<dyn SinkLogic<Item = T>>,
) {
    let conn = Connection::open(source, Rc::clone(&sink));
    let inlet = Inlet::new(conn);
    sink.on_connect(&inlet);
}

/// Create the logic of `sink` and attach it to `source`.
///
/// This is the body of `Source::connect` for every leaf source.
pub fn connect<T: 'static>(
    source: Rc<dyn SourceLogic<Item = T>>,
    sink: &SinkRef<T>,
) -> Result<()> {
    let sink_logic = sink.create_logic()?;
    attach(source, sink_logic);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSource {
        pulls: RefCell<Vec<u64>>,
        finished: Cell<u32>,
        outlet: RefCell<Option<Outlet<i32>>>,
    }

    impl SourceLogic for RecordingSource {
        type Item = i32;

        fn on_pull(&self, outlet: &Outlet<i32>, n: u64) {
            self.pulls.borrow_mut().push(n);
            self.outlet
                .borrow_mut()
                .get_or_insert_with(|| outlet.clone());
        }

        fn on_downstream_finish(&self) {
            self.finished.set(self.finished.get() + 1);
        }
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Push(i32),
        Finished,
        Failed(String),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: RefCell<Vec<Event>>,
        inlet: RefCell<Option<Inlet>>,
    }

    impl SinkLogic for RecordingSink {
        type Item = i32;

        fn on_connect(&self, inlet: &Inlet) {
            *self.inlet.borrow_mut() = Some(inlet.clone());
        }

        fn on_push(&self, _inlet: &Inlet, element: i32) {
            self.events.borrow_mut().push(Event::Push(element));
        }

        fn on_upstream_finish(&self) {
            self.events.borrow_mut().push(Event::Finished);
        }

        fn on_upstream_failure(&self, failure: Error) {
            self.events
                .borrow_mut()
                .push(Event::Failed(failure.to_string()));
        }
    }

    impl RecordingSink {
        fn inlet(&self) -> Inlet {
            self.inlet.borrow().clone().expect("connected")
        }
    }

    fn wire() -> (Rc<RecordingSource>, Rc<RecordingSink>) {
        let source = Rc::new(RecordingSource::default());
        let sink = Rc::new(RecordingSink::default());
        attach(source.clone(), sink.clone());
        (source, sink)
    }

    fn outlet(source: &RecordingSource) -> Outlet<i32> {
        source.outlet.borrow().clone().expect("pulled")
    }

    #[test]
    fn demand_addition_saturates() {
        assert_eq!(Demand::NONE.add(3), Demand::Finite(3));
        assert_eq!(Demand::Finite(u64::MAX - 2).add(1), Demand::Finite(u64::MAX - 1));
        assert_eq!(Demand::Finite(u64::MAX - 1).add(1), Demand::Unbounded);
        assert_eq!(Demand::Finite(10).add(u64::MAX), Demand::Unbounded);
        assert_eq!(Demand::Unbounded.consume_one(), Some(Demand::Unbounded));
        assert_eq!(Demand::NONE.consume_one(), None);
        assert!(!Demand::NONE.has_demand());
    }

    #[test]
    fn emits_are_bounded_by_accumulated_demand() {
        let (source, sink) = wire();
        sink.inlet().pull(2);
        sink.inlet().pull(3);
        let out = outlet(&source);

        let accepted = (0..10).filter(|i| out.emit(*i).is_ok()).count();

        assert_eq!(accepted, 5);
        assert_eq!(*source.pulls.borrow(), vec![2, 3]);
        assert!(matches!(out.emit(99), Err(Error::NoDemand)));
        assert!(!out.available());
    }

    #[test]
    fn overflowing_demand_becomes_unbounded() {
        let (source, sink) = wire();
        sink.inlet().pull(u64::MAX - 1);
        sink.inlet().pull(5);
        let out = outlet(&source);

        assert_eq!(out.demand(), Some(Demand::Unbounded));
        for i in 0..1_000 {
            out.emit(i).unwrap();
        }
        assert_eq!(out.demand(), Some(Demand::Unbounded));
        assert_eq!(sink.events.borrow().len(), 1_000);
    }

    #[test]
    fn zero_pull_is_ignored() {
        let (source, sink) = wire();
        sink.inlet().pull(0);
        assert!(source.pulls.borrow().is_empty());
    }

    #[test]
    fn terminal_signals_are_idempotent() {
        let (source, sink) = wire();
        sink.inlet().pull(1);
        let out = outlet(&source);

        out.complete();
        out.fail(Error::custom("late"));
        out.complete();
        sink.inlet().cancel();

        assert_eq!(*sink.events.borrow(), vec![Event::Finished]);
        assert_eq!(source.finished.get(), 0);
        assert_eq!(out.state(), ConnectionState::Terminal(Termination::Completed));
    }

    #[test]
    fn cancel_stops_further_pulls() {
        let (source, sink) = wire();
        sink.inlet().pull(1);
        sink.inlet().cancel();
        sink.inlet().cancel();
        sink.inlet().pull(4);

        assert_eq!(*source.pulls.borrow(), vec![1]);
        assert_eq!(source.finished.get(), 1);
        outlet(&source).complete();
        assert!(sink.events.borrow().is_empty());
    }

    #[test]
    fn failed_connection_rejects_emits() {
        let (source, sink) = wire();
        sink.inlet().pull(3);
        let out = outlet(&source);

        out.fail(Error::custom("broken"));

        assert!(matches!(out.emit(1), Err(Error::Closed)));
        assert_eq!(
            *sink.events.borrow(),
            vec![Event::Failed("broken".to_string())]
        );
    }

    #[test]
    fn terminal_transition_releases_both_logics() {
        let (source, sink) = wire();
        sink.inlet().pull(1);
        assert_eq!(Rc::strong_count(&source), 2);
        assert_eq!(Rc::strong_count(&sink), 2);

        outlet(&source).complete();

        assert_eq!(Rc::strong_count(&source), 1);
        assert_eq!(Rc::strong_count(&sink), 1);
    }

    /// Emits one element per `on_pull` regardless of `n`, tracking how deep
    /// its calls nest.
    struct OneAtATime {
        left: Cell<i32>,
        pulls: RefCell<Vec<u64>>,
        depth: Cell<u32>,
        max_depth: Cell<u32>,
    }

    impl SourceLogic for OneAtATime {
        type Item = i32;

        fn on_pull(&self, outlet: &Outlet<i32>, n: u64) {
            self.pulls.borrow_mut().push(n);
            self.depth.set(self.depth.get() + 1);
            self.max_depth.set(self.max_depth.get().max(self.depth.get()));
            let left = self.left.get();
            if left == 0 {
                outlet.complete();
            } else {
                self.left.set(left - 1);
                let _ = outlet.emit(left);
            }
            self.depth.set(self.depth.get() - 1);
        }
    }

    /// Pulls one more element from inside every push.
    struct PullPerPush(Cell<u32>);

    impl SinkLogic for PullPerPush {
        type Item = i32;

        fn on_connect(&self, inlet: &Inlet) {
            inlet.pull(1);
        }

        fn on_push(&self, inlet: &Inlet, _element: i32) {
            self.0.set(self.0.get() + 1);
            inlet.pull(1);
        }
    }

    #[test]
    fn pulls_from_inside_on_pull_are_delivered_iteratively() {
        let source = Rc::new(OneAtATime {
            left: Cell::new(100_000),
            pulls: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            max_depth: Cell::new(0),
        });
        let sink = Rc::new(PullPerPush(Cell::new(0)));
        attach(source.clone(), sink.clone());

        assert_eq!(sink.0.get(), 100_000);
        assert_eq!(source.max_depth.get(), 1);
        assert_eq!(source.pulls.borrow().len(), 100_001);
        assert!(source.pulls.borrow().iter().all(|n| *n == 1));
        assert_eq!(Rc::strong_count(&source), 1);
    }
}
