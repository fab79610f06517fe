//! Tests for the tokio-backed scheduler and the stream bridges

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::task::Poll;

use futures::{StreamExt, TryStreamExt};
use pullstream::core::connect;
use pullstream::prelude::*;
use pullstream::{flows, sinks, sources};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_test::{assert_pending, task};

fn trampoline() -> SchedulerRef {
    Rc::new(TrampolineScheduler::new())
}

/// A source that never emits and records whether it was cancelled.
struct Silent(Rc<Cell<bool>>);

impl Source for Silent {
    type Item = i64;

    fn connect(&self, sink: &SinkRef<i64>) -> Result<()> {
        connect(Rc::new(SilentLogic(Rc::clone(&self.0))), sink)
    }
}

struct SilentLogic(Rc<Cell<bool>>);

impl SourceLogic for SilentLogic {
    type Item = i64;

    fn on_pull(&self, _outlet: &Outlet<i64>, _n: u64) {}

    fn on_downstream_finish(&self) {
        self.0.set(true);
    }
}

#[tokio::test]
async fn test_local_scheduler_pipeline() {
    let scheduler = LocalScheduler::new();
    let handle: SchedulerRef = Rc::new(scheduler.clone());
    let collect = CollectSink::new();

    sources::count(0, 5)
        .via(flows::map(|x: i64| x * 10))
        .to(collect.as_sink())
        .start(&handle)
        .unwrap();

    // The first pull only runs once the local set is driven.
    assert!(collect.items().is_empty());

    let outcome = scheduler.run_until(collect.finished()).await;
    assert!(outcome.is_ok());
    assert_eq!(collect.items(), vec![0, 10, 20, 30, 40]);
}

#[tokio::test]
async fn test_to_stream_on_trampoline() {
    let config = DemandConfig::new().max_demand(4).min_demand(1);
    let (sink, stream) = sinks::to_stream::<i64>(config).unwrap();

    sources::count(0, 10).to(sink).start(&trampoline()).unwrap();

    let items: Vec<i64> = stream.try_collect().await.unwrap();
    assert_eq!(items, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_to_stream_on_local_scheduler() {
    let scheduler = LocalScheduler::new();
    let handle: SchedulerRef = Rc::new(scheduler.clone());
    let (sink, stream) = sinks::to_stream::<i64>(DemandConfig::default()).unwrap();

    sources::count(1, 4)
        .via(flows::map(|x: i64| x * x))
        .to(sink)
        .start(&handle)
        .unwrap();

    let items: Vec<i64> = scheduler.run_until(stream.try_collect()).await.unwrap();
    assert_eq!(items, vec![1, 4, 9]);
}

#[test]
fn test_failure_is_yielded_once() {
    let (sink, stream) = sinks::to_stream::<i64>(DemandConfig::default()).unwrap();
    sources::failed::<i64>(Error::custom("gone"))
        .to(sink)
        .start(&trampoline())
        .unwrap();

    let mut stream = task::spawn(stream);
    match stream.poll_next() {
        Poll::Ready(Some(Err(err))) => assert_eq!(err.to_string(), "gone"),
        other => panic!("expected a failure, got {other:?}"),
    }
    assert!(matches!(stream.poll_next(), Poll::Ready(None)));
}

#[test]
fn test_empty_source_ends_stream() {
    let (sink, stream) = sinks::to_stream::<i64>(DemandConfig::default()).unwrap();
    sources::empty::<i64>()
        .to(sink)
        .start(&trampoline())
        .unwrap();

    let mut stream = task::spawn(stream);
    assert!(matches!(stream.poll_next(), Poll::Ready(None)));
}

#[test]
fn test_dropping_stream_cancels_upstream() {
    let cancelled = Rc::new(Cell::new(false));
    let source: SourceRef<i64> = Rc::new(Silent(Rc::clone(&cancelled)));
    let (sink, stream) = sinks::to_stream::<i64>(DemandConfig::default()).unwrap();

    source.to(sink).start(&trampoline()).unwrap();

    let mut stream = task::spawn(stream);
    assert_pending!(stream.poll_next());
    assert!(!cancelled.get());

    drop(stream);
    assert!(cancelled.get());
}

#[tokio::test]
async fn test_stream_wakes_on_push() {
    let scheduler = LocalScheduler::new();
    let (tx, rx) = mpsc::unbounded_channel::<i64>();
    let rx = RefCell::new(Some(rx));
    let source = sources::from_stream(&scheduler, move || {
        let rx = rx.borrow_mut().take().expect("connected once");
        UnboundedReceiverStream::new(rx).map(Ok)
    });
    let (sink, stream) = sinks::to_stream::<i64>(DemandConfig::default()).unwrap();

    source.to(sink).start(&trampoline()).unwrap();

    let mut stream = task::spawn(stream);
    assert_pending!(stream.poll_next());

    tx.send(7).unwrap();
    scheduler
        .run_until(async {
            while !stream.is_woken() {
                tokio::task::yield_now().await;
            }
        })
        .await;

    assert!(matches!(stream.poll_next(), Poll::Ready(Some(Ok(7)))));
    assert_pending!(stream.poll_next());

    drop(tx);
    scheduler
        .run_until(async {
            while !stream.is_woken() {
                tokio::task::yield_now().await;
            }
        })
        .await;
    assert!(matches!(stream.poll_next(), Poll::Ready(None)));
}

#[tokio::test]
async fn test_from_stream_error_item_fails() {
    let scheduler = LocalScheduler::new();
    let handle: SchedulerRef = Rc::new(scheduler.clone());
    let collect = CollectSink::new();
    let source = sources::from_stream(&scheduler, || {
        tokio_stream::iter(vec![
            Ok(1),
            Ok(2),
            Err(Error::custom("bad item")),
            Ok(3),
        ])
    });

    source.to(collect.as_sink()).start(&handle).unwrap();
    let outcome = scheduler.run_until(collect.finished()).await;

    assert_eq!(collect.items(), vec![1, 2]);
    assert!(matches!(outcome, Err(Error::Custom(_))));
}

#[tokio::test]
async fn test_from_stream_respects_demand() {
    let scheduler = LocalScheduler::new();
    let (sink, stream) = sinks::to_stream::<i64>(DemandConfig::new().max_demand(2)).unwrap();
    let source = sources::from_stream(&scheduler, || {
        futures::stream::iter((0..1_000).map(Ok))
    });

    source.to(sink).start(&trampoline()).unwrap();

    scheduler
        .run_until(async {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        })
        .await;

    assert_eq!((&stream).buffered(), 2);
}

/// Pulls once on connect and counts when its logic is released.
struct PullOnce(Rc<Cell<u32>>);

struct PullOnceLogic(Rc<Cell<u32>>);

impl Sink for PullOnce {
    type Item = i64;

    fn create_logic(&self) -> Result<Rc<dyn SinkLogic<Item = i64>>> {
        Ok(Rc::new(PullOnceLogic(Rc::clone(&self.0))))
    }
}

impl SinkLogic for PullOnceLogic {
    type Item = i64;

    fn on_connect(&self, inlet: &Inlet) {
        inlet.pull(3);
    }

    fn on_push(&self, _inlet: &Inlet, _element: i64) {}
}

impl Drop for PullOnceLogic {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

#[tokio::test]
async fn test_stalled_pipeline_on_local_scheduler_is_released() {
    let scheduler = LocalScheduler::new();
    let handle: SchedulerRef = Rc::new(scheduler.clone());
    let drops = Rc::new(Cell::new(0));
    let sink: SinkRef<i64> = Rc::new(PullOnce(Rc::clone(&drops)));

    sources::count(0, 10).to(sink).start(&handle).unwrap();
    assert_eq!(drops.get(), 0);

    scheduler
        .run_until(async {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        })
        .await;

    assert_eq!(drops.get(), 1);
}
