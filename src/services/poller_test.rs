use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Stamp(i64);

impl PollItem for Stamp {
    fn observed_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.0).ok()
    }
}

/// Item whose content changes without a new timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Counter {
    at: i64,
    hits: u64,
}

impl PollItem for Counter {
    fn observed_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.at).ok()
    }

    fn revision(&self) -> u64 {
        self.hits
    }
}

#[derive(Default)]
struct FakeSource {
    items: Mutex<Vec<Stamp>>,
    failures: Mutex<VecDeque<StoreError>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    calls: AtomicUsize,
}

impl FakeSource {
    fn set_items(&self, stamps: &[i64]) {
        *self.items.lock().unwrap() = stamps.iter().copied().map(Stamp).collect();
    }

    fn fail_next(&self, err: StoreError) {
        self.failures.lock().unwrap().push_back(err);
    }

    fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PollSource for FakeSource {
    type Target = u64;
    type Item = Stamp;
    type Error = StoreError;

    async fn fetch(&self, _target: u64) -> Result<Vec<Stamp>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

type Events = mpsc::UnboundedReceiver<PollEvent<Stamp>>;

fn task_with_channel(source: &Arc<FakeSource>) -> (Arc<PollTask<FakeSource>>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: PollCallback<Stamp> = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    let permit = Arc::new(Semaphore::new(1));
    (Arc::new(PollTask::new(7, source.clone(), callback, permit)), rx)
}

async fn wait_for_calls(source: &FakeSource, n: usize) {
    timeout(WAIT, async {
        while source.calls() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

async fn wait_until_idle(poller: &Poller<FakeSource>, target: u64) {
    timeout(WAIT, async {
        while poller.status(target).is_some_and(|s| s.in_flight) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

// =============================================================================
// tick
// =============================================================================

#[tokio::test]
async fn first_success_delivers_even_when_empty() {
    let source = Arc::new(FakeSource::default());
    let (task, mut events) = task_with_channel(&source);

    assert_eq!(task.tick().await, TickOutcome::Delivered { total: 0, fresh: 0 });
    assert_eq!(events.try_recv().unwrap(), PollEvent::Update { all: vec![], fresh: vec![] });
}

#[tokio::test]
async fn unchanged_count_does_not_call_back() {
    let source = Arc::new(FakeSource::default());
    source.set_items(&[10, 20]);
    let (task, mut events) = task_with_channel(&source);

    task.tick().await;
    events.try_recv().unwrap();
    assert_eq!(task.tick().await, TickOutcome::Unchanged);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn fresh_holds_only_items_newer_than_last_success() {
    let source = Arc::new(FakeSource::default());
    source.set_items(&[10, 20]);
    let (task, mut events) = task_with_channel(&source);
    task.tick().await;
    events.try_recv().unwrap();

    source.set_items(&[10, 20, 30]);
    assert_eq!(task.tick().await, TickOutcome::Delivered { total: 3, fresh: 1 });
    assert_eq!(
        events.try_recv().unwrap(),
        PollEvent::Update { all: vec![Stamp(10), Stamp(20), Stamp(30)], fresh: vec![Stamp(30)] }
    );
}

#[tokio::test]
async fn items_sharing_the_newest_second_are_fresh() {
    let source = Arc::new(FakeSource::default());
    source.set_items(&[10, 20]);
    let (task, mut events) = task_with_channel(&source);
    task.tick().await;
    events.try_recv().unwrap();

    source.set_items(&[10, 20, 20]);
    assert_eq!(task.tick().await, TickOutcome::Delivered { total: 3, fresh: 1 });
    assert_eq!(
        events.try_recv().unwrap(),
        PollEvent::Update { all: vec![Stamp(10), Stamp(20), Stamp(20)], fresh: vec![Stamp(20)] }
    );

    source.set_items(&[10, 20, 20, 20, 21]);
    assert_eq!(task.tick().await, TickOutcome::Delivered { total: 5, fresh: 2 });
    assert_eq!(
        events.try_recv().unwrap(),
        PollEvent::Update {
            all: vec![Stamp(10), Stamp(20), Stamp(20), Stamp(20), Stamp(21)],
            fresh: vec![Stamp(20), Stamp(21)]
        }
    );
}

#[test]
fn watermark_without_history_treats_everything_as_fresh() {
    let mark = Watermark::default();
    assert_eq!(mark.fresh(&[Stamp(1), Stamp(2)]), vec![Stamp(1), Stamp(2)]);
}

#[test]
fn watermark_skips_ties_already_seen() {
    let mark = Watermark {
        newest: OffsetDateTime::from_unix_timestamp(20).ok(),
        at_newest: 2,
        ..Watermark::default()
    };
    let items = [Stamp(19), Stamp(20), Stamp(20), Stamp(20)];
    assert_eq!(mark.fresh(&items), vec![Stamp(20)]);
}

#[tokio::test]
async fn revision_change_redelivers_with_same_count_and_time() {
    struct Counters(Mutex<Vec<Counter>>);

    #[async_trait::async_trait]
    impl PollSource for Counters {
        type Target = u64;
        type Item = Counter;
        type Error = StoreError;

        async fn fetch(&self, _target: u64) -> Result<Vec<Counter>, StoreError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    let source = Arc::new(Counters(Mutex::new(vec![Counter { at: 10, hits: 1 }])));
    let (tx, mut events) = mpsc::unbounded_channel();
    let callback: PollCallback<Counter> = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    let task = PollTask::new(1, source.clone(), callback, Arc::new(Semaphore::new(1)));

    task.tick().await;
    events.try_recv().unwrap();
    assert_eq!(task.tick().await, TickOutcome::Unchanged);

    source.0.lock().unwrap()[0].hits = 2;
    assert_eq!(task.tick().await, TickOutcome::Delivered { total: 1, fresh: 0 });
    assert_eq!(
        events.try_recv().unwrap(),
        PollEvent::Update { all: vec![Counter { at: 10, hits: 2 }], fresh: vec![] }
    );
}

#[tokio::test]
async fn failure_is_delivered_and_leaves_watermark_alone() {
    let source = Arc::new(FakeSource::default());
    source.set_items(&[10]);
    let (task, mut events) = task_with_channel(&source);
    task.tick().await;
    events.try_recv().unwrap();

    source.fail_next(StoreError::Timeout);
    assert_eq!(task.tick().await, TickOutcome::Failed);
    assert_eq!(events.try_recv().unwrap(), PollEvent::Failed(StoreError::Timeout));
    assert_eq!(task.status().last_count, Some(1));

    // Same list as before the failure: nothing new to report.
    assert_eq!(task.tick().await, TickOutcome::Unchanged);
}

#[tokio::test]
async fn failure_before_first_success_keeps_first_delivery_pending() {
    let source = Arc::new(FakeSource::default());
    source.fail_next(StoreError::Network("offline".into()));
    let (task, mut events) = task_with_channel(&source);

    assert_eq!(task.tick().await, TickOutcome::Failed);
    assert!(matches!(events.try_recv().unwrap(), PollEvent::Failed(_)));
    assert_eq!(task.status().last_success, None);
    assert_eq!(task.tick().await, TickOutcome::Delivered { total: 0, fresh: 0 });
}

#[tokio::test]
async fn overlapping_tick_is_skipped_without_fetching() {
    let source = Arc::new(FakeSource::default());
    let gate = source.gate();
    let (task, _events) = task_with_channel(&source);

    let first = tokio::spawn({
        let task = task.clone();
        async move { task.tick().await }
    });
    wait_for_calls(&source, 1).await;
    assert!(task.status().in_flight);

    assert_eq!(task.tick().await, TickOutcome::Skipped);
    assert_eq!(source.calls(), 1);

    gate.add_permits(1);
    assert_eq!(first.await.unwrap(), TickOutcome::Delivered { total: 0, fresh: 0 });
    assert!(!task.status().in_flight);
}

// =============================================================================
// Poller
// =============================================================================

#[tokio::test]
async fn start_syncs_immediately() {
    let source = Arc::new(FakeSource::default());
    source.set_items(&[10]);
    let poller = Poller::new(source.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    poller.start(1, Duration::from_secs(3_600), move |event| {
        let _ = tx.send(event);
    });

    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event, PollEvent::Update { all: vec![Stamp(10)], fresh: vec![Stamp(10)] });
    assert_eq!(poller.running_targets(), vec![1]);
}

#[tokio::test]
async fn polling_continues_after_failure() {
    let source = Arc::new(FakeSource::default());
    source.fail_next(StoreError::Timeout);
    let poller = Poller::new(source.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    poller.start(1, Duration::from_millis(20), move |event| {
        let _ = tx.send(event);
    });

    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap(), PollEvent::Failed(StoreError::Timeout));
    let next = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(next, PollEvent::Update { all: vec![], fresh: vec![] });
    poller.stop_all();
}

#[tokio::test]
async fn stop_is_idempotent() {
    let poller = Poller::new(Arc::new(FakeSource::default()));
    poller.start(1, Duration::from_secs(3_600), |_| {});

    assert!(poller.stop(1));
    assert!(!poller.stop(1));
    assert!(!poller.stop(99));
    assert!(poller.running_targets().is_empty());
    assert_eq!(poller.status(1), None);
}

#[tokio::test]
async fn stop_prevents_future_ticks() {
    let source = Arc::new(FakeSource::default());
    let poller = Poller::new(source.clone());
    poller.start(1, Duration::from_millis(20), |_| {});
    wait_for_calls(&source, 1).await;

    poller.stop(1);
    tokio::time::sleep(Duration::from_millis(30)).await;
    let after_stop = source.calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.calls(), after_stop);
}

#[tokio::test]
async fn restart_replaces_previous_poller() {
    let poller = Poller::new(Arc::new(FakeSource::default()));
    poller.start(1, Duration::from_secs(3_600), |_| {});
    poller.start(1, Duration::from_secs(3_600), |_| {});
    poller.start(2, Duration::from_secs(3_600), |_| {});

    let mut targets = poller.running_targets();
    targets.sort_unstable();
    assert_eq!(targets, vec![1, 2]);
    assert_eq!(poller.stop_all(), 2);
    assert_eq!(poller.stop_all(), 0);
}

#[tokio::test]
async fn restart_during_fetch_does_not_overlap() {
    let source = Arc::new(FakeSource::default());
    let gate = source.gate();
    let poller = Poller::new(source.clone());

    poller.start(7, Duration::from_secs(3_600), |_| {});
    wait_for_calls(&source, 1).await;

    poller.start(7, Duration::from_secs(3_600), |_| {});
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.calls(), 1);
    assert!(poller.status(7).unwrap().in_flight);
    assert_eq!(poller.force_sync(7).await, Some(TickOutcome::Skipped));
    assert_eq!(source.calls(), 1);

    gate.add_permits(2);
    wait_until_idle(&poller, 7).await;
    assert_eq!(poller.force_sync(7).await, Some(TickOutcome::Delivered { total: 0, fresh: 0 }));
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn restart_cancels_the_replaced_loop() {
    let source = Arc::new(FakeSource::default());
    for _ in 0..10_000 {
        source.fail_next(StoreError::Timeout);
    }
    let poller = Poller::new(source.clone());
    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    poller.start(1, Duration::from_millis(10), move |event| {
        let _ = old_tx.send(event);
    });
    timeout(WAIT, old_rx.recv()).await.unwrap().unwrap();

    let (new_tx, mut new_rx) = mpsc::unbounded_channel();
    poller.start(1, Duration::from_millis(10), move |event| {
        let _ = new_tx.send(event);
    });
    timeout(WAIT, new_rx.recv()).await.unwrap().unwrap();

    // At most one tick of the old loop was still running at restart.
    tokio::time::sleep(Duration::from_millis(30)).await;
    while old_rx.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(old_rx.try_recv().is_err());
    assert_eq!(poller.stop_all(), 1);
}

#[tokio::test]
async fn force_sync_uses_registered_callback() {
    let source = Arc::new(FakeSource::default());
    let poller = Poller::new(source.clone());
    assert_eq!(poller.force_sync(1).await, None);

    let (tx, mut rx) = mpsc::unbounded_channel();
    poller.start(1, Duration::from_secs(3_600), move |event| {
        let _ = tx.send(event);
    });
    timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    wait_until_idle(&poller, 1).await;

    source.set_items(&[5]);
    assert_eq!(poller.force_sync(1).await, Some(TickOutcome::Delivered { total: 1, fresh: 1 }));
    assert_eq!(rx.recv().await.unwrap(), PollEvent::Update { all: vec![Stamp(5)], fresh: vec![Stamp(5)] });

    let status = poller.status(1).unwrap();
    assert_eq!(status.last_count, Some(1));
    assert!(status.last_success.is_some());
}
