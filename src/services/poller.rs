//! Poller — per-target refresh loop with change detection.
//!
//! DESIGN
//! ======
//! One spawned task per target (a chat id, or `()` for the dashboard). Each
//! tick fetches the full list and compares it with the last successful
//! fetch. The callback fires on the first success and whenever the item
//! count, the newest timestamp, the number of items sharing it, or the sum
//! of item revisions changes. Timestamps have one-second resolution, so
//! `fresh` holds items newer than the previous newest plus any items at that
//! same timestamp beyond the ones already seen. The watermark only moves on
//! success. Failures go to the callback as [`PollEvent::Failed`] and polling
//! carries on at the same interval.
//!
//! Overlapping ticks for one target are suppressed by a single-permit
//! semaphore owned by the [`Poller`] per target and reused when the target
//! is restarted: a tick that cannot take the permit returns
//! [`TickOutcome::Skipped`] without touching the source. Nothing is queued.
//!
//! TRADE-OFFS
//! ==========
//! `stop` cancels the loop between ticks. A fetch already in flight runs to
//! completion and may still deliver one last callback. Restarting a target
//! while its fetch is in flight skips the new loop's immediate sync; the
//! first delivery to the new callback then comes on the next tick.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::github::{Message, StoreError};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// TRAITS & EVENTS
// =============================================================================

/// Anything with a creation time the poller can use as a watermark.
pub trait PollItem {
    fn observed_at(&self) -> Option<OffsetDateTime>;

    /// Counter that grows when the item changes in place. Items that never
    /// change keep the default.
    fn revision(&self) -> u64 {
        0
    }
}

impl PollItem for Message {
    fn observed_at(&self) -> Option<OffsetDateTime> {
        Some(self.created_at)
    }
}

#[async_trait::async_trait]
pub trait PollSource: Send + Sync + 'static {
    type Target: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    type Item: PollItem + Clone + Send + Sync + 'static;
    type Error: fmt::Display + Send + Sync + 'static;

    async fn fetch(&self, target: Self::Target) -> Result<Vec<Self::Item>, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent<T, E = StoreError> {
    Update { all: Vec<T>, fresh: Vec<T> },
    Failed(E),
}

pub type PollCallback<T, E = StoreError> = Arc<dyn Fn(PollEvent<T, E>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick for the target was still in flight.
    Skipped,
    Unchanged,
    Delivered { total: usize, fresh: usize },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatus {
    pub in_flight: bool,
    pub last_success: Option<OffsetDateTime>,
    pub last_count: Option<usize>,
}

// =============================================================================
// TASK
// =============================================================================

#[derive(Default)]
struct Watermark {
    count: Option<usize>,
    newest: Option<OffsetDateTime>,
    /// Items stamped exactly `newest`.
    at_newest: usize,
    revision: u64,
    last_success: Option<OffsetDateTime>,
}

impl Watermark {
    /// Items past this watermark, in list order.
    fn fresh<T: PollItem + Clone>(&self, items: &[T]) -> Vec<T> {
        let Some(newest) = self.newest else {
            return items.to_vec();
        };
        let mut ties = 0;
        items
            .iter()
            .filter(|item| match item.observed_at() {
                Some(at) if at > newest => true,
                Some(at) if at == newest => {
                    ties += 1;
                    ties > self.at_newest
                }
                _ => false,
            })
            .cloned()
            .collect()
    }
}

struct PollTask<S: PollSource> {
    target: S::Target,
    source: Arc<S>,
    callback: PollCallback<S::Item, S::Error>,
    permit: Arc<Semaphore>,
    watermark: Mutex<Watermark>,
}

impl<S: PollSource> PollTask<S> {
    fn new(
        target: S::Target,
        source: Arc<S>,
        callback: PollCallback<S::Item, S::Error>,
        permit: Arc<Semaphore>,
    ) -> Self {
        Self { target, source, callback, permit, watermark: Mutex::new(Watermark::default()) }
    }

    fn mark(&self) -> MutexGuard<'_, Watermark> {
        self.watermark.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn tick(&self) -> TickOutcome {
        let Ok(_permit) = self.permit.try_acquire() else {
            debug!(target = ?self.target, "tick skipped; previous tick in flight");
            return TickOutcome::Skipped;
        };

        let items = match self.source.fetch(self.target).await {
            Ok(items) => items,
            Err(e) => {
                warn!(target = ?self.target, error = %e, "poll fetch failed");
                (self.callback)(PollEvent::Failed(e));
                return TickOutcome::Failed;
            }
        };

        let newest = items.iter().filter_map(PollItem::observed_at).max();
        let at_newest = newest.map_or(0, |n| items.iter().filter(|i| i.observed_at() == Some(n)).count());
        let revision = items.iter().fold(0u64, |sum, i| sum.wrapping_add(i.revision()));

        let fresh = {
            let mut mark = self.mark();
            let changed = mark.count != Some(items.len())
                || mark.newest != newest
                || mark.at_newest != at_newest
                || mark.revision != revision;
            let fresh = changed.then(|| mark.fresh(&items));
            *mark = Watermark {
                count: Some(items.len()),
                newest,
                at_newest,
                revision,
                last_success: Some(OffsetDateTime::now_utc()),
            };
            fresh
        };

        match fresh {
            Some(fresh) => {
                let outcome = TickOutcome::Delivered { total: items.len(), fresh: fresh.len() };
                debug!(target = ?self.target, total = items.len(), fresh = fresh.len(), "poll delivered");
                (self.callback)(PollEvent::Update { all: items, fresh });
                outcome
            }
            None => TickOutcome::Unchanged,
        }
    }

    fn status(&self) -> PollStatus {
        let mark = self.mark();
        PollStatus {
            in_flight: self.permit.available_permits() == 0,
            last_success: mark.last_success,
            last_count: mark.count,
        }
    }
}

async fn run_loop<S: PollSource>(task: Arc<PollTask<S>>, cancel: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        task.tick().await;
    }
    debug!(target = ?task.target, "poll loop stopped");
}

// =============================================================================
// POLLER
// =============================================================================

struct Registration<S: PollSource> {
    task: Arc<PollTask<S>>,
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

struct Targets<S: PollSource> {
    running: HashMap<S::Target, Registration<S>>,
    /// In-flight permits, kept per target across restarts.
    permits: HashMap<S::Target, Arc<Semaphore>>,
}

/// Registry of running poll loops over one source.
pub struct Poller<S: PollSource> {
    source: Arc<S>,
    targets: Mutex<Targets<S>>,
}

impl<S: PollSource> Poller<S> {
    #[must_use]
    pub fn new(source: Arc<S>) -> Self {
        Self { source, targets: Mutex::new(Targets { running: HashMap::new(), permits: HashMap::new() }) }
    }

    fn lock(&self) -> MutexGuard<'_, Targets<S>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any poller for `target`, sync immediately, then repeat every
    /// `interval`. Must be called inside a tokio runtime.
    pub fn start<F>(&self, target: S::Target, interval: Duration, callback: F)
    where
        F: Fn(PollEvent<S::Item, S::Error>) + Send + Sync + 'static,
    {
        let mut targets = self.lock();
        let permit = targets.permits.entry(target).or_insert_with(|| Arc::new(Semaphore::new(1))).clone();
        let task = Arc::new(PollTask::new(target, self.source.clone(), Arc::new(callback), permit));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(task.clone(), cancel.clone(), interval));
        let previous = targets.running.insert(target, Registration { task, cancel, _handle: handle });
        drop(targets);

        if let Some(previous) = previous {
            previous.cancel.cancel();
            info!(target = ?target, "previous poller replaced");
        }
        info!(target = ?target, interval_ms = interval.as_millis(), "polling started");
    }

    /// Stop polling `target`. Returns whether a poller was running.
    pub fn stop(&self, target: S::Target) -> bool {
        let Some(registration) = self.lock().running.remove(&target) else {
            return false;
        };
        registration.cancel.cancel();
        info!(target = ?target, "polling stopped");
        true
    }

    /// Stop every poller. Returns how many were running.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<_> = self.lock().running.drain().collect();
        for (_, registration) in &drained {
            registration.cancel.cancel();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "all polling stopped");
        }
        drained.len()
    }

    /// Run one tick now with the registered callback. `None` if `target`
    /// has no poller.
    pub async fn force_sync(&self, target: S::Target) -> Option<TickOutcome> {
        let task = self.lock().running.get(&target).map(|r| r.task.clone())?;
        Some(task.tick().await)
    }

    #[must_use]
    pub fn status(&self, target: S::Target) -> Option<PollStatus> {
        self.lock().running.get(&target).map(|r| r.task.status())
    }

    #[must_use]
    pub fn running_targets(&self) -> Vec<S::Target> {
        self.lock().running.keys().copied().collect()
    }
}

impl<S: PollSource> Drop for Poller<S> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
#[path = "poller_test.rs"]
mod tests;
