//! Bounded-concurrency driver for resolution work.
//!
//! Units are lazy: nothing runs until the pool admits it, and at most `limit` run at once. All
//! of them are polled on the calling task, so no unit needs to be `'static` or `Send`.
//! Completed results are handed to the caller in batches on a fixed timer, in pool order.

use futures::{stream, StreamExt};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Cooperative stop flag. Checked before each unit starts; started units run to completion.
#[derive(Debug, Clone, Default)]
pub struct Terminate(Arc<AtomicBool>);

impl Terminate {
    pub fn new() -> Self {
        Terminate::default()
    }

    pub fn terminate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What became of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome<T> {
    Done(T),
    /// The unit exceeded the per-unit timeout.
    TimedOut,
    /// The terminate flag was set before the unit started.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSummary {
    pub completed: usize,
    pub timed_out: usize,
    pub skipped: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyPool {
    limit: usize,
    flush_interval: Duration,
    unit_timeout: Option<Duration>,
}

impl ConcurrencyPool {
    pub fn new(limit: usize, flush_interval: Duration) -> Self {
        ConcurrencyPool {
            limit: limit.max(1),
            flush_interval,
            unit_timeout: None,
        }
    }

    pub fn with_unit_timeout(mut self, unit_timeout: Duration) -> Self {
        self.unit_timeout = (!unit_timeout.is_zero()).then_some(unit_timeout);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drive `units` to completion. `on_batch` receives `(index, outcome)` pairs in index order;
    /// every unit is reported exactly once.
    pub async fn run<T, F, Fut, B>(
        &self,
        units: Vec<F>,
        terminate: &Terminate,
        mut on_batch: B,
    ) -> PoolSummary
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        B: FnMut(Vec<(usize, UnitOutcome<T>)>),
    {
        let mut summary = PoolSummary::default();
        if units.is_empty() {
            return summary;
        }
        let unit_timeout = self.unit_timeout;
        let results = stream::iter(units.into_iter().enumerate().map(|(index, unit)| {
            async move {
                if terminate.is_set() {
                    return (index, UnitOutcome::Skipped);
                }
                let outcome = match unit_timeout {
                    Some(limit) => match timeout(limit, unit()).await {
                        Ok(value) => UnitOutcome::Done(value),
                        Err(_) => UnitOutcome::TimedOut,
                    },
                    None => UnitOutcome::Done(unit().await),
                };
                (index, outcome)
            }
        }))
        .buffered(self.limit);
        tokio::pin!(results);

        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut pending: Vec<(usize, UnitOutcome<T>)> = Vec::new();
        loop {
            tokio::select! {
                next = results.next() => match next {
                    Some(entry) => {
                        match &entry.1 {
                            UnitOutcome::Done(_) => summary.completed += 1,
                            UnitOutcome::TimedOut => summary.timed_out += 1,
                            UnitOutcome::Skipped => summary.skipped += 1,
                        }
                        pending.push(entry);
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        summary.batches += 1;
                        on_batch(std::mem::take(&mut pending));
                    }
                }
            }
        }
        if !pending.is_empty() {
            summary.batches += 1;
            on_batch(pending);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn every_unit_is_reported_once_in_order() {
        let pool = ConcurrencyPool::new(3, Duration::from_millis(50));
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let units: Vec<_> = (0..10u64)
            .map(|i| {
                let in_flight = &in_flight;
                let peak = &peak;
                move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // Later units finish first.
                    tokio::time::sleep(Duration::from_millis(100 - i * 10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    i
                }
            })
            .collect();

        let mut seen = Vec::new();
        let mut batches = 0;
        let summary = pool
            .run(units, &Terminate::new(), |batch| {
                batches += 1;
                seen.extend(batch.into_iter().map(|(index, outcome)| {
                    assert_eq!(outcome, UnitOutcome::Done(index as u64));
                    index
                }));
            })
            .await;

        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(summary.completed, 10);
        assert_eq!(summary.batches, batches);
        assert!(batches > 1);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_units_time_out() {
        let pool = ConcurrencyPool::new(2, Duration::from_millis(10))
            .with_unit_timeout(Duration::from_millis(100));
        let units: Vec<_> = [5u64, 500, 5]
            .into_iter()
            .map(|ms| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    ms
                }
            })
            .collect();
        let mut outcomes = Vec::new();
        let summary = pool
            .run(units, &Terminate::new(), |batch| outcomes.extend(batch))
            .await;
        assert_eq!(summary.timed_out, 1);
        assert_eq!(outcomes[1], (1, UnitOutcome::TimedOut));
        assert_eq!(outcomes[2], (2, UnitOutcome::Done(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_skips_units_not_yet_started() {
        let pool = ConcurrencyPool::new(1, Duration::from_millis(10));
        let terminate = Terminate::new();
        let units: Vec<_> = (0..4)
            .map(|i| {
                let terminate = terminate.clone();
                move || async move {
                    if i == 1 {
                        terminate.terminate();
                    }
                    i
                }
            })
            .collect();
        let mut outcomes = Vec::new();
        let summary = pool.run(units, &terminate, |b| outcomes.extend(b)).await;
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(outcomes[3], (3, UnitOutcome::Skipped));
    }
}
