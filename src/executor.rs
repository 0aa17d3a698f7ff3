//! Bounded-concurrency execution over a work queue that can grow while it runs.
//!
//! [`BoundedExecutor::execute`] resolves exactly once, after the queue has
//! been sealed and every item submitted before sealing has finished. Items
//! are dispatched in FIFO order and never more than `limit` run at a time.
//! All bookkeeping happens on the task that polls `execute`, so no locking is
//! involved.

use crate::errors::{Error, Result};
use futures::channel::mpsc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use tracing::{debug, trace};

/// Concurrency ceiling used when none is configured.
pub const DEFAULT_CONCURRENCY: NonZeroUsize = match NonZeroUsize::new(20) {
    Some(n) => n,
    None => panic!("default concurrency must be non-zero"),
};

/// Resolves a configured concurrency ceiling. `None` means
/// [`DEFAULT_CONCURRENCY`]; zero is a configuration error.
pub fn concurrency_limit(requested: Option<usize>) -> Result<NonZeroUsize> {
    match requested {
        None => Ok(DEFAULT_CONCURRENCY),
        Some(n) => NonZeroUsize::new(n)
            .ok_or_else(|| Error::Config("concurrency must be at least 1".into())),
    }
}

/// Handle for feeding items to a running [`BoundedExecutor`].
///
/// Sealing through any handle seals the queue for all of them. Dropping
/// every handle also seals it.
pub struct WorkQueue<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Appends an item behind everything already pending.
    ///
    /// Returns `Error::QueueSealed` once the queue has been sealed.
    pub fn push(&self, item: T) -> Result<()> {
        self.tx.unbounded_send(item).map_err(|_| Error::QueueSealed)
    }

    /// Declares that no further items will be pushed.
    pub fn seal(&self) {
        self.tx.close_channel();
    }

    pub fn is_sealed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Counters reported when an execution completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Number of items whose worker future completed.
    pub completed: usize,
    /// Largest number of items that were in flight at once.
    pub peak_in_flight: usize,
}

/// Runs a worker over queued items with at most `limit` in flight.
pub struct BoundedExecutor<T> {
    pending: VecDeque<T>,
    incoming: mpsc::UnboundedReceiver<T>,
    limit: NonZeroUsize,
}

impl<T> BoundedExecutor<T> {
    /// Creates an executor seeded with `initial` and an open queue handle for
    /// later pushes.
    pub fn new(initial: impl IntoIterator<Item = T>, limit: NonZeroUsize) -> (Self, WorkQueue<T>) {
        let (tx, incoming) = mpsc::unbounded();
        let executor = Self {
            pending: initial.into_iter().collect(),
            incoming,
            limit,
        };
        (executor, WorkQueue { tx })
    }

    /// Creates an executor over a fixed set of items.
    pub fn sealed(items: impl IntoIterator<Item = T>, limit: NonZeroUsize) -> Self {
        let (executor, queue) = Self::new(items, limit);
        queue.seal();
        executor
    }

    pub fn limit(&self) -> NonZeroUsize {
        self.limit
    }

    /// Drains the queue through `worker`.
    ///
    /// Each item is handed to `worker` once; the item counts as done when the
    /// returned future completes. The worker is expected to handle its own
    /// failures, the executor neither retries nor inspects results.
    ///
    /// There is no cancellation parameter: every submitted item is handed to
    /// the worker, and workers observe cancellation themselves.
    pub async fn execute<F, Fut>(mut self, mut worker: F) -> ExecutionStats
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let limit = self.limit.get();
        let mut in_flight = FuturesUnordered::new();
        let mut stats = ExecutionStats::default();
        let mut sealed = false;

        loop {
            while in_flight.len() < limit {
                let Some(item) = self.pending.pop_front() else {
                    break;
                };
                in_flight.push(worker(item));
                stats.peak_in_flight = stats.peak_in_flight.max(in_flight.len());
            }

            // With a free slot the loop above has emptied `pending`.
            if sealed && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {
                    stats.completed += 1;
                }
                item = self.incoming.next(), if !sealed => match item {
                    Some(item) => self.pending.push_back(item),
                    None => {
                        trace!(pending = self.pending.len(), in_flight = in_flight.len(), "queue sealed");
                        sealed = true;
                    }
                },
            }
        }

        debug!(
            completed = stats.completed,
            peak_in_flight = stats.peak_in_flight,
            "execution finished"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn limit(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[derive(Default)]
    struct Tracker {
        running: Cell<usize>,
        max_running: Cell<usize>,
        started: RefCell<Vec<usize>>,
        finished: Cell<usize>,
    }

    impl Tracker {
        async fn run(&self, item: usize, yields: usize) {
            self.started.borrow_mut().push(item);
            self.running.set(self.running.get() + 1);
            self.max_running.set(self.max_running.get().max(self.running.get()));
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            self.running.set(self.running.get() - 1);
            self.finished.set(self.finished.get() + 1);
        }
    }

    #[tokio::test]
    async fn test_empty_sealed_queue_completes_immediately() {
        let executor = BoundedExecutor::<usize>::sealed(Vec::new(), limit(4));
        let stats = executor.execute(|_| async {}).await;
        assert_eq!(stats, ExecutionStats::default());
    }

    #[tokio::test]
    async fn test_runs_every_item_once_within_limit() {
        for ceiling in [1, 2, 3, 7, 50] {
            let tracker = Tracker::default();
            let executor = BoundedExecutor::sealed(0..25, limit(ceiling));

            let stats = executor.execute(|item| tracker.run(item, item % 4)).await;

            assert_eq!(stats.completed, 25);
            assert_eq!(tracker.finished.get(), 25);
            assert!(tracker.max_running.get() <= ceiling);
            assert_eq!(stats.peak_in_flight, ceiling.min(25));
            let mut started = tracker.started.borrow().clone();
            started.sort();
            assert_eq!(started, (0..25).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_dispatch_is_fifo() {
        let tracker = Tracker::default();
        let executor = BoundedExecutor::sealed(0..10, limit(3));

        executor.execute(|item| tracker.run(item, 10 - item)).await;

        assert_eq!(*tracker.started.borrow(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_completion_waits_for_seal_and_pushed_items() {
        let tracker = Rc::new(Tracker::default());
        let done = Cell::new(false);
        let (executor, queue) = BoundedExecutor::new(vec![0, 1], limit(2));

        let run = async {
            let worker_tracker = tracker.clone();
            let stats = executor
                .execute(move |item| {
                    let tracker = worker_tracker.clone();
                    async move { tracker.run(item, 2).await }
                })
                .await;
            done.set(true);
            stats
        };

        let feed = async {
            for item in 2..6 {
                queue.push(item).unwrap();
                tokio::task::yield_now().await;
            }
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
            assert!(!done.get(), "completed before the queue was sealed");
            queue.seal();
        };

        let (stats, ()) = tokio::join!(run, feed);
        assert!(done.get());
        assert_eq!(stats.completed, 6);
        assert_eq!(tracker.finished.get(), 6);
        assert!(tracker.max_running.get() <= 2);
    }

    #[tokio::test]
    async fn test_push_after_seal_is_rejected() {
        let (executor, queue) = BoundedExecutor::new(vec![1usize], limit(1));
        queue.push(2).unwrap();
        queue.seal();

        assert!(queue.is_sealed());
        assert!(matches!(queue.push(3), Err(Error::QueueSealed)));

        let seen = RefCell::new(Vec::new());
        let stats = executor
            .execute(|item| {
                seen.borrow_mut().push(item);
                async {}
            })
            .await;
        assert_eq!(stats.completed, 2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_dropping_handles_seals_queue() {
        let (executor, queue) = BoundedExecutor::new(Vec::<usize>::new(), limit(3));
        let other = queue.clone();
        other.push(7).unwrap();
        drop(queue);
        drop(other);

        let stats = executor.execute(|_| async {}).await;
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_default_concurrency() {
        assert_eq!(DEFAULT_CONCURRENCY.get(), 20);
    }

    #[test]
    fn test_concurrency_limit() {
        assert_eq!(concurrency_limit(None).unwrap(), DEFAULT_CONCURRENCY);
        assert_eq!(concurrency_limit(Some(3)).unwrap().get(), 3);
        assert!(matches!(concurrency_limit(Some(0)), Err(Error::Config(_))));
    }
}
