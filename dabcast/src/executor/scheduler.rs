use crate::executor::queue::ThreadSafeMinHeap;
use crate::executor::{Job, TaskHandle, Workers};
use mepa::Shutdown;
use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A fixed-size pool of workers that runs each job no earlier than its due time.
///
/// The pending jobs are kept in a min-heap ordered by due time. A worker that pops a job that is
/// not due yet puts it back and sleeps until the due time or until a new job arrives, whichever
/// comes first, so a far away job never delays one that is due sooner. This gives "executed no
/// earlier than the deadline", not "executed at the deadline".
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    heap: ThreadSafeMinHeap<Task>,
    workers: Workers,
    // Breaks ties between jobs with the same due time, keeping insertion order.
    sequence: AtomicU64,
}

struct Task {
    due: Instant,
    sequence: u64,
    job: Job,
}

impl Scheduler {
    /// Spawn the given number of workers.
    ///
    /// This must be called from within a Tokio runtime, the workers are Tokio tasks.
    pub fn new(workers: usize) -> Self {
        let inner = Arc::new(Inner {
            heap: ThreadSafeMinHeap::new(),
            workers: Workers::new(),
            sequence: AtomicU64::new(0),
        });
        inner
            .workers
            .spawn(workers, |id, shutdown| work(id, Arc::clone(&inner), shutdown));
        Scheduler { inner }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.workers.is_alive()
    }

    /// Add the function to be executed as soon as possible.
    pub fn add<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.schedule(Duration::ZERO, f)
    }

    /// Add the function to be executed once the interval elapses.
    ///
    /// Once the scheduler is stopped the function is dropped without running.
    pub fn schedule<F, T>(&self, interval: Duration, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = Task {
            due: Instant::now() + interval,
            sequence: self.inner.sequence.fetch_add(1, atomic::Ordering::Relaxed),
            job: Box::new(move || {
                let _ = tx.send(f());
            }),
        };

        if !self.inner.heap.enqueue(task) {
            tracing::trace!("scheduler stopped, job dropped");
        }
        rx
    }

    /// The number of jobs waiting for their due time or for a worker.
    pub fn pending(&self) -> usize {
        self.inner.heap.len()
    }

    /// Discard every pending job and wait for the workers to finish the running ones.
    ///
    /// Pending jobs are mostly retransmissions, which would otherwise reschedule themselves
    /// forever. Calling it more than once is harmless.
    pub async fn stop(&self) {
        self.inner.heap.stop();
        self.inner.workers.stop("scheduler").await;
    }
}

async fn work(id: usize, inner: Arc<Inner>, mut shutdown: Shutdown) {
    tracing::trace!(worker = id, "scheduler worker started");
    while !shutdown.is_shut() {
        match inner.heap.dequeue() {
            Some(task) if task.due <= Instant::now() => (task.job)(),
            Some(task) => {
                let due = task.due;
                // If this fails the heap was stopped and the task is discarded with it.
                inner.heap.requeue(task);
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = inner.heap.wait() => {}
                    _ = shutdown.wait_shutdown() => {}
                }
            }
            None => {
                tokio::select! {
                    _ = inner.heap.wait() => {}
                    _ = shutdown.wait_shutdown() => {}
                }
            }
        }
    }
    tracing::trace!(worker = id, "scheduler worker stopped");
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    /// Tasks are ordered by the due time, ties broken by the insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

#[cfg(test)]
mod tests {
    use crate::executor::Scheduler;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test]
    async fn should_not_run_before_due() {
        let scheduler = Scheduler::new(2);
        let start = Instant::now();

        let handle = scheduler.schedule(Duration::from_millis(50), Instant::now);
        let ran_at = tokio::time::timeout(Duration::from_secs(5), handle).await;

        assert!(ran_at.is_ok());
        let ran_at = ran_at.unwrap().unwrap();
        assert!(ran_at.duration_since(start) >= Duration::from_millis(50));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn due_job_should_not_wait_for_later_one() {
        let scheduler = Scheduler::new(1);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let late = {
            let order = Arc::clone(&order);
            scheduler.schedule(Duration::from_millis(200), move || order.lock().push("late"))
        };
        let soon = {
            let order = Arc::clone(&order);
            scheduler.schedule(Duration::from_millis(10), move || order.lock().push("soon"))
        };
        let now = {
            let order = Arc::clone(&order);
            scheduler.add(move || order.lock().push("now"))
        };

        assert!(tokio::time::timeout(Duration::from_secs(5), now).await.is_ok());
        assert!(tokio::time::timeout(Duration::from_secs(5), soon).await.is_ok());
        assert!(tokio::time::timeout(Duration::from_secs(5), late).await.is_ok());
        assert_eq!(*order.lock(), vec!["now", "soon", "late"]);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_should_discard_pending() {
        let scheduler = Scheduler::new(1);
        let handle = scheduler.schedule(Duration::from_secs(3600), || 1);
        assert_eq!(scheduler.pending(), 1);

        scheduler.stop().await;

        assert!(!scheduler.is_alive());
        assert_eq!(scheduler.pending(), 0);
        assert!(handle.await.is_err());
    }
}
