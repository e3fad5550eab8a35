//! The worker pools executing the stack.
//!
//! There is no event loop, any worker can run any layer's delivery or retransmission job at any
//! time. Two pools exist:
//!
//! * [`Executor`]: runs jobs as soon as possible, in FIFO order. Used for inbound deliveries.
//! * [`Scheduler`]: runs jobs no earlier than their due time. Used for retransmissions.
//!
//! Jobs are plain closures, they never await. Stopping a pool is the only blocking operation of
//! the whole stack and must be called from the controlling task, never from inside a job,
//! otherwise the pool would wait for itself.
use crate::executor::queue::ThreadSafeQueue;
use mepa::{Shutdown, Signal};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

mod queue;
mod scheduler;

pub use scheduler::Scheduler;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Receives the value returned by a job.
///
/// Awaiting it fails only if the job was dropped without running, which happens if the pool was
/// stopped before the job had a chance to execute.
pub type TaskHandle<T> = oneshot::Receiver<T>;

/// The number of workers when nothing is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// The worker tasks of a pool and the signal stopping them.
pub(crate) struct Workers {
    signal: Signal,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Workers {
    pub(crate) fn new() -> Self {
        Workers {
            signal: Signal::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `count` Tokio tasks, each running the future `work` builds for its index.
    pub(crate) fn spawn<W, F>(&self, count: usize, work: W)
    where
        W: Fn(usize, Shutdown) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock();
        handles.extend((0..count).map(|id| tokio::spawn(work(id, self.signal.subscribe()))));
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.signal.is_fired()
    }

    /// Fire the signal and wait for every worker to finish.
    pub(crate) async fn stop(&self, pool: &str) {
        self.signal.fire();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(pool = pool, error = %e, "worker finished abnormally");
            }
        }
    }
}

/// A fixed-size pool of workers draining a FIFO queue.
///
/// The structure is cheap to clone, every clone feeds the same workers.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    queue: ThreadSafeQueue<Job>,
    workers: Workers,
}

impl Executor {
    /// Spawn the given number of workers.
    ///
    /// This must be called from within a Tokio runtime, the workers are Tokio tasks.
    pub fn new(workers: usize) -> Self {
        let inner = Arc::new(Inner {
            queue: ThreadSafeQueue::new(),
            workers: Workers::new(),
        });
        inner
            .workers
            .spawn(workers, |id, shutdown| work(id, Arc::clone(&inner), shutdown));
        Executor { inner }
    }

    /// Verify if the pool still accepts jobs.
    pub fn is_alive(&self) -> bool {
        self.inner.workers.is_alive()
    }

    /// Add the function to be executed as soon as possible.
    ///
    /// Once the pool is stopped the function is dropped without running.
    pub fn add<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(f());
        });

        if !self.inner.queue.enqueue(job) {
            tracing::trace!("executor stopped, job dropped");
        }
        rx
    }

    /// The number of jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Stop accepting jobs, drain the ones already queued and wait for every worker.
    ///
    /// Calling it more than once is harmless.
    pub async fn stop(&self) {
        self.inner.queue.close();
        self.inner.workers.stop("executor").await;
    }
}

async fn work(id: usize, inner: Arc<Inner>, mut shutdown: Shutdown) {
    tracing::trace!(worker = id, "executor worker started");
    loop {
        // The queue is closed before the signal fires, once the signal is seen a single drain
        // leaves nothing behind.
        let stopping = shutdown.is_shut();
        while let Some(job) = inner.queue.dequeue() {
            job();
        }
        if stopping {
            break;
        }

        tokio::select! {
            _ = inner.queue.wait() => {}
            _ = shutdown.wait_shutdown() => {}
        }
    }
    tracing::trace!(worker = id, "executor worker stopped");
}

#[cfg(test)]
mod tests {
    use crate::executor::{Executor, Workers};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn should_execute_and_return_value() {
        let executor = Executor::new(2);

        let handle = executor.add(|| 21 * 2);
        let value = tokio::time::timeout(Duration::from_secs(5), handle).await;

        assert!(value.is_ok());
        assert_eq!(value.unwrap().unwrap(), 42);
        executor.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_execute_every_job() {
        let executor = Executor::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let counter = Arc::clone(&counter);
                executor.add(move || counter.fetch_add(1, Ordering::SeqCst))
            })
            .collect();

        for handle in handles {
            assert!(handle.await.is_ok());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        executor.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_should_run_every_accepted_job() {
        for _ in 0..50 {
            let executor = Executor::new(2);
            let counter = Arc::new(AtomicUsize::new(0));

            let producer = {
                let executor = executor.clone();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let mut handles = Vec::new();
                    while executor.is_alive() {
                        let counter = Arc::clone(&counter);
                        handles.push(executor.add(move || counter.fetch_add(1, Ordering::SeqCst)));
                        tokio::task::yield_now().await;
                    }
                    handles
                })
            };

            tokio::time::sleep(Duration::from_millis(2)).await;
            executor.stop().await;

            let handles = producer.await.unwrap();
            assert_eq!(executor.pending(), 0);

            // A job either ran or was rejected, its handle tells which without waiting.
            let mut ran = 0;
            for handle in handles {
                let resolved = tokio::time::timeout(Duration::from_secs(5), handle).await;
                assert!(resolved.is_ok());
                if resolved.unwrap().is_ok() {
                    ran += 1;
                }
            }
            assert_eq!(counter.load(Ordering::SeqCst), ran);
        }
    }

    #[tokio::test]
    async fn workers_should_stop_on_signal() {
        let workers = Workers::new();
        let finished = Arc::new(AtomicUsize::new(0));
        workers.spawn(3, |_, mut shutdown| {
            let finished = Arc::clone(&finished);
            async move {
                shutdown.wait_shutdown().await;
                finished.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(workers.is_alive());

        let stopped = tokio::time::timeout(Duration::from_secs(5), workers.stop("test")).await;
        assert!(stopped.is_ok());
        assert!(!workers.is_alive());
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn should_reject_after_stop() {
        let executor = Executor::new(1);
        assert!(executor.is_alive());

        executor.stop().await;
        assert!(!executor.is_alive());

        let handle = executor.add(|| 1);
        assert!(handle.await.is_err());

        // Stopping twice must not hang.
        executor.stop().await;
    }
}
