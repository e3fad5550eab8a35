use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A FIFO queue shared between producers and the workers draining it.
///
/// After [`ThreadSafeQueue::close`] the queue rejects new elements, the elements already queued
/// are still handed out so the workers can drain them.
pub(crate) struct ThreadSafeQueue<T> {
    alive: AtomicBool,
    queue: Mutex<VecDeque<T>>,
    available: Notify,
}

/// A min-heap shared between producers and the workers draining it.
///
/// The smallest element is always handed out first. Stopping the heap discards everything that
/// is still pending.
pub(crate) struct ThreadSafeMinHeap<T> {
    alive: AtomicBool,
    heap: Mutex<BinaryHeap<Reverse<T>>>,
    available: Notify,
}

impl<T> ThreadSafeQueue<T> {
    pub(crate) fn new() -> Self {
        ThreadSafeQueue {
            alive: AtomicBool::new(true),
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    /// Append the value and wake one waiting worker.
    ///
    /// Returns `false` and drops the value if the queue was closed.
    pub(crate) fn enqueue(&self, value: T) -> bool {
        {
            // Checked under the lock, nothing lands in the queue once close returns.
            let mut queue = self.queue.lock();
            if !self.alive.load(Ordering::Acquire) {
                return false;
            }
            queue.push_back(value);
        }
        self.available.notify_one();
        true
    }

    pub(crate) fn dequeue(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    /// Wait until something is enqueued.
    ///
    /// A notification sent while nobody was waiting is kept, so a worker that checked the queue
    /// right before a push still wakes up.
    pub(crate) async fn wait(&self) {
        self.available.notified().await
    }

    pub(crate) fn close(&self) {
        let _queue = self.queue.lock();
        self.alive.store(false, Ordering::Release);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl<T: Ord> ThreadSafeMinHeap<T> {
    pub(crate) fn new() -> Self {
        ThreadSafeMinHeap {
            alive: AtomicBool::new(true),
            heap: Mutex::new(BinaryHeap::new()),
            available: Notify::new(),
        }
    }

    /// Insert the value and wake one waiting worker.
    ///
    /// Returns `false` and drops the value if the heap was stopped.
    pub(crate) fn enqueue(&self, value: T) -> bool {
        if !self.requeue(value) {
            return false;
        }
        self.available.notify_one();
        true
    }

    /// Insert the value back without waking anyone.
    ///
    /// Used by a worker returning an element it is not ready to handle yet, waking another worker
    /// for that same element would only spin.
    pub(crate) fn requeue(&self, value: T) -> bool {
        let mut heap = self.heap.lock();
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        heap.push(Reverse(value));
        true
    }

    pub(crate) fn dequeue(&self) -> Option<T> {
        if !self.alive.load(Ordering::Acquire) {
            return None;
        }
        self.heap.lock().pop().map(|Reverse(value)| value)
    }

    pub(crate) async fn wait(&self) {
        self.available.notified().await
    }

    /// Stop accepting values and discard the pending ones.
    pub(crate) fn stop(&self) {
        let pending = {
            let mut heap = self.heap.lock();
            self.alive.store(false, Ordering::Release);
            std::mem::take(&mut *heap)
        };
        // Dropped outside the lock, the values can hold anything.
        drop(pending);
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use crate::executor::queue::{ThreadSafeMinHeap, ThreadSafeQueue};
    use std::sync::{Arc, Barrier};

    #[test]
    fn queue_should_keep_insertion_order() {
        let queue = ThreadSafeQueue::new();
        for i in 0..5 {
            assert!(queue.enqueue(i));
        }

        let drained: Vec<i32> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn closed_queue_should_still_drain() {
        let queue = ThreadSafeQueue::new();
        assert!(queue.enqueue(1));
        queue.close();

        assert!(!queue.enqueue(2));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn heap_should_hand_smallest_first() {
        let heap = ThreadSafeMinHeap::new();
        for i in [5, 1, 4, 2, 3] {
            assert!(heap.enqueue(i));
        }
        assert!(heap.requeue(0));

        let drained: Vec<i32> = std::iter::from_fn(|| heap.dequeue()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn stopped_heap_should_discard() {
        let heap = ThreadSafeMinHeap::new();
        assert!(heap.enqueue(1));
        heap.stop();

        assert_eq!(heap.len(), 0);
        assert!(!heap.enqueue(2));
        assert!(heap.dequeue().is_none());
    }

    #[test]
    fn nothing_should_land_after_close() {
        let queue = Arc::new(ThreadSafeQueue::new());
        let barrier = Arc::new(Barrier::new(5));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    (0..10_000).filter(|&i| queue.enqueue(i)).count()
                })
            })
            .collect();

        barrier.wait();
        queue.close();
        let closed_with = queue.len();

        let accepted: usize = producers.into_iter().map(|p| p.join().unwrap()).sum();
        assert_eq!(queue.len(), closed_with);
        assert_eq!(accepted, closed_with);
    }

    #[test]
    fn nothing_should_survive_stop() {
        let heap = Arc::new(ThreadSafeMinHeap::new());
        let barrier = Arc::new(Barrier::new(5));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let heap = Arc::clone(&heap);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for i in 0..10_000 {
                        heap.enqueue(i);
                    }
                })
            })
            .collect();

        barrier.wait();
        heap.stop();
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(heap.len(), 0);
    }

    #[tokio::test]
    async fn notification_before_wait_should_not_be_lost() {
        let queue = ThreadSafeQueue::new();
        assert!(queue.enqueue(1));

        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(1), queue.wait()).await;
        assert!(waited.is_ok());
    }
}
