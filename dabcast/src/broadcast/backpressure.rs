use crate::configuration::BackpressurePolicy;
use mepa::Shutdown;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Re-check interval while stalled, in case a release happens between the check and the wait.
const RECHECK: Duration = Duration::from_millis(1);

/// Admission control for the local broadcasts.
///
/// Counts the messages broadcast locally against the local messages already delivered back to
/// the local process. A broadcast waits while the difference is above the limit.
pub(crate) struct Backpressure {
    limit: Option<u64>,
    broadcast: AtomicU64,
    delivered: AtomicU64,
    released: Notify,
}

impl Backpressure {
    pub(crate) fn new(policy: BackpressurePolicy) -> Self {
        Backpressure {
            limit: policy.limit(),
            broadcast: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            released: Notify::new(),
        }
    }

    pub(crate) fn in_flight(&self) -> u64 {
        self.broadcast
            .load(Ordering::Acquire)
            .saturating_sub(self.delivered.load(Ordering::Acquire))
    }

    fn is_open(&self) -> bool {
        self.limit.map_or(true, |limit| self.in_flight() <= limit)
    }

    /// Wait until one more broadcast is admitted, and count it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Stopped`] if the shutdown is received while waiting.
    pub(crate) async fn admit(&self, shutdown: &Shutdown) -> crate::Result<()> {
        loop {
            if shutdown.is_shut() {
                return Err(crate::Error::Stopped);
            }

            if self.is_open() {
                self.broadcast.fetch_add(1, Ordering::AcqRel);
                return Ok(());
            }

            tokio::select! {
                _ = self.released.notified() => {}
                _ = tokio::time::sleep(RECHECK) => {}
            }
        }
    }

    /// Count a local message delivered back to the local process.
    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::AcqRel);
        self.released.notify_waiters();
    }
}
