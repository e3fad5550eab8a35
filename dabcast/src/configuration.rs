use crate::membership::Mode;
use crate::Error::Configuration;
use std::time::Duration;

/// How many of its own messages a process may have broadcast without delivering them yet.
///
/// Broadcasting stalls while the number of messages in flight is above the limit. The limits are
/// empirical, they only bound the retransmission state and have no role in correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Never stall.
    Unbounded,

    /// Stall above a fixed number of messages in flight.
    Fixed(u64),

    /// Stall above `per_thread` messages for each hardware thread, up to `max_threads` threads.
    PerThread { per_thread: u64, max_threads: usize },
}

impl BackpressurePolicy {
    /// The default policy for each broadcast mode.
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Fifo => BackpressurePolicy::Fixed(17_500),
            Mode::Lcb => BackpressurePolicy::PerThread {
                per_thread: 1_500,
                max_threads: 6,
            },
        }
    }

    /// The largest number of messages in flight before stalling, `None` if unbounded.
    pub fn limit(&self) -> Option<u64> {
        match *self {
            BackpressurePolicy::Unbounded => None,
            BackpressurePolicy::Fixed(limit) => Some(limit),
            BackpressurePolicy::PerThread {
                per_thread,
                max_threads,
            } => {
                let threads = crate::executor::default_workers().min(max_threads);
                Some(per_thread.saturating_mul(threads as u64))
            }
        }
    }
}

/// The tunables of a single process stack.
#[derive(Debug, Clone)]
pub struct StackConfiguration {
    // Interval between two transmissions of the same unacknowledged message.
    pub(crate) retransmit_interval: Duration,

    // Number of workers in both the executor and the scheduler.
    pub(crate) workers: usize,

    // When absent the default for the broadcast mode is used.
    pub(crate) backpressure: Option<BackpressurePolicy>,

    // Seed for the dependency watch selection, entropy when absent.
    pub(crate) seed: Option<u64>,

    // How long the datagram receiver waits before checking for the shutdown.
    pub(crate) receive_timeout: Duration,
}

/// Convenience structure to help building a [`StackConfiguration`].
#[derive(Default)]
pub struct ConfigurationBuilder {
    // Optional, defaults to 1 millisecond.
    retransmit_interval: Option<Duration>,

    // Optional, defaults to the available parallelism.
    workers: Option<usize>,

    // Optional, defaults to the policy of the broadcast mode.
    backpressure: Option<BackpressurePolicy>,

    seed: Option<u64>,

    // Optional, defaults to 100 milliseconds.
    receive_timeout: Option<Duration>,
}

impl StackConfiguration {
    /// Create the convenience builder for the configuration.
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn retransmit_interval(&self) -> Duration {
        self.retransmit_interval
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// The backpressure policy in use for the given mode.
    pub fn backpressure(&self, mode: Mode) -> BackpressurePolicy {
        self.backpressure
            .unwrap_or_else(|| BackpressurePolicy::for_mode(mode))
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }
}

impl Default for StackConfiguration {
    fn default() -> Self {
        StackConfiguration {
            retransmit_interval: Duration::from_millis(1),
            workers: crate::executor::default_workers(),
            backpressure: None,
            seed: None,
            receive_timeout: Duration::from_millis(100),
        }
    }
}

impl ConfigurationBuilder {
    /// Sets the interval between retransmissions of an unacknowledged message.
    pub fn with_retransmit_interval(mut self, interval: Duration) -> Self {
        self.retransmit_interval = Some(interval);
        self
    }

    /// Sets the number of workers of each pool.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Overrides the backpressure policy of the broadcast mode.
    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = Some(policy);
        self
    }

    /// Sets the seed used to pick which dependency a blocked causal message watches.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets how long a single receive waits before checking for the shutdown.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Build the [`StackConfiguration`].
    ///
    /// Properties not provided use their default value.
    ///
    /// # Errors
    ///
    /// This will return an error if there are no workers or if any of the intervals is zero, both
    /// would leave the stack spinning without doing any work.
    pub fn build(self) -> crate::Result<StackConfiguration> {
        let defaults = StackConfiguration::default();

        let workers = self.workers.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(Configuration(String::from("At least one worker is needed")));
        }

        let retransmit_interval = self
            .retransmit_interval
            .unwrap_or(defaults.retransmit_interval);
        if retransmit_interval.is_zero() {
            return Err(Configuration(String::from(
                "Retransmit interval must not be zero",
            )));
        }

        let receive_timeout = self.receive_timeout.unwrap_or(defaults.receive_timeout);
        if receive_timeout.is_zero() {
            return Err(Configuration(String::from(
                "Receive timeout must not be zero",
            )));
        }

        Ok(StackConfiguration {
            retransmit_interval,
            workers,
            backpressure: self.backpressure,
            seed: self.seed,
            receive_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::configuration::{BackpressurePolicy, StackConfiguration};
    use crate::membership::Mode;
    use std::time::Duration;

    #[test]
    fn should_build_with_defaults() {
        let configuration = StackConfiguration::builder().build();
        assert!(configuration.is_ok());

        let configuration = configuration.unwrap();
        assert_eq!(configuration.retransmit_interval(), Duration::from_millis(1));
        assert_eq!(configuration.receive_timeout(), Duration::from_millis(100));
        assert!(configuration.workers() > 0);
        assert!(configuration.seed().is_none());
        assert_eq!(
            configuration.backpressure(Mode::Fifo),
            BackpressurePolicy::Fixed(17_500)
        );
    }

    #[test]
    fn should_override_backpressure() {
        let configuration = StackConfiguration::builder()
            .with_backpressure(BackpressurePolicy::Unbounded)
            .with_seed(42)
            .with_workers(2)
            .build()
            .unwrap();

        assert_eq!(
            configuration.backpressure(Mode::Lcb),
            BackpressurePolicy::Unbounded
        );
        assert_eq!(configuration.seed(), Some(42));
        assert_eq!(configuration.workers(), 2);
    }

    #[test]
    fn should_reject_invalid_values() {
        let no_workers = StackConfiguration::builder().with_workers(0).build();
        assert!(no_workers.is_err());

        let no_interval = StackConfiguration::builder()
            .with_retransmit_interval(Duration::ZERO)
            .build();
        assert!(no_interval.is_err());

        let no_timeout = StackConfiguration::builder()
            .with_receive_timeout(Duration::ZERO)
            .build();
        assert!(no_timeout.is_err());
    }

    #[test]
    fn per_thread_limit_should_be_capped() {
        let policy = BackpressurePolicy::PerThread {
            per_thread: 1_500,
            max_threads: 6,
        };
        let limit = policy.limit().unwrap();

        assert!(limit >= 1_500);
        assert!(limit <= 9_000);
        assert_eq!(limit % 1_500, 0);
        assert!(BackpressurePolicy::Unbounded.limit().is_none());
        assert_eq!(BackpressurePolicy::Fixed(3).limit(), Some(3));
    }
}
