// src/ingest/options.rs
use std::time::Duration;

pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_COLLECTOR_CAPACITY: usize = 100;

/// How long to wait before re-fetching a provider whose last fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same delay after every failure.
    Fixed(Duration),
    /// Doubles per consecutive failure, starting at `initial`, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl RetryPolicy {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed(d) => d,
            RetryPolicy::Exponential { initial, max } => {
                let shift = failures.saturating_sub(1).min(31);
                initial.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed(DEFAULT_RETRY_DELAY)
    }
}

/// Tuning knobs for [`crate::ingest::Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub query_interval: Duration,
    pub retry: RetryPolicy,
    pub save_timeout: Duration,
    pub collector_capacity: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            query_interval: DEFAULT_QUERY_INTERVAL,
            retry: RetryPolicy::default(),
            save_timeout: DEFAULT_SAVE_TIMEOUT,
            collector_capacity: DEFAULT_COLLECTOR_CAPACITY,
        }
    }
}

impl OrchestratorOptions {
    /// Poll period of the due-job check. Bounds dispatch latency, so only
    /// widen it when every provider runs far less often than once a second.
    /// Zero falls back to the default.
    pub fn with_query_interval(mut self, interval: Duration) -> Self {
        self.query_interval = if interval.is_zero() {
            DEFAULT_QUERY_INTERVAL
        } else {
            interval
        };
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Timeout applied to each individual rate save.
    pub fn with_save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout = timeout;
        self
    }

    /// Zero falls back to the default.
    pub fn with_collector_capacity(mut self, capacity: usize) -> Self {
        self.collector_capacity = if capacity == 0 {
            DEFAULT_COLLECTOR_CAPACITY
        } else {
            capacity
        };
        self
    }
}
