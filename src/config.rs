//! Worker tuning knobs and the retry backoff table.

use crate::error::ConfigError;
use std::time::Duration;

/// Delays applied to transient failures, indexed by the message's attempt counter.
pub const DEFAULT_RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(25),
    Duration::from_secs(125),
];

/// Immutable lookup table of reschedule delays.
///
/// Attempts past the end of the table reuse the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(backoff: Vec<Duration>) -> Result<Self, ConfigError> {
        if backoff.is_empty() {
            return Err(ConfigError::EmptyBackoff);
        }
        Ok(Self { backoff })
    }

    pub fn from_secs(backoff: &[u64]) -> Result<Self, ConfigError> {
        Self::new(backoff.iter().copied().map(Duration::from_secs).collect())
    }

    /// `backoff[min(attempt, len - 1)]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let last = self.backoff.len().saturating_sub(1);
        let index = usize::try_from(attempt).map_or(last, |a| a.min(last));
        self.backoff.get(index).copied().unwrap_or_default()
    }

    pub fn backoff(&self) -> &[Duration] {
        &self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RETRY_BACKOFF.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause after `next` reports an empty queue.
    pub idle_poll_interval: Duration,
    /// Pause after a loop-level failure before any message could be classified.
    pub fault_pause: Duration,
    /// Lower bound for the lease renewal period.
    pub min_renewal_interval: Duration,
    /// Upper bound on any single ledger call.
    pub store_timeout: Duration,
    /// Attempts at acknowledging a message whose transaction already committed.
    pub ack_attempts: u32,
    pub ack_retry_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval: Duration::from_secs(10),
            fault_pause: Duration::from_secs(2),
            min_renewal_interval: Duration::from_secs(5),
            store_timeout: Duration::from_secs(30),
            ack_attempts: 3,
            ack_retry_delay: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("idle_poll_interval", self.idle_poll_interval),
            ("fault_pause", self.fault_pause),
            ("min_renewal_interval", self.min_renewal_interval),
            ("store_timeout", self.store_timeout),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroDuration(*name));
        }
        if self.ack_attempts == 0 {
            return Err(ConfigError::ZeroAckAttempts);
        }
        Ok(())
    }
}
