use crate::config::CrawlerConfig;
use crate::fetch::FetchError;
use std::time::Duration;

/// Decision returned by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up; the task fails with the last error
    NoRetry,
    /// Fetch again after the given delay
    RetryAfter(Duration),
}

/// Bounded exponential backoff for transient fetch failures
///
/// Timeouts, connection errors, rendered pages that never became ready and
/// the configured HTTP statuses are transient. Everything else (other
/// statuses, robots denials, malformed requests) fails the task at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub retryable_statuses: Vec<u16>,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CrawlerConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_retries: config.retry_times,
            retryable_statuses: config.retry_http_codes.clone(),
            base_backoff: Duration::from_millis(config.retry_backoff),
            max_backoff: Duration::from_millis(config.retry_backoff_max),
        }
    }

    /// Whether the error is worth another attempt at all
    pub fn is_transient(&self, error: &FetchError) -> bool {
        match error {
            FetchError::Timeout(_) | FetchError::Connection(_) | FetchError::NotReady { .. } => true,
            FetchError::Status(code) => self.retryable_statuses.contains(code),
            FetchError::RobotsDenied | FetchError::Request(_) => false,
        }
    }

    /// Decides what to do after a failed attempt
    ///
    /// `retry_count` is the number of retries already spent (0 after the first
    /// attempt). The delay is `base * 2^retry_count`, capped at `max_backoff`.
    pub fn decide(&self, retry_count: u32, error: &FetchError) -> RetryDecision {
        if retry_count >= self.max_retries || !self.is_transient(error) {
            return RetryDecision::NoRetry;
        }

        let factor = 1u32 << retry_count.min(16);
        let delay = self.base_backoff.saturating_mul(factor).min(self.max_backoff);
        RetryDecision::RetryAfter(delay)
    }
}
