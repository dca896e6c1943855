//! Client-side retry with exponential backoff for engine requests.
//!
//! Only transient errors (see [`SearchError::is_transient`]) are retried.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use tracing::{debug, error, warn};

use crate::error::SearchError;

/// Retry limits for one logical request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub initial_interval: Duration,
    /// Give up once this much time has passed since the first attempt
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(200),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = elapsed;
        self
    }
}

/// Run `op`, retrying transient failures until the policy is exhausted.
pub fn with_backoff<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, SearchError>
where
    F: FnMut() -> Result<T, SearchError>,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_elapsed_time(Some(policy.max_elapsed))
        .build();

    let mut attempts = 0;

    loop {
        attempts += 1;
        debug!(attempt = attempts, what, "Calling search engine");

        match op() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempts >= policy.max_attempts {
                    error!(error = %e, what, attempts, "Max retries exceeded");
                    return Err(e);
                }

                match backoff.next_backoff() {
                    Some(duration) => {
                        warn!(
                            error = %e,
                            what,
                            retry_in_ms = duration.as_millis() as u64,
                            "Engine request failed, retrying"
                        );
                        std::thread::sleep(duration);
                    }
                    None => {
                        error!(error = %e, what, "Backoff exhausted");
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_initial_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = with_backoff(&fast(3), "bulk", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SearchError::EngineUnavailable("down".into()))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_backoff(&fast(2), "bulk", || {
            calls.set(calls.get() + 1);
            Err(SearchError::EngineUnavailable("down".into()))
        });

        assert!(matches!(result, Err(SearchError::EngineUnavailable(_))));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_backoff(&fast(5), "bulk", || {
            calls.set(calls.get() + 1);
            Err(SearchError::IndexNotFound("docs_x".into()))
        });

        assert!(matches!(result, Err(SearchError::IndexNotFound(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_none_policy_is_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts, 1);
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }
}
