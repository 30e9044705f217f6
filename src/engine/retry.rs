//! Bounded retry around a fallible async operation

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::RunnerError;

/// Attempt and failure counters for one handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub attempts: u32,
    pub failures: u32,
}

/// Retry configuration and counters for a single operation. Not shared.
#[derive(Debug, Clone)]
pub struct RetryHandler {
    max_retries: u32,
    backoff: Duration,
    stats: Stats,
}

impl RetryHandler {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            stats: Stats::default(),
        }
    }

    /// Run `operation` until it succeeds, fails terminally, or retries run out.
    ///
    /// With `max_retries == 0` the operation runs once and its error is returned
    /// as is. Otherwise an exhausted budget is reported as
    /// [`RunnerError::RetriesExhausted`] wrapping the last error.
    pub async fn execute<F, Fut>(&mut self, mut operation: F) -> Result<(), RunnerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RunnerError>>,
    {
        let mut last_err = None;

        while self.stats.attempts <= self.max_retries {
            self.stats.attempts += 1;

            let err = match operation().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            self.stats.failures += 1;

            if !err.is_retryable() {
                return Err(err);
            }
            if !self.retryable() {
                last_err = Some(err);
                break;
            }

            debug!(
                attempt = self.stats.attempts,
                max_retries = self.max_retries,
                error = %err,
                "retrying after failure"
            );
            last_err = Some(err);

            if !self.backoff.is_zero() {
                tokio::time::sleep(self.backoff).await;
            }
        }

        let Some(err) = last_err else {
            return Err(RunnerError::Execution(
                "retry budget already spent, reset the handler before reuse".to_string(),
            ));
        };

        if self.max_retries == 0 {
            Err(err)
        } else {
            Err(RunnerError::RetriesExhausted {
                attempts: self.stats.attempts,
                source: Box::new(err),
            })
        }
    }

    /// Whether another attempt is allowed.
    pub fn retryable(&self) -> bool {
        self.stats.attempts <= self.max_retries
    }

    pub fn reset(&mut self) {
        self.stats = Stats::default();
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn failure() -> RunnerError {
        RunnerError::Execution("exit status 1".to_string())
    }

    #[tokio::test]
    async fn test_always_failing_runs_max_retries_plus_one() {
        for max_retries in 0..4 {
            let mut handler = RetryHandler::new(max_retries, Duration::ZERO);
            let mut calls = 0;
            let result = handler
                .execute(|| {
                    calls += 1;
                    async { Err(failure()) }
                })
                .await;

            assert!(result.is_err());
            assert_eq!(calls, max_retries + 1);
            assert_eq!(handler.stats().attempts, max_retries + 1);
            assert_eq!(handler.stats().failures, max_retries + 1);
        }
    }

    #[tokio::test]
    async fn test_success_stops_retrying() {
        for succeed_on in 1..=3u32 {
            let mut handler = RetryHandler::new(5, Duration::ZERO);
            let mut calls = 0;
            let result = handler
                .execute(|| {
                    calls += 1;
                    let current = calls;
                    async move {
                        if current < succeed_on {
                            Err(failure())
                        } else {
                            Ok(())
                        }
                    }
                })
                .await;

            assert!(result.is_ok());
            assert_eq!(calls, succeed_on);
            assert_eq!(handler.stats().failures, succeed_on - 1);
        }
    }

    #[tokio::test]
    async fn test_error_wrapping() {
        let mut handler = RetryHandler::new(0, Duration::ZERO);
        let err = handler.execute(|| async { Err(failure()) }).await.unwrap_err();
        assert_eq!(err.to_string(), "exit status 1");

        let mut handler = RetryHandler::new(2, Duration::ZERO);
        let err = handler.execute(|| async { Err(failure()) }).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "execution failed after 3 attempts. Last error: exit status 1"
        );
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let mut handler = RetryHandler::new(3, Duration::ZERO);
        let mut calls = 0;
        let err = handler
            .execute(|| {
                calls += 1;
                async { Err(RunnerError::NotFound("exec ws/missing".to_string())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, RunnerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_backoff_between_attempts() {
        let mut handler = RetryHandler::new(2, Duration::from_millis(20));
        let start = Instant::now();
        let _ = handler.execute(|| async { Err(failure()) }).await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_retryable_and_reset() {
        let mut handler = RetryHandler::new(1, Duration::ZERO);
        assert!(handler.retryable());

        let _ = handler.execute(|| async { Err(failure()) }).await;
        assert!(!handler.retryable());

        let err = handler.execute(|| async { Ok(()) }).await;
        assert!(err.is_err());

        handler.reset();
        assert_eq!(handler.stats(), Stats::default());
        assert!(handler.execute(|| async { Ok(()) }).await.is_ok());
    }
}
