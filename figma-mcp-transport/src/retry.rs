//! Bounded retry driven by the retry advisor.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};

/// Default attempt budget for [`RetryPolicy`].
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    /// Longest single sleep between attempts. `None` sleeps the advised
    /// delay in full.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Cap the delay between attempts.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Whether `error`, seen on 1-based `attempt`, should be retried.
    pub fn should_retry(&self, attempt: u32, error: &ApiError) -> bool {
        attempt < self.max_attempts.max(1) && error.is_retryable()
    }

    /// Advised delay for `error`, clamped to `max_delay` when set.
    pub fn retry_delay(&self, error: &ApiError) -> Duration {
        let delay = error.recovery().delay();
        match self.max_delay {
            Some(max_delay) => delay.min(max_delay),
            None => delay,
        }
    }

    /// Call `f` until it succeeds, fails for good, or the budget runs out.
    ///
    /// Returns the last error when attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, mut f: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(attempt, &error) => {
                    let delay = self.retry_delay(&error);
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        kind = error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying after error: {error}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    if error.is_retryable() {
                        warn!(attempt, kind = error.kind(), "giving up after {attempt} attempts: {error}");
                    }
                    return Err(error);
                }
            }
        }
    }
}

/// Retry `f` up to `max_attempts` times, sleeping the advised delay between
/// retryable failures.
///
/// ```no_run
/// # async fn demo(client: &figma_mcp_transport::Client) -> figma_mcp_transport::ApiResult<()> {
/// use figma_mcp_transport::{HeaderList, with_retry};
///
/// let headers = HeaderList::new().with("X-Figma-Token", "secret");
/// let me = with_retry(3, || client.get_json(&headers, "https://api.figma.com/v1/me")).await?;
/// println!("{me}");
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, F, Fut>(max_attempts: u32, f: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    RetryPolicy::new(max_attempts).run(f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn server_error() -> ApiError {
        ApiError::Http {
            status: 503,
            body: String::new(),
            retry_after: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let result = with_retry(3, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(server_error())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two 5xx delays of 2s each.
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let calls = &AtomicU32::new(0);
        let result: ApiResult<()> = with_retry(2, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Timeout)
        })
        .await;

        assert_eq!(result, Err(ApiError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();
        let result: ApiResult<()> = with_retry(5, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Http {
                status: 404,
                body: "not found".into(),
                retry_after: None,
            })
        })
        .await;

        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_sleeps_full_retry_after() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let result = with_retry(2, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::Http {
                    status: 429,
                    body: String::new(),
                    retry_after: Some(120.0),
                })
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delay_is_capped() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();
        let policy = RetryPolicy::new(2).with_max_delay(Duration::from_secs(10));

        let _ = policy
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ApiError::Http {
                    status: 429,
                    body: String::new(),
                    retry_after: Some(120.0),
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once() {
        let calls = &AtomicU32::new(0);
        let _: ApiResult<()> = with_retry(0, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Timeout)
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.max_delay, None);
        assert_eq!(RetryPolicy::new(5).max_delay, None);
        assert!(!policy.should_retry(3, &ApiError::Timeout));
        assert!(policy.should_retry(1, &ApiError::Timeout));
    }
}
