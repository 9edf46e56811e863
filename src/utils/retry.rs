use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use crate::core::{Result, UploadError};

/// One retry per entry of `delays`, waiting that long first. There is no
/// backoff beyond the list itself.
pub struct RetryConfig<'a> {
    pub delays: &'a [Duration],
    /// Decides whether an error is worth another attempt
    pub should_retry: fn(&UploadError) -> bool,
}

impl<'a> RetryConfig<'a> {
    pub fn new(delays: &'a [Duration]) -> Self {
        Self {
            delays,
            should_retry: UploadError::is_retryable,
        }
    }

    /// Delay before retry number `attempt` (0-based), `None` once exhausted.
    pub fn delay_for(&self, attempt: usize, error: &UploadError) -> Option<Duration> {
        if !(self.should_retry)(error) {
            return None;
        }
        self.delays.get(attempt).copied()
    }
}

/// Run `operation`, retrying per `config`
pub async fn retry_with_config<F, Fut, T>(config: &RetryConfig<'_>, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => match config.delay_for(attempt, &error) {
                Some(delay) => {
                    tracing::debug!(attempt, ?delay, %error, "Retrying request");
                    attempt += 1;
                    sleep(delay).await;
                }
                None => return Err(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_success() {
        let delays = [Duration::ZERO, Duration::ZERO];
        let mut count = 0;
        let result = retry_with_config(&RetryConfig::new(&delays), || {
            count += 1;
            let current = count;
            async move {
                if current < 3 {
                    Err(UploadError::server_error(503, "unavailable"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_single_immediate_retry() {
        let delays = [Duration::ZERO];
        let mut count = 0;
        let result = retry_with_config(&RetryConfig::new(&delays), || {
            count += 1;
            async { Err::<(), _>(UploadError::server_error(500, "boom")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let delays = [Duration::ZERO, Duration::ZERO];
        let mut count = 0;
        let result = retry_with_config(&RetryConfig::new(&delays), || {
            count += 1;
            async { Err::<(), _>(UploadError::server_error(404, "missing")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count, 1);
    }
}
