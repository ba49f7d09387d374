use std::{future::Future, time::Duration};

use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::errors::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Upper bound on the total time spent on one read, retries included.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Runs a read against the ledger, retrying retryable provider errors.
/// Exhaustion surfaces the last error.
pub async fn retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempts = 0;
    let start_time = Instant::now();
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() => {
                attempts += 1;
                if attempts >= config.max_retries || start_time.elapsed() >= config.timeout {
                    return Err(e);
                }
                warn!(
                    "{} failed, retrying in {:?} (attempt {}/{}): {}",
                    operation_name, config.retry_delay, attempts, config.max_retries, e
                );
                sleep(config.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn root_prefix(root: &[u8; 32]) -> String {
    hex::encode(&root[..4])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_retry(5), "block_number", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Transport("connection reset".to_string()))
            } else {
                Ok(7u64)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<u64, _> = retry(&fast_retry(3), "block_number", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Timeout("slow node".to_string()))
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_reverts() {
        let calls = AtomicU32::new(0);
        let result: Result<u64, _> = retry(&fast_retry(3), "deposits", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Reverted {
                call: "deposits".to_string(),
                message: "out of range".to_string(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
