use std::future::Future;

use tokio::time::sleep;
use tracing::warn;

use crate::errors::OperationResult;

use super::config::RetryConfig;

/// Runs a whole operation, repeating it while it fails with a transient
/// error. Only wrap operations that are safe to repeat.
pub async fn with_retry<T, F, Fut>(retry_config: &RetryConfig, operation: &str, mut f: F) -> OperationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OperationResult<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Err(e) if e.is_transient() && attempt < retry_config.max_retries => {
                let delay = retry_config.delay_for_attempt(attempt);
                warn!(
                    "{} failed ({}), retrying in {}ms (attempt {}/{})",
                    operation,
                    e,
                    delay.as_millis(),
                    attempt + 1,
                    retry_config.max_retries
                );
                sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, NextcloudError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
            backoff_multiplier: 1.0,
        }
    }

    fn unavailable() -> NextcloudError {
        NextcloudError::Remote {
            status: 503,
            kind: ErrorKind::RemoteUnavailable,
            message: String::new(),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_retry(), "list", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(unavailable())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: OperationResult<()> = with_retry(&fast_retry(), "list", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::RemoteUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: OperationResult<()> = with_retry(&fast_retry(), "read", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(NextcloudError::validation("path", "traversal"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
