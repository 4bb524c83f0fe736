//! Generic bounded-backoff retry for downstream calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::clients::ClientError;
use crate::config::RetryConfig;

/// Run `op` until it succeeds, fails non-retryably, or the attempt budget is
/// exhausted. Delay doubles per attempt up to the configured ceiling, with
/// uniform jitter so synchronized workers fan out.
pub async fn with_backoff<T, Fut>(
    retry: &RetryConfig,
    what: &str,
    mut op: impl FnMut() -> Fut,
) -> Result<T, ClientError>
where
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.retryable() && attempt + 1 < retry.max_attempts.max(1) => {
                let delay = backoff_delay(retry, attempt);
                warn!(
                    call = what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retryable downstream failure: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let base = retry.base_delay_ms.max(1);
    let exp = base.saturating_mul(1_u64 << attempt.min(16));
    let capped = exp.min(retry.max_delay_ms.max(base));
    let jitter = rand::thread_rng().gen_range(0..=base);
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&fast_retry(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClientError::Http { status: 503 })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast_retry(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::Timeout) }
        })
        .await;
        assert!(matches!(result, Err(ClientError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failures_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast_retry(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::Http { status: 404 }) }
        })
        .await;
        assert!(matches!(result, Err(ClientError::Http { status: 404 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
