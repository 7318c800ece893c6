//! Bounded retry with exponential backoff for transient failures.
//!
//! Only storage and upstream errors are retried; all other error kinds
//! surface immediately.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use vigil_core::{VigilError, VigilResult};

/// Retries after the initial attempt.
const MAX_RETRIES: u32 = 3;
/// First backoff delay; quadruples each retry (100 ms, 400 ms, 1.6 s).
const BASE_DELAY: Duration = Duration::from_millis(100);

/// Run `op`, retrying transient failures with bounded exponential backoff.
pub async fn with_backoff<T, F, Fut>(operation: &str, mut op: F) -> VigilResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VigilResult<T>>,
{
    let mut delay = BASE_DELAY;
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retries < MAX_RETRIES => {
                retries += 1;
                warn!(operation, retries, error = %err, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                delay *= 4;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Fail fast once the caller has gone away.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> VigilResult<()> {
    if cancel.is_cancelled() {
        Err(VigilError::Canceled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_then_succeed() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(VigilError::Storage("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deterministic_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: VigilResult<()> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(VigilError::Validation {
                    message: "bad input".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: VigilResult<()> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VigilError::Upstream("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1 + MAX_RETRIES);
    }
}
