//! Time-bounded operations
//!
//! Every step of a run is raced against a deadline so that no step can wait
//! forever on a page, the wallet extension, or the DevTools transport.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::RestakeError;

/// Race `operation` against a timer of `timeout`.
///
/// Whichever settles first decides the result. When the timer wins the call
/// fails with [`RestakeError::DeadlineExceeded`] and the operation future is
/// dropped, which cancels it at its next suspension point. Work the operation
/// already handed to the browser (a click in flight, a navigation) is not
/// rolled back.
pub async fn with_deadline<T, F>(
    operation: &str,
    timeout: Duration,
    future: F,
) -> Result<T, RestakeError>
where
    F: Future<Output = Result<T, RestakeError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?timeout, "Deadline exceeded");
            Err(RestakeError::DeadlineExceeded {
                operation: operation.to_string(),
                timeout,
            })
        }
    }
}

/// Poll `probe` every `interval` until it yields `Some`, failing once
/// `timeout` has elapsed.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<T, RestakeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, RestakeError>>,
{
    with_deadline(operation, timeout, async move {
        loop {
            if let Some(value) = probe().await? {
                return Ok(value);
            }
            tokio::time::sleep(interval).await;
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_result_returned_when_operation_settles_first() {
        let result = with_deadline("quick", Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, RestakeError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_error_passes_through() {
        let result: Result<(), _> = with_deadline("failing", Duration::from_secs(1), async {
            Err(RestakeError::ElementNotFound("#missing".into()))
        })
        .await;
        assert!(matches!(result, Err(RestakeError::ElementNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_when_timer_fires_first() {
        let result = with_deadline("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, RestakeError>(())
        })
        .await;
        match result {
            Err(RestakeError::DeadlineExceeded { operation, timeout }) => {
                assert_eq!(operation, "slow");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("Expected DeadlineExceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_deadline_still_accepts_ready_operation() {
        let result = with_deadline("ready", Duration::ZERO, async { Ok::<_, RestakeError>("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_deadline_fails_pending_operation() {
        let result = with_deadline("pending", Duration::ZERO, async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok::<_, RestakeError>(())
        })
        .await;
        assert!(result.unwrap_err().is_deadline());
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_is_cancelled_on_expiry() {
        let dropped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let guard = DropFlag(dropped.clone());
        let finished_in_op = finished.clone();
        let result = with_deadline("cancellable", Duration::from_millis(10), async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_secs(60)).await;
            finished_in_op.store(true, Ordering::SeqCst);
            Ok::<_, RestakeError>(())
        })
        .await;

        assert!(result.is_err());
        assert!(dropped.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_returns_first_hit() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = poll_until(
            "probe",
            Duration::from_secs(5),
            Duration::from_millis(100),
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok((n >= 3).then_some(n))
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let result: Result<(), _> = poll_until(
            "never",
            Duration::from_millis(300),
            Duration::from_millis(100),
            || async { Ok(None) },
        )
        .await;
        assert!(matches!(result, Err(RestakeError::DeadlineExceeded { .. })));
    }
}
