//! Condition waits with a recovery action between attempts
//!
//! A dashboard that renders slowly or gets stuck on a stale bundle usually
//! comes back after a reload. [`wait_with_recovery`] retries a wait a fixed
//! number of times, running a recovery step (typically a reload) between
//! failed attempts, and fails terminally once the budget is spent.

use std::future::Future;

use tracing::{debug, error, info, warn};

use crate::errors::RestakeError;

/// Attempt `condition` up to `max_attempts` times.
///
/// Returns the first successful value. After each failed attempt except the
/// last, `recover` runs once before the next attempt; a failing recovery is
/// logged and the next attempt proceeds anyway. When the final attempt fails
/// the call returns [`RestakeError::RetryBudgetExhausted`] carrying the last
/// error.
pub async fn wait_with_recovery<T, C, CFut, R, RFut>(
    operation: &str,
    max_attempts: u32,
    mut condition: C,
    mut recover: R,
) -> Result<T, RestakeError>
where
    C: FnMut() -> CFut,
    CFut: Future<Output = Result<T, RestakeError>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<(), RestakeError>>,
{
    if max_attempts == 0 {
        return Err(RestakeError::InvalidArgument(format!(
            "retry budget for '{operation}' must allow at least one attempt"
        )));
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!(operation, attempt, max_attempts, "Attempting wait");

        let err = match condition().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "Wait succeeded after recovery");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            error!(operation, attempts = attempt, error = %err, "Retry budget exhausted");
            return Err(RestakeError::RetryBudgetExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last_error: err.to_string(),
            });
        }

        warn!(
            operation,
            attempt,
            max_attempts,
            error = %err,
            "Wait failed, running recovery before retrying"
        );
        if let Err(recover_err) = recover().await {
            warn!(operation, attempt, error = %recover_err, "Recovery step failed");
        }
    }
}
