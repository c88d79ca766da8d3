//! Retry middleware (§9 redesign flag): an explicit wrapper at the
//! provider-trait boundary rather than a decorator baked into SDK calls.
//! 3 attempts, exponential backoff with full jitter, retried only when
//! the predicate says the error is transient.

use std::future::Future;
use std::time::Duration;

use guard_common::wait::backoff_full_jitter;

const MAX_ATTEMPTS: usize = 3;
const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Retries `operation` up to [`MAX_ATTEMPTS`] times. `is_transient`
/// decides whether a given error is worth retrying; a non-transient
/// error (or the final attempt) returns immediately.
pub async fn retry_transient<T, E, Op, Fut, IsTransient>(mut operation: Op, is_transient: IsTransient) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    IsTransient: Fn(&E) -> bool,
{
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let transient = is_transient(&e);
                last_err = Some(e);
                if !transient || attempt + 1 == MAX_ATTEMPTS {
                    break;
                }
                tokio::time::sleep(backoff_full_jitter(BASE_DELAY, MAX_DELAY, attempt)).await;
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures_within_budget() {
        let attempts = AtomicUsize::new(0);
        let result: Result<&str, &str> = retry_transient(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok("ok") } }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_transient_error() {
        let attempts = AtomicUsize::new(0);
        let result: Result<&str, &str> = retry_transient(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err("permanent") }
            },
            |_| false,
        )
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicUsize::new(0);
        let result: Result<&str, &str> = retry_transient(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err("transient") }
            },
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
