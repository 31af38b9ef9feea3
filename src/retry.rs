//! Timeout and single-retry wrapper for outbound calls

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Why an outbound call produced nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    TimedOut,
    Failed(String),
}

impl Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallFailure::TimedOut => write!(f, "timed out"),
            CallFailure::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

/// Run `call` under `timeout`, retrying once after `backoff` when the first
/// attempt timed out or failed transiently.
pub async fn with_retry<T, E, F, Fut>(
    timeout: Duration,
    backoff: Duration,
    is_transient: impl Fn(&E) -> bool,
    mut call: F,
) -> Result<T, CallFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut failure = CallFailure::TimedOut;

    for attempt in 0..2 {
        if attempt > 0 {
            tokio::time::sleep(backoff).await;
        }

        match tokio::time::timeout(timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                let retry = is_transient(&e);
                failure = CallFailure::Failed(e.to_string());
                if !retry {
                    break;
                }
            }
            Err(_) => failure = CallFailure::TimedOut,
        }
    }

    Err(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SHORT: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result = with_retry(Duration::from_secs(1), SHORT, |_: &String| true, move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("503".to_string())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result: Result<(), _> =
            with_retry(Duration::from_secs(1), SHORT, |_: &String| false, move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("bad request".to_string())
            })
            .await;

        assert_eq!(result, Err(CallFailure::Failed("bad request".to_string())));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_degrades() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result: Result<(), CallFailure> =
            with_retry(Duration::from_millis(10), SHORT, |_: &String| true, move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(CallFailure::TimedOut));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
