use backoff::future::retry_notify;
use backoff::Error as BackoffError;
use std::fmt::Display;
use std::future::Future;

use crate::config::RetryPolicy;
use crate::error::Transience;

fn retry_notify_handler<E>(what: &str, err: E, duration: std::time::Duration)
where
    E: Display,
{
    tracing::warn!(
        "{} failed: {}. Retrying in {:.1}s...",
        what,
        err,
        duration.as_secs_f32()
    );
}

/// Runs `op`, retrying transient failures up to `policy.max_retries` times.
///
/// Permanent failures and the failure after the last retry are returned as is.
pub async fn with_retries<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transience + Display,
{
    let max_retries = policy.max_retries;
    let mut attempt = 0u32;
    retry_notify(
        policy.backoff(),
        || {
            attempt += 1;
            let current = attempt;
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(err) if err.is_transient() && current <= max_retries => {
                        tracing::debug!("Attempt {} failed transiently", current);
                        Err(BackoffError::transient(err))
                    }
                    Err(err) => Err(BackoffError::permanent(err)),
                }
            }
        },
        |err: E, duration: std::time::Duration| retry_notify_handler(what, err, duration),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn gives_up_after_three_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), PipelineError> = with_retries(&RetryPolicy::fast(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::Http("503".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), PipelineError> = with_retries(&RetryPolicy::fast(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::ContentSelectorMissed("x".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retries(&RetryPolicy::fast(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(PipelineError::Timeout("slow".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }
}
