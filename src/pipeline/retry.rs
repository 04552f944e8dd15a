// ABOUTME: Retry loop for transient stage failures.
// ABOUTME: Retries only errors whose kind is retryable, sleeping per the backoff policy.

use std::fmt::Display;
use std::future::Future;

use crate::config::RetryPolicy;

use super::error::FailureKind;

/// Anything that can say whether it is worth retrying.
pub trait Classify {
    fn kind(&self) -> FailureKind;
}

/// Result of a retried operation along with how many retries it took.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub retries: u32,
}

impl<T, E> Retried<T, E> {
    /// A result produced without any retry.
    pub fn once(result: Result<T, E>) -> Self {
        Self { result, retries: 0 }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Retried<U, E> {
        Retried {
            result: self.result.map(f),
            retries: self.retries,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    retries: attempt - 1,
                };
            }
            Err(e) if e.kind().is_retryable() && attempt < policy.attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.attempts,
                    ?delay,
                    "transient failure: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.kind().is_retryable() {
                    tracing::warn!(operation, attempt, "giving up: {}", e);
                }
                return Retried {
                    result: Err(e),
                    retries: attempt - 1,
                };
            }
        }
    }
}
