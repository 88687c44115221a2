// backuptool/src/storage/retry.rs
use std::time::Duration;

use crate::errors::{AppError, Result};

/// A retry policy is plain data: attempt bound, fixed inter-attempt delay,
/// and a predicate deciding which errors are worth another try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub retryable: fn(&AppError) -> bool,
}

/// Policy used around sink uploads: three attempts, ten seconds apart,
/// retrying only network-class failures.
pub const UPLOAD_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    delay: Duration::from_secs(10),
    retryable: AppError::is_transient,
};

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails permanently, or the attempt bound
    /// is reached. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && (self.retryable)(&e) => {
                    tracing::warn!(attempt, error = %e, "retryable failure, waiting before next attempt");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
            retryable: AppError::is_transient,
        }
    }

    fn transient() -> AppError {
        AppError::UploadTransient {
            sink: "remote_disk",
            reason: "connection reset".into(),
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() -> Result<()> {
        let calls = Cell::new(0u32);
        let value = quick(3)
            .run(|| {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(transient())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await?;
        assert_eq!(value, 3);
        assert_eq!(calls.get(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Cell::new(0u32);
        let result: Result<()> = quick(3)
            .run(|| {
                calls.set(calls.get() + 1);
                async { Err(transient()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0u32);
        let result: Result<()> = quick(5)
            .run(|| {
                calls.set(calls.get() + 1);
                async {
                    Err(AppError::UploadPermanent {
                        sink: "remote_disk",
                        reason: "401 unauthorized".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
