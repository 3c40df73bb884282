//! Retry policies for outermost transactions.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{debug, warn};

use crate::core::{Result, RetryErrors, TransactError};

/// Default backoff schedule. Its length is the maximum number of retries.
pub const DEFAULT_BACKOFFS: [Duration; 7] = [
    Duration::from_millis(100),
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(300),
];

/// A repeatable operation handed to a [`RetryPolicy`].
pub type RetryOp<'a> = Box<dyn FnMut() -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// Decides whether and when an operation is attempted again.
#[async_trait]
pub trait RetryPolicy: Send + Sync {
    async fn retry(&self, backoffs: &[Duration], op: RetryOp<'_>) -> Result<()>;
}

/// Retries transient failures (see [`crate::is_retryable`]) once per entry of
/// the backoff schedule, sleeping the scheduled delay before each retry.
///
/// The sleep does not observe cancellation of the caller's
/// [`Context`](crate::Context): a canceled caller still waits out the current
/// backoff before the next attempt runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetry;

#[async_trait]
impl RetryPolicy for DefaultRetry {
    async fn retry(&self, backoffs: &[Duration], mut op: RetryOp<'_>) -> Result<()> {
        let mut failures = RetryErrors::default();

        loop {
            let attempt = failures.len();
            let err = match op().await {
                Ok(()) => {
                    if !failures.is_empty() {
                        debug!("operation succeeded after {} retries", attempt);
                    }
                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= backoffs.len() {
                failures.push(attempt, err);
                return Err(TransactError::Retry(failures));
            }

            let backoff = backoffs[attempt];
            warn!(
                "transaction retry on transient error (attempt {} of {}): {} (backoff={}ms)",
                attempt + 1,
                backoffs.len(),
                err,
                backoff.as_millis()
            );
            failures.push(attempt, err);
            tokio::time::sleep(backoff).await;
        }
    }
}
