use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

/// Errors produced while running work atomically.
///
/// Every variant names the phase that failed. Causes are kept in the
/// `source()` chain so callers (and the retry policy) can inspect them.
#[derive(Error, Debug)]
pub enum TransactError {
    #[error("opening transaction: {0}")]
    Open(#[source] anyhow::Error),

    #[error("creating resources: {0}")]
    Resources(#[source] anyhow::Error),

    #[error("executing run: {0}")]
    Run(#[source] anyhow::Error),

    #[error("committing transaction: {0}")]
    Commit(#[source] anyhow::Error),

    #[error("{cause}; rolling back transaction: {rollback}")]
    RollbackFailed {
        #[source]
        cause: Box<TransactError>,
        rollback: anyhow::Error,
    },

    #[error("cannot use {found} as {expected}")]
    SessionTypeMismatch {
        found: &'static str,
        expected: &'static str,
    },

    #[error("error not retryable or reached maximum number of retries: {0}")]
    Retry(#[source] RetryErrors),
}

pub type Result<T> = std::result::Result<T, TransactError>;

impl TransactError {
    /// Returns `true` when this error, or anything it wraps, is a transient
    /// infrastructure failure worth another attempt.
    ///
    /// Commit failures never are: the work already ran, and another attempt
    /// would replay it. A failed rollback is retryable when either side is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Commit(_) | Self::SessionTypeMismatch { .. } => false,
            Self::RollbackFailed { cause, rollback } => {
                cause.is_retryable() || is_retryable(&**rollback)
            }
            _ => is_retryable(self),
        }
    }

    /// Every attempt's failure when this is a retry aggregate.
    pub fn attempts(&self) -> Option<&[AttemptError]> {
        match self {
            Self::Retry(errors) => Some(errors.attempts()),
            _ => None,
        }
    }

    /// Both errors of a failed rollback: the original cause and the rollback failure.
    pub fn rollback_failure(&self) -> Option<(&TransactError, &anyhow::Error)> {
        match self {
            Self::RollbackFailed { cause, rollback } => Some((cause.as_ref(), rollback)),
            _ => None,
        }
    }
}

/// Reasons a [`Context`](crate::context::Context) is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Marker for operations attempted on a connection that is already closed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("use of closed connection")]
pub struct ConnectionClosed;

/// Walks the `source()` chain of `err` looking for a transient failure.
///
/// Retryable: deadline exceeded (context deadlines, tokio timeouts, I/O
/// timeouts) and closed connections. Everything else is terminal.
pub fn is_retryable(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if is_transient(err) {
            return true;
        }
        current = err.source();
    }
    false
}

fn is_transient(err: &(dyn StdError + 'static)) -> bool {
    if let Some(ctx_err) = err.downcast_ref::<ContextError>() {
        return *ctx_err == ContextError::DeadlineExceeded;
    }
    if err.is::<ConnectionClosed>() || err.is::<tokio::time::error::Elapsed>() {
        return true;
    }
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        return matches!(
            io_err.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe
        );
    }
    false
}

/// One failed attempt of a retried operation.
#[derive(Debug)]
pub struct AttemptError {
    pub attempt: usize,
    pub error: TransactError,
}

impl AttemptError {
    pub fn new(attempt: usize, error: TransactError) -> Self {
        Self { attempt, error }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "try {}: {}", self.attempt, self.error)
    }
}

impl StdError for AttemptError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}

/// Aggregate of every failed attempt, in attempt order.
#[derive(Debug, Default)]
pub struct RetryErrors {
    attempts: Vec<AttemptError>,
}

impl RetryErrors {
    pub fn push(&mut self, attempt: usize, error: TransactError) {
        self.attempts.push(AttemptError::new(attempt, error));
    }

    pub fn attempts(&self) -> &[AttemptError] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// The error of the final attempt.
    pub fn last(&self) -> Option<&TransactError> {
        self.attempts.last().map(|attempt| &attempt.error)
    }
}

impl fmt::Display for RetryErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attempt) in self.attempts.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{attempt}")?;
        }
        Ok(())
    }
}

impl StdError for RetryErrors {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.attempts
            .last()
            .map(|attempt| attempt as &(dyn StdError + 'static))
    }
}
