pub mod error;

pub use error::{
    AttemptError, ConnectionClosed, ContextError, RetryErrors, Result, TransactError,
    is_retryable,
};
