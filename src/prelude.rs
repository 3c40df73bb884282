//! Everything application code needs to run work atomically.
//!
//! ```
//! use transacter::prelude::*;
//! ```

pub use crate::{
    Atomic, BackendExecutor, Context, Executor, RetryPolicy, TransactError,
    TransactionalBackend, Transacter, TransacterConfig, TxFn, TxOptions,
};
