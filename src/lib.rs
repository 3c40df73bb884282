// ============================================================================
// Transacter Library
// ============================================================================

//! Run units of work atomically, whatever the backend.
//!
//! A [`Transacter`] ties together an [`Executor`] (how a backend opens,
//! commits and rolls back transactions), a resource factory (how repositories
//! are built from the live transaction handle) and a [`RetryPolicy`] (which
//! transient failures are worth another attempt).
//!
//! Nested calls that receive the context handed to the outer work function
//! join the outer transaction instead of opening their own, so composed
//! business operations commit or roll back together.
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use transacter::{Context, MemoryStore, MemoryTx, Transacter};
//!
//! struct Repos {
//!     tx: MemoryTx,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let transacter = Transacter::new(
//!     store.executor(),
//!     |_: &Context, _: &Transacter<MemoryTx, Repos>, tx| Ok(Repos { tx }),
//! );
//!
//! transacter
//!     .transact(&Context::background(), |_ctx, repos| async move {
//!         repos.tx.insert("orders", json!({ "id": 1 })).await?;
//!         repos.tx.insert("invoices", json!({ "id": 1, "order": 1 })).await?;
//!         Ok(())
//!     })
//!     .await?;
//!
//! assert_eq!(store.rows("orders").await.len(), 1);
//! assert_eq!(store.stats().committed, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod core;
pub mod executor;
pub mod memory;
pub mod prelude;
pub mod retry;
pub mod transacter;

// Re-export main types for convenience
pub use crate::config::{ConfigError, TransacterConfig};
pub use crate::context::{CancelHandle, Context, ContextKey, SESSION_CONTEXT_KEY};
pub use crate::core::{
    AttemptError, ConnectionClosed, ContextError, Result, RetryErrors, TransactError,
    is_retryable,
};
pub use crate::executor::{
    BackendExecutor, Executor, IsolationLevel, TransactionalBackend, TxFn, TxFuture, TxOptions,
};
pub use crate::memory::{MemoryError, MemoryStore, MemoryStoreStats, MemoryTx};
pub use crate::retry::{DEFAULT_BACKOFFS, DefaultRetry, RetryOp, RetryPolicy};
pub use crate::transacter::{Atomic, ResourceFactory, Session, Transacter};
