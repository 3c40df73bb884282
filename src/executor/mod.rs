// ============================================================================
// Executor Contract
// ============================================================================
//
// An executor owns the transaction envelope of one backend:
// - open a transaction with backend-specific options
// - hand the native handle to the run function exactly once
// - roll back when run fails, reporting both errors if rollback fails too
// - commit when run succeeds
//
// ============================================================================

pub mod backend;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::Context;
use crate::core::Result;

pub use backend::{BackendExecutor, TransactionalBackend};

/// Future returned by a [`TxFn`].
pub type TxFuture = BoxFuture<'static, Result<()>>;

/// One-shot function run against a freshly opened transaction handle.
pub type TxFn<R> = Box<dyn FnOnce(R) -> TxFuture + Send>;

/// Backend-specific transaction handling.
///
/// `ctx` only governs opening the transaction. Whatever `run` adds to its own
/// context is not visible to the executor.
#[async_trait]
pub trait Executor<R>: Send + Sync {
    async fn execute(&self, ctx: &Context, run: TxFn<R>) -> Result<()>;
}

#[async_trait]
impl<R, E> Executor<R> for Arc<E>
where
    R: Send + 'static,
    E: Executor<R> + ?Sized,
{
    async fn execute(&self, ctx: &Context, run: TxFn<R>) -> Result<()> {
        (**self).execute(ctx, run).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Options used when opening a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Mark the transaction read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}
