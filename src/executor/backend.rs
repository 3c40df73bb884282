use async_trait::async_trait;
use log::debug;

use super::{Executor, TxFn, TxOptions};
use crate::context::Context;
use crate::core::{Result, TransactError};

/// A store that can open, commit and roll back native transactions.
///
/// Implement this for a client library and wrap it in a [`BackendExecutor`]
/// to get a complete [`Executor`].
#[async_trait]
pub trait TransactionalBackend: Send + Sync {
    /// Handle passed to run functions and resource factories.
    type Remote: Clone + Send + Sync + 'static;

    async fn begin(&self, ctx: &Context, options: &TxOptions) -> anyhow::Result<Self::Remote>;

    async fn commit(&self, tx: Self::Remote) -> anyhow::Result<()>;

    async fn rollback(&self, tx: Self::Remote) -> anyhow::Result<()>;
}

/// [`Executor`] for any [`TransactionalBackend`].
#[derive(Debug, Clone)]
pub struct BackendExecutor<B> {
    backend: B,
    options: TxOptions,
}

impl<B> BackendExecutor<B>
where
    B: TransactionalBackend,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            options: TxOptions::default(),
        }
    }

    /// Options used when opening each transaction.
    pub fn with_tx_options(mut self, options: TxOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tx_options(&self) -> &TxOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B> Executor<B::Remote> for BackendExecutor<B>
where
    B: TransactionalBackend,
{
    async fn execute(&self, ctx: &Context, run: TxFn<B::Remote>) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(TransactError::Open(err.into()));
        }

        let tx = self
            .backend
            .begin(ctx, &self.options)
            .await
            .map_err(TransactError::Open)?;
        debug!("opened transaction with {:?}", self.options);

        if let Err(err) = run(tx.clone()).await {
            debug!("rolling back transaction: {}", err);
            if let Err(rollback) = self.backend.rollback(tx).await {
                return Err(TransactError::RollbackFailed {
                    cause: Box::new(err),
                    rollback,
                });
            }
            return Err(err);
        }

        self.backend.commit(tx).await.map_err(TransactError::Commit)?;
        debug!("committed transaction");
        Ok(())
    }
}
