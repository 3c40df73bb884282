// ============================================================================
// Transacter
// ============================================================================
//
// Runs caller work atomically:
// - outermost call: retry policy -> executor -> new session -> resources -> run
// - nested call (session already in context): reuse the handle, no new
//   transaction, no retries, errors flow back to the outermost call
//
// ============================================================================

mod session;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{Instrument, debug_span};

use crate::config::TransacterConfig;
use crate::context::Context;
use crate::core::{Result, TransactError};
use crate::executor::{Executor, TxFn};
use crate::retry::{DEFAULT_BACKOFFS, DefaultRetry, RetryOp, RetryPolicy};

pub use session::Session;

/// Builds the caller's resources from the active transaction handle.
///
/// The transacter is passed along so resources may hold services that run
/// their own (nested) transactions.
pub type ResourceFactory<R, Res> =
    dyn Fn(&Context, &Transacter<R, Res>, R) -> anyhow::Result<Res> + Send + Sync;

/// Anything that can run work atomically over `Res`.
///
/// Lets business services depend on the ability to transact without naming
/// the backend handle type.
pub trait Atomic<Res>: Send + Sync {
    fn transact<F, Fut>(&self, ctx: &Context, run: F) -> impl Future<Output = Result<()>> + Send
    where
        F: Fn(Context, Res) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static;
}

/// Coordinates transactions for one executor and one resources type.
///
/// Holds no per-call state; clone it freely and share it across tasks.
pub struct Transacter<R, Res> {
    executor: Arc<dyn Executor<R>>,
    create_resources: Arc<ResourceFactory<R, Res>>,
    retry: Arc<dyn RetryPolicy>,
    backoffs: Arc<[Duration]>,
}

impl<R, Res> Clone for Transacter<R, Res> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            create_resources: Arc::clone(&self.create_resources),
            retry: Arc::clone(&self.retry),
            backoffs: Arc::clone(&self.backoffs),
        }
    }
}

impl<R, Res> fmt::Debug for Transacter<R, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transacter")
            .field("backoffs", &self.backoffs)
            .finish_non_exhaustive()
    }
}

impl<R, Res> Transacter<R, Res>
where
    R: Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    /// Creates a transacter using [`DefaultRetry`] and [`DEFAULT_BACKOFFS`].
    ///
    /// `create_resources` is called once per `transact` call with the active
    /// handle, e.g. to build repositories on top of it.
    pub fn new<E, F>(executor: E, create_resources: F) -> Self
    where
        E: Executor<R> + 'static,
        F: Fn(&Context, &Transacter<R, Res>, R) -> anyhow::Result<Res> + Send + Sync + 'static,
    {
        Self {
            executor: Arc::new(executor),
            create_resources: Arc::new(create_resources),
            retry: Arc::new(DefaultRetry),
            backoffs: Arc::from(DEFAULT_BACKOFFS.as_slice()),
        }
    }

    /// Replace the retry policy
    pub fn with_retry_policy<P>(mut self, policy: P) -> Self
    where
        P: RetryPolicy + 'static,
    {
        self.retry = Arc::new(policy);
        self
    }

    /// Replace the backoff schedule; its length caps the number of retries
    pub fn with_backoff_delays(mut self, backoffs: impl IntoIterator<Item = Duration>) -> Self {
        self.backoffs = backoffs.into_iter().collect();
        self
    }

    /// Apply a loaded configuration
    pub fn with_config(self, config: &TransacterConfig) -> Self {
        self.with_backoff_delays(config.backoff_delays())
    }

    pub fn backoffs(&self) -> &[Duration] {
        &self.backoffs
    }

    /// Runs `run` atomically.
    ///
    /// Without a session in `ctx` a new transaction is opened through the
    /// executor, wrapped in the retry policy. With a session the in-flight
    /// transaction is reused and `run`'s error is returned as is, leaving
    /// rollback and retries to the outermost call.
    ///
    /// Always hand the context given to `run` to nested calls, otherwise they
    /// open transactions of their own.
    pub async fn transact<F, Fut>(&self, ctx: &Context, run: F) -> Result<()>
    where
        F: Fn(Context, Res) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let session = Session::<R>::from_context(ctx)?;
        let nested = session.is_some();
        let run = Arc::new(run);

        async move {
            match session {
                Some(session) => self.in_session(ctx.clone(), run)(session.tx().clone()).await,
                None => {
                    let op: RetryOp<'_> = Box::new(move || {
                        let run_in_session = self.in_session(ctx.clone(), Arc::clone(&run));
                        self.executor.execute(ctx, run_in_session)
                    });
                    self.retry.retry(&self.backoffs, op).await
                }
            }
        }
        .instrument(debug_span!("transact", nested))
        .await
    }

    fn in_session<F, Fut>(&self, ctx: Context, run: Arc<F>) -> TxFn<R>
    where
        F: Fn(Context, Res) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let transacter = self.clone();
        Box::new(move |tx: R| {
            async move {
                let ctx = Session::new(tx.clone()).attach(&ctx);
                let resources = (transacter.create_resources)(&ctx, &transacter, tx)
                    .map_err(TransactError::Resources)?;
                run(ctx, resources).await.map_err(TransactError::Run)
            }
            .boxed()
        })
    }
}

impl<R, Res> Atomic<Res> for Transacter<R, Res>
where
    R: Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    fn transact<F, Fut>(&self, ctx: &Context, run: F) -> impl Future<Output = Result<()>> + Send
    where
        F: Fn(Context, Res) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Transacter::transact(self, ctx, run)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::context::SESSION_CONTEXT_KEY;
    use crate::core::ConnectionClosed;

    /// Executor that hands out numbered handles and records the outcome.
    #[derive(Default)]
    struct RecordingExecutor {
        opened: AtomicUsize,
        outcomes: Mutex<Vec<(u32, bool)>>,
    }

    #[async_trait]
    impl Executor<u32> for RecordingExecutor {
        async fn execute(&self, _ctx: &Context, run: TxFn<u32>) -> Result<()> {
            let tx = self.opened.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            let result = run(tx).await;
            self.outcomes.lock().unwrap().push((tx, result.is_ok()));
            result
        }
    }

    #[derive(Debug)]
    struct Handles {
        tx: u32,
    }

    fn factory(_: &Context, _: &Transacter<u32, Handles>, tx: u32) -> anyhow::Result<Handles> {
        Ok(Handles { tx })
    }

    fn transacter(executor: Arc<RecordingExecutor>) -> Transacter<u32, Handles> {
        Transacter::new(executor, factory).with_backoff_delays([Duration::ZERO; 3])
    }

    #[tokio::test]
    async fn test_outermost_call_opens_and_commits() {
        let executor = Arc::new(RecordingExecutor::default());
        let seen = Arc::new(AtomicUsize::new(0));

        let observed = Arc::clone(&seen);
        transacter(Arc::clone(&executor))
            .transact(&Context::background(), move |ctx, handles| {
                let observed = Arc::clone(&observed);
                async move {
                    assert!(ctx.contains(SESSION_CONTEXT_KEY));
                    observed.store(handles.tx as usize, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(*executor.outcomes.lock().unwrap(), vec![(1, true)]);
    }

    #[tokio::test]
    async fn test_nested_call_reuses_handle() {
        let executor = Arc::new(RecordingExecutor::default());
        let transacter = transacter(Arc::clone(&executor));
        let inner_tx = Arc::new(AtomicUsize::new(0));

        let nested = transacter.clone();
        let observed = Arc::clone(&inner_tx);
        transacter
            .transact(&Context::background(), move |ctx, outer| {
                let nested = nested.clone();
                let observed = Arc::clone(&observed);
                async move {
                    nested
                        .transact(&ctx, move |_, inner| {
                            let observed = Arc::clone(&observed);
                            async move {
                                observed.store(inner.tx as usize, Ordering::SeqCst);
                                Ok(())
                            }
                        })
                        .await?;
                    assert_eq!(outer.tx, 1);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(inner_tx.load(Ordering::SeqCst), 1);
        assert_eq!(executor.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_run_error_is_retried() {
        let executor = Arc::new(RecordingExecutor::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        transacter(Arc::clone(&executor))
            .transact(&Context::background(), move |_, _| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(ConnectionClosed.into());
                    }
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *executor.outcomes.lock().unwrap(),
            vec![(1, false), (2, true)]
        );
    }

    #[tokio::test]
    async fn test_session_of_other_type_fails_before_opening() {
        let executor = Arc::new(RecordingExecutor::default());
        let ctx = Context::background().with_value(SESSION_CONTEXT_KEY, 3.5f64);

        let err = transacter(Arc::clone(&executor))
            .transact(&ctx, |_, _| async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransactError::SessionTypeMismatch { found: "f64", .. }
        ));
        assert_eq!(executor.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_factory_error_is_wrapped() {
        let executor = Arc::new(RecordingExecutor::default());
        let transacter: Transacter<u32, Handles> =
            Transacter::new(Arc::clone(&executor), |_: &Context, _: &Transacter<u32, Handles>, _| {
                Err(anyhow::anyhow!("no repositories today"))
            });

        let err = transacter
            .transact(&Context::background(), |_, _| async { Ok(()) })
            .await
            .unwrap_err();

        let attempts = err.attempts().unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(matches!(attempts[0].error, TransactError::Resources(_)));
        assert_eq!(*executor.outcomes.lock().unwrap(), vec![(1, false)]);
    }

    #[test]
    fn test_config_sets_backoffs() {
        let config = TransacterConfig::new().backoffs([Duration::from_millis(7)]);
        let transacter = transacter(Arc::new(RecordingExecutor::default())).with_config(&config);
        assert_eq!(transacter.backoffs(), &[Duration::from_millis(7)]);
    }
}
