//! In-memory transactional store.
//!
//! Backs tests and demos with a real [`TransactionalBackend`]: writes are
//! buffered per transaction, applied on commit and discarded on rollback.
//! Faults can be queued to exercise retry and rollback paths.

mod error;
mod tx;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::context::Context;
use crate::executor::{BackendExecutor, TransactionalBackend, TxOptions};

pub use error::MemoryError;
pub use tx::MemoryTx;

use tx::TxState;

pub(crate) type Tables = HashMap<String, Vec<Value>>;

/// Key of a row: its `"id"` field rendered as a string.
pub(crate) fn row_key(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Transaction counters of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStoreStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

#[derive(Default)]
struct Faults {
    begin: VecDeque<anyhow::Error>,
    commit: VecDeque<anyhow::Error>,
    rollback: VecDeque<anyhow::Error>,
}

#[derive(Default)]
pub(crate) struct StoreInner {
    pub(crate) tables: RwLock<Tables>,
    next_tx_id: AtomicU64,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    faults: Mutex<Faults>,
}

impl StoreInner {
    fn next_fault(
        &self,
        pick: impl FnOnce(&mut Faults) -> &mut VecDeque<anyhow::Error>,
    ) -> Option<anyhow::Error> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        pick(&mut faults).pop_front()
    }
}

/// Shared handle to an in-memory store; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor running transactions against this store.
    pub fn executor(&self) -> BackendExecutor<MemoryStore> {
        BackendExecutor::new(self.clone())
    }

    /// Committed rows of `table`.
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.inner
            .tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            begun: self.inner.begun.load(Ordering::SeqCst),
            committed: self.inner.committed.load(Ordering::SeqCst),
            rolled_back: self.inner.rolled_back.load(Ordering::SeqCst),
        }
    }

    /// Makes the next `begin` fail with `err`.
    pub fn fail_next_begin(&self, err: impl Into<anyhow::Error>) {
        self.push_fault(err.into(), |faults| &mut faults.begin);
    }

    /// Makes the next `commit` fail with `err`. The transaction's writes are
    /// discarded.
    pub fn fail_next_commit(&self, err: impl Into<anyhow::Error>) {
        self.push_fault(err.into(), |faults| &mut faults.commit);
    }

    /// Makes the next `rollback` fail with `err`. The transaction's writes are
    /// discarded regardless.
    pub fn fail_next_rollback(&self, err: impl Into<anyhow::Error>) {
        self.push_fault(err.into(), |faults| &mut faults.rollback);
    }

    fn push_fault(
        &self,
        err: anyhow::Error,
        pick: impl FnOnce(&mut Faults) -> &mut VecDeque<anyhow::Error>,
    ) {
        let mut faults = self
            .inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pick(&mut faults).push_back(err);
    }

    async fn finish(&self, tx: &MemoryTx, commit: bool) -> anyhow::Result<()> {
        let mut data = tx.data.lock().await;
        if data.state != TxState::Active {
            return Err(MemoryError::TxDone(tx.id).into());
        }

        let fault = if commit {
            self.inner.next_fault(|faults| &mut faults.commit)
        } else {
            self.inner.next_fault(|faults| &mut faults.rollback)
        };
        if let Some(err) = fault {
            data.pending.clear();
            data.state = TxState::Aborted;
            return Err(err);
        }

        if !commit {
            data.pending.clear();
            data.state = TxState::Aborted;
            self.inner.rolled_back.fetch_add(1, Ordering::SeqCst);
            debug!("rolled back memory transaction {}", tx.id);
            return Ok(());
        }

        let mut tables = self.inner.tables.write().await;
        if let Err(err) = data.apply(&mut tables) {
            data.pending.clear();
            data.state = TxState::Aborted;
            return Err(err.into());
        }
        data.state = TxState::Committed;
        self.inner.committed.fetch_add(1, Ordering::SeqCst);
        debug!("committed memory transaction {}", tx.id);
        Ok(())
    }
}

#[async_trait]
impl TransactionalBackend for MemoryStore {
    type Remote = MemoryTx;

    async fn begin(&self, ctx: &Context, options: &TxOptions) -> anyhow::Result<MemoryTx> {
        if let Some(err) = self.inner.next_fault(|faults| &mut faults.begin) {
            return Err(err);
        }
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let id = self.inner.next_tx_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.begun.fetch_add(1, Ordering::SeqCst);
        debug!("began memory transaction {} ({:?})", id, options);
        Ok(MemoryTx::new(id, *options, Arc::clone(&self.inner)))
    }

    async fn commit(&self, tx: MemoryTx) -> anyhow::Result<()> {
        self.finish(&tx, true).await
    }

    async fn rollback(&self, tx: MemoryTx) -> anyhow::Result<()> {
        self.finish(&tx, false).await
    }
}
