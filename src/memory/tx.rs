use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::error::MemoryError;
use super::{StoreInner, Tables, row_key};
use crate::executor::TxOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TxState {
    Active,
    Committed,
    Aborted,
}

pub(super) struct TxData {
    pub(super) state: TxState,
    // Buffered until commit
    pub(super) pending: HashMap<String, Vec<Value>>,
}

impl TxData {
    /// Applies pending rows to `tables`, rejecting keys committed meanwhile.
    pub(super) fn apply(&mut self, tables: &mut Tables) -> Result<(), MemoryError> {
        for (table, rows) in &self.pending {
            let committed = tables.get(table);
            for row in rows {
                let Some(key) = row_key(row) else { continue };
                let taken = committed
                    .into_iter()
                    .flatten()
                    .any(|existing| row_key(existing).as_deref() == Some(key.as_str()));
                if taken {
                    return Err(MemoryError::DuplicateKey {
                        table: table.clone(),
                        key,
                    });
                }
            }
        }

        for (table, rows) in self.pending.drain() {
            tables.entry(table).or_default().extend(rows);
        }
        Ok(())
    }
}

/// Handle to a transaction of a [`MemoryStore`](super::MemoryStore).
///
/// Clones refer to the same transaction. Writes are buffered and only become
/// visible to other transactions on commit.
#[derive(Clone)]
pub struct MemoryTx {
    pub(super) id: u64,
    pub(super) options: TxOptions,
    pub(super) store: Arc<StoreInner>,
    pub(super) data: Arc<Mutex<TxData>>,
}

impl MemoryTx {
    pub(super) fn new(id: u64, options: TxOptions, store: Arc<StoreInner>) -> Self {
        Self {
            id,
            options,
            store,
            data: Arc::new(Mutex::new(TxData {
                state: TxState::Active,
                pending: HashMap::new(),
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> &TxOptions {
        &self.options
    }

    pub async fn is_active(&self) -> bool {
        self.data.lock().await.state == TxState::Active
    }

    /// Buffers `row` for insertion into `table`.
    ///
    /// A row's `"id"` field, when present, must be unique within the table
    /// across committed rows and this transaction's pending rows.
    pub async fn insert(&self, table: &str, row: Value) -> Result<(), MemoryError> {
        let mut data = self.data.lock().await;
        if data.state != TxState::Active {
            return Err(MemoryError::TxDone(self.id));
        }
        if self.options.read_only {
            return Err(MemoryError::ReadOnly(self.id));
        }

        if let Some(key) = row_key(&row) {
            let tables = self.store.tables.read().await;
            let taken = tables
                .get(table)
                .into_iter()
                .chain(data.pending.get(table))
                .flatten()
                .any(|existing| row_key(existing).as_deref() == Some(key.as_str()));
            if taken {
                return Err(MemoryError::DuplicateKey {
                    table: table.to_string(),
                    key,
                });
            }
        }

        data.pending.entry(table.to_string()).or_default().push(row);
        Ok(())
    }

    /// Rows of `table` as seen by this transaction: committed rows followed
    /// by its own pending rows.
    pub async fn rows(&self, table: &str) -> Result<Vec<Value>, MemoryError> {
        let data = self.data.lock().await;
        if data.state != TxState::Active {
            return Err(MemoryError::TxDone(self.id));
        }

        let tables = self.store.tables.read().await;
        Ok(tables
            .get(table)
            .into_iter()
            .chain(data.pending.get(table))
            .flatten()
            .cloned()
            .collect())
    }
}

impl fmt::Debug for MemoryTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTx")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
