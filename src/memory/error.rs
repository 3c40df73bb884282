use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Transaction {0} has already been committed or rolled back")]
    TxDone(u64),

    #[error("Transaction {0} is read-only")]
    ReadOnly(u64),

    #[error("Duplicate key {key} in table '{table}'")]
    DuplicateKey { table: String, key: String },
}
