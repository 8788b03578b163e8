//! Storage-layer errors.

use thiserror::Error;

/// Errors from KeyStore operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store is read-only")]
    ReadOnly,

    #[error("invalid document body")]
    InvalidBody,

    #[error(transparent)]
    Model(#[from] strata_model::Error),
}
