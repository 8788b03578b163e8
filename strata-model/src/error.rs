//! Error kinds surfaced by the revision engine.

use thiserror::Error;

/// Errors from identifier parsing and document-level operations.
///
/// Parse and validation failures are returned to the caller and never
/// retried. `CorruptRevisionData` is fatal for the affected record only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid revision ID")]
    BadRevisionId,

    #[error("invalid version vector")]
    BadVersionVector,

    #[error("revision not found")]
    NotFound,

    #[error("document update conflict")]
    Conflict,

    #[error("unknown source revision for delta")]
    DeltaBaseUnknown,

    #[error("revision body is gone")]
    Gone,

    #[error("database cannot be upgraded in place")]
    CantUpgradeDatabase,

    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),

    #[error("write attempted outside a transaction")]
    NotInTransaction,

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("corrupt revision data")]
    CorruptRevisionData,
}
