//! Document-layer errors and their boundary status codes.

use strata_model::Error;
use strata_revtree::InsertError;
use strata_store::StoreError;
use thiserror::Error;

/// Errors from document operations.
#[derive(Debug, Error)]
pub enum DocError {
    #[error(transparent)]
    Model(#[from] Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Insert(#[from] InsertError),
}

impl DocError {
    /// The HTTP-like status code surfaced at the public boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            DocError::Model(Error::NotFound) => 404,
            DocError::Model(Error::Conflict) => 409,
            DocError::Model(Error::Gone) => 410,
            DocError::Model(
                Error::BadRevisionId
                | Error::BadVersionVector
                | Error::InvalidParameter(_)
                | Error::DeltaBaseUnknown,
            ) => 400,
            DocError::Model(_) => 500,
            DocError::Store(StoreError::InvalidBody) => 400,
            DocError::Store(_) => 500,
            DocError::Insert(err) => err.http_status(),
        }
    }
}
