//! Strata Store
//!
//! The storage collaborators of the Strata revision engine:
//! - **Record**: the KV row shape (`key, flags, body, extra, version, sequence`)
//! - **KeyStore**: redb-backed document table with store-assigned sequences
//!   and an MVCC check on writes
//! - **Transaction**: write-transaction wrapper; every write goes through one
//! - **body**: the JSON body codec (validate / empty dict / parse dict)
//!
//! The engine above this crate treats `extra` as an opaque blob it alone
//! writes; this crate never interprets it.

pub mod body;
pub mod error;
pub mod keystore;
pub mod record;

pub use error::StoreError;
pub use keystore::{KeyStore, StoreConfig, Transaction};
pub use record::{ContentLevel, DocumentFlags, Record, RecordUpdate};

/// Result alias used throughout the store crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
