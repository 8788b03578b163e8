//! Strata Model
//!
//! Core identifier types shared by every layer of the Strata revision engine:
//! - **PeerId**: Opaque identifier of a replicating peer
//! - **Version**: One `(generation, author)` element of a version vector
//! - **VersionVector**: Ordered per-peer generation counters with causal compare/merge
//! - **RevId**: Revision identifier, digest form (`gen-hex`) or version form (`gen@peer`)
//! - **Varint**: Unsigned LEB128 shared by all binary codecs
//! - **Digest**: SHA-1 / MD5 / base64 helpers for revision identity

pub mod digest;
pub mod error;
pub mod peer;
pub mod revid;
pub mod varint;
pub mod version;
pub mod vector;

pub use error::Error;
pub use peer::{PeerId, RemoteId};
pub use revid::RevId;
pub use version::{Author, Version, VersionOrder};
pub use vector::VersionVector;

/// Result alias used throughout the model crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
