//! Strata Doc
//!
//! The document layer of the Strata revision engine: per-document
//! controllers that compose the revision tree and version vector with the
//! key store.
//!
//! - **TreeDocument**: rev-tree scheme: selection cursor over the tree,
//!   put of new and replicated revisions, digest rev-ID generation, save
//! - **VectorRecord** / **VectorDocument**: version-vector scheme: current
//!   revision plus per-remote revisions, causal put policy, conflict
//!   resolution
//! - **upgrade**: in-place migration of stored documents from the rev-tree
//!   scheme to the version-vector scheme
//! - **ancestors**: bulk ancestry lookup for replication handshakes

pub mod ancestors;
pub mod docid;
pub mod error;
pub mod put;
pub mod revision;
pub mod tree_doc;
pub mod upgrade;
pub mod vector_doc;
pub mod vector_record;

pub use ancestors::{find_doc_ancestors, ANCESTOR_EXISTS, ANCESTOR_EXISTS_NOT_CURRENT};
pub use docid::generate_doc_id;
pub use error::DocError;
pub use put::{PutBody, PutRequest, SaveResult};
pub use revision::Revision;
pub use tree_doc::TreeDocument;
pub use upgrade::{upgrade_document_versioning, Versioning};
pub use vector_doc::VectorDocument;
pub use vector_record::VectorRecord;

/// Result alias used throughout the document crate.
pub type Result<T, E = DocError> = std::result::Result<T, E>;
