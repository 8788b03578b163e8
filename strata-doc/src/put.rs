//! Put requests and save outcomes, shared by both document schemes.

use strata_model::RemoteId;

use crate::Result;

/// Applies a delta to a source revision body, yielding the new body.
pub type DeltaApplier<'a> = &'a dyn Fn(&[u8], &[u8]) -> Result<Vec<u8>>;

/// The body of a put: literal bytes, or a delta against a stored revision.
pub enum PutBody<'a> {
    /// A complete body. `None` means an empty body (e.g. a deletion).
    Bytes(Option<&'a [u8]>),
    /// A delta to apply against the named source revision's body.
    Delta {
        source_rev: &'a str,
        delta: &'a [u8],
        apply: DeltaApplier<'a>,
    },
}

/// A `put` request: a local edit (no history) or an incoming replicated
/// revision (with history).
pub struct PutRequest<'a> {
    pub body: PutBody<'a>,
    /// For existing revisions: the revision's ancestry, newest first. In
    /// vector mode, entry 0 is the new revision's version vector.
    pub history: &'a [&'a str],
    pub deleted: bool,
    pub has_attachments: bool,
    pub allow_conflict: bool,
    /// The remote this revision is the latest known revision of;
    /// `RemoteId::LOCAL` for local edits.
    pub remote: RemoteId,
    /// Save to the store after applying.
    pub save: bool,
}

impl<'a> PutRequest<'a> {
    /// A plain local edit of `body`.
    pub fn new(body: &'a [u8]) -> PutRequest<'a> {
        PutRequest {
            body: PutBody::Bytes(Some(body)),
            history: &[],
            deleted: false,
            has_attachments: false,
            allow_conflict: false,
            remote: RemoteId::LOCAL,
            save: true,
        }
    }

    /// A local deletion.
    pub fn deletion() -> PutRequest<'a> {
        PutRequest {
            body: PutBody::Bytes(None),
            deleted: true,
            ..PutRequest::new(b"")
        }
    }
}

/// Outcome of saving a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    /// Nothing was dirty; nothing written.
    NoSave,
    /// Written without consuming a new sequence (metadata-only change).
    NoNewSequence,
    /// Written under a newly assigned sequence.
    NewSequence,
    /// The store refused the write: the record changed underneath us.
    Conflict,
}
