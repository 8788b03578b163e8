//! Peer and remote identifiers.

use std::fmt;

use crate::error::Error;
use crate::Result;

/// Opaque identifier of a replicating peer, as carried in version vectors.
///
/// The zero value is reserved for [`PeerId::ME`], a placeholder for "this
/// database": a database has no assigned peer ID until it first talks to
/// another peer, so local versions are authored as `ME` in memory and bound
/// to the concrete ID only at ASCII emission and at persistence boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u64);

impl PeerId {
    /// The local database. Written as `*` in relative ASCII form.
    pub const ME: PeerId = PeerId(0);

    /// Fixed sentinel peer used when synthesizing vectors from historical
    /// rev-tree generations during a versioning upgrade.
    pub const LEGACY: PeerId = PeerId(0x7777777);

    pub fn is_me(self) -> bool {
        self == Self::ME
    }

    /// Parse from lowercase hex, or `*` for [`PeerId::ME`].
    ///
    /// A zero ID must be spelled `*`; the digit form is rejected.
    pub fn parse_ascii(s: &str) -> Result<PeerId> {
        if s == "*" {
            return Ok(PeerId::ME);
        }
        let id = u64::from_str_radix(s, 16).map_err(|_| Error::BadVersionVector)?;
        if id == 0 {
            return Err(Error::BadVersionVector); // zero must be expressed as '*'
        }
        Ok(PeerId(id))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_me() {
            write!(f, "*")
        } else {
            write!(f, "{:x}", self.0)
        }
    }
}

/// Tag for a peer whose last-known revision of a document is pinned.
///
/// `RemoteId::LOCAL` (zero) is not a real remote: in rev-tree mode it means
/// "no remote", and in vector mode it addresses the document's own current
/// revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RemoteId(pub u32);

impl RemoteId {
    /// The document's own current revision (not an entry in any remote map).
    pub const LOCAL: RemoteId = RemoteId(0);

    /// The remote a single-server replicator talks to.
    pub const DEFAULT: RemoteId = RemoteId(1);

    pub fn is_local(self) -> bool {
        self == Self::LOCAL
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote#{}", self.0)
    }
}
