//! A single version: one `(generation, author)` element of a version vector.

use std::fmt;
use std::ops::BitOr;

use crate::error::Error;
use crate::peer::PeerId;
use crate::varint;
use crate::vector::VersionVector;
use crate::{digest, Result};

/// The possible orderings of two versions or version vectors.
///
/// `Older` and `Newer` are one-bit flags; their union is `Conflicting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrder {
    Same,
    Older,
    Newer,
    Conflicting,
}

impl VersionOrder {
    pub fn bits(self) -> u8 {
        match self {
            VersionOrder::Same => 0,
            VersionOrder::Older => 1,
            VersionOrder::Newer => 2,
            VersionOrder::Conflicting => 3,
        }
    }

    pub fn from_bits(bits: u8) -> VersionOrder {
        match bits & 3 {
            1 => VersionOrder::Older,
            2 => VersionOrder::Newer,
            3 => VersionOrder::Conflicting,
            _ => VersionOrder::Same,
        }
    }

    /// The order as seen from the other operand.
    pub fn reversed(self) -> VersionOrder {
        match self {
            VersionOrder::Older => VersionOrder::Newer,
            VersionOrder::Newer => VersionOrder::Older,
            other => other,
        }
    }
}

impl BitOr for VersionOrder {
    type Output = VersionOrder;

    fn bitor(self, rhs: VersionOrder) -> VersionOrder {
        VersionOrder::from_bits(self.bits() | rhs.bits())
    }
}

impl fmt::Display for VersionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionOrder::Same => "same",
            VersionOrder::Older => "older",
            VersionOrder::Newer => "newer",
            VersionOrder::Conflicting => "conflict",
        };
        f.write_str(name)
    }
}

/// The author of a version: a real peer, or a merge digest.
///
/// Digest authors appear only on generation-zero merge markers, which exist
/// solely to name a merged revision in rev-tree mode. They have no binary
/// form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Author {
    Peer(PeerId),
    Digest(String),
}

impl Author {
    pub fn is_me(&self) -> bool {
        matches!(self, Author::Peer(p) if p.is_me())
    }

    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Author::Peer(p) => Some(*p),
            Author::Digest(_) => None,
        }
    }
}

impl From<PeerId> for Author {
    fn from(peer: PeerId) -> Author {
        Author::Peer(peer)
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Author::Peer(p) => write!(f, "{p}"),
            Author::Digest(d) => f.write_str(d),
        }
    }
}

/// One element of a version vector.
///
/// The absolute ASCII form is `<hexGen>@<hexPeer>`; the relative form uses
/// `*` for the local peer. A merge marker is written `^<base64 digest>`.
/// The binary form is `varint(gen) varint(peer)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    gen: u64,
    author: Author,
}

impl Version {
    /// Build a version, validating the generation/author pairing.
    pub fn new(gen: u64, author: impl Into<Author>) -> Result<Version> {
        let v = Version { gen, author: author.into() };
        v.validate()?;
        Ok(v)
    }

    /// A generation-zero merge marker carrying a base64 SHA-1 digest.
    pub fn merge_marker(digest: String) -> Result<Version> {
        let v = Version { gen: 0, author: Author::Digest(digest) };
        v.validate()?;
        Ok(v)
    }

    fn validate(&self) -> Result<()> {
        match &self.author {
            Author::Peer(_) if self.gen == 0 => Err(Error::BadVersionVector),
            Author::Peer(_) => Ok(()),
            Author::Digest(d) if self.gen == 0 && digest::is_base64(d) => Ok(()),
            Author::Digest(_) => Err(Error::BadVersionVector),
        }
    }

    pub fn gen(&self) -> u64 {
        self.gen
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn is_merge(&self) -> bool {
        self.gen == 0
    }

    pub fn is_me(&self) -> bool {
        self.author.is_me()
    }

    /// Parse ASCII form. A concrete author equal to `my_peer` is rebound to
    /// the `ME` placeholder so renames cannot corrupt stored history.
    pub fn parse_ascii(s: &str, my_peer: PeerId) -> Result<Version> {
        if let Some(marker) = s.strip_prefix('^') {
            return Version::merge_marker(marker.to_owned());
        }
        let (gen_str, peer_str) = s.split_once('@').ok_or(Error::BadVersionVector)?;
        let gen = u64::from_str_radix(gen_str, 16).map_err(|_| Error::BadVersionVector)?;
        if gen == 0 {
            return Err(Error::BadVersionVector);
        }
        let mut peer = PeerId::parse_ascii(peer_str)?;
        if !my_peer.is_me() && peer == my_peer {
            peer = PeerId::ME;
        }
        Version::new(gen, peer)
    }

    /// Read binary form from the front of `data`, advancing past it.
    pub fn read_binary(data: &mut &[u8]) -> Result<Version> {
        let gen = varint::read_from(data).ok_or(Error::BadVersionVector)?;
        let peer = varint::read_from(data).ok_or(Error::BadVersionVector)?;
        Version::new(gen, PeerId(peer))
    }

    /// Append binary form to `out`, binding `ME` to `my_peer`.
    ///
    /// Merge markers have no binary form.
    pub fn write_binary(&self, out: &mut Vec<u8>, my_peer: PeerId) -> Result<()> {
        let Some(peer) = self.author.peer() else {
            return Err(Error::BadVersionVector);
        };
        let bound = if peer.is_me() { my_peer } else { peer };
        varint::write(out, self.gen);
        varint::write(out, bound.0);
        Ok(())
    }

    /// ASCII form, binding `ME` to `my_peer` unless `my_peer` is itself `ME`.
    pub fn ascii(&self, my_peer: PeerId) -> String {
        match &self.author {
            Author::Digest(d) => format!("^{d}"),
            Author::Peer(peer) => {
                let bound = if peer.is_me() { my_peer } else { *peer };
                format!("{:x}@{}", self.gen, bound)
            }
        }
    }

    /// Compare two generation counts.
    pub fn compare_gen(a: u64, b: u64) -> VersionOrder {
        match a.cmp(&b) {
            std::cmp::Ordering::Greater => VersionOrder::Newer,
            std::cmp::Ordering::Less => VersionOrder::Older,
            std::cmp::Ordering::Equal => VersionOrder::Same,
        }
    }

    /// Whether a vector whose current version is `self` is newer, older, or
    /// the same as `vector`. Never returns `Conflicting`.
    pub fn compare_to(&self, vector: &VersionVector) -> VersionOrder {
        vector.compare_to_version(self).reversed()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ascii(PeerId::ME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_bits() {
        assert_eq!(VersionOrder::Older | VersionOrder::Newer, VersionOrder::Conflicting);
        assert_eq!(VersionOrder::Same | VersionOrder::Newer, VersionOrder::Newer);
        assert_eq!(VersionOrder::Conflicting.reversed(), VersionOrder::Conflicting);
        assert_eq!(VersionOrder::Older.reversed(), VersionOrder::Newer);
    }

    #[test]
    fn test_parse_ascii() {
        assert_eq!(
            Version::parse_ascii("2@xyz", PeerId::ME),
            Err(Error::BadVersionVector)
        );

        let v = Version::parse_ascii("2@c0ffee", PeerId::ME).unwrap();
        assert_eq!(v.gen(), 2);
        assert_eq!(v.author().peer(), Some(PeerId(0xc0ffee)));

        let v = Version::parse_ascii("7b@*", PeerId::ME).unwrap();
        assert_eq!(v.gen(), 0x7b);
        assert!(v.is_me());
    }

    #[test]
    fn test_parse_rejects_zero_gen() {
        assert!(Version::parse_ascii("0@1a", PeerId::ME).is_err());
        assert!(Version::parse_ascii("@1a", PeerId::ME).is_err());
        assert!(Version::parse_ascii("2", PeerId::ME).is_err());
    }

    #[test]
    fn test_parse_binds_my_peer() {
        let me = PeerId(0xbeef);
        let v = Version::parse_ascii("3@beef", me).unwrap();
        assert!(v.is_me());
        // And an unrelated peer stays concrete:
        let v = Version::parse_ascii("3@feed", me).unwrap();
        assert_eq!(v.author().peer(), Some(PeerId(0xfeed)));
    }

    #[test]
    fn test_binary_round_trip() {
        let v = Version::new(0x1234, PeerId(0xabcd)).unwrap();
        let mut buf = Vec::new();
        v.write_binary(&mut buf, PeerId::ME).unwrap();
        let mut slice = buf.as_slice();
        assert_eq!(Version::read_binary(&mut slice).unwrap(), v);
        assert!(slice.is_empty());
    }

    #[test]
    fn test_binary_binds_me() {
        let v = Version::new(1, PeerId::ME).unwrap();
        let mut buf = Vec::new();
        v.write_binary(&mut buf, PeerId(0x42)).unwrap();
        let mut slice = buf.as_slice();
        let read = Version::read_binary(&mut slice).unwrap();
        assert_eq!(read.author().peer(), Some(PeerId(0x42)));
    }

    #[test]
    fn test_merge_marker_has_no_binary_form() {
        let marker = Version::merge_marker("YWJj".into()).unwrap();
        assert!(marker.is_merge());
        let mut buf = Vec::new();
        assert_eq!(marker.write_binary(&mut buf, PeerId::ME), Err(Error::BadVersionVector));
        assert_eq!(marker.ascii(PeerId::ME), "^YWJj");
    }

    #[test]
    fn test_ascii_binding() {
        let v = Version::new(0x1f, PeerId::ME).unwrap();
        assert_eq!(v.ascii(PeerId::ME), "1f@*");
        assert_eq!(v.ascii(PeerId(0xc0de)), "1f@c0de");
    }
}
