//! Revision identifiers.
//!
//! There are two forms. **Digest form** is the rev-tree scheme: a generation
//! count and an MD5 (16-byte) or SHA-1 (20-byte) digest, `123-cafebabe…` in
//! ASCII, `varint(gen) || digest` in binary. **Version form** is the
//! version-vector scheme: a zero tag byte followed by one or more binary
//! versions, the same bytes a [`VersionVector`] serializes to, so a
//! version-form `RevId` can carry a whole vector, though only its first
//! (current) version is addressable through this API.
//!
//! Two revision IDs are equal iff their binary encodings are bytewise equal.

use std::cmp::Ordering;
use std::fmt;

use crate::error::Error;
use crate::peer::PeerId;
use crate::vector::{VersionVector, BINARY_TAG};
use crate::version::Version;
use crate::{varint, Result};

/// Longest supported digest, in bytes. Bounds stored rev IDs the way the
/// original format's fixed parse buffer did.
const MAX_DIGEST_LEN: usize = 40;

/// A revision identifier, stored in its binary encoding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RevId {
    bytes: Vec<u8>,
}

impl RevId {
    /// Build a digest-form rev ID.
    pub fn from_digest(gen: u64, digest: &[u8]) -> Result<RevId> {
        if gen == 0 || digest.is_empty() || digest.len() > MAX_DIGEST_LEN {
            return Err(Error::BadRevisionId);
        }
        let mut bytes = Vec::with_capacity(varint::size(gen) + digest.len());
        varint::write(&mut bytes, gen);
        bytes.extend_from_slice(digest);
        Ok(RevId { bytes })
    }

    /// Build a version-form rev ID from a single version.
    pub fn from_version(vers: &Version, my_peer: PeerId) -> Result<RevId> {
        let mut bytes = vec![BINARY_TAG];
        vers.write_binary(&mut bytes, my_peer)?;
        Ok(RevId { bytes })
    }

    /// Build a version-form rev ID carrying a whole vector.
    pub fn from_vector(vv: &VersionVector, my_peer: PeerId) -> Result<RevId> {
        if vv.is_empty() {
            return Err(Error::BadRevisionId);
        }
        Ok(RevId { bytes: vv.as_binary(my_peer)? })
    }

    /// Validate and take ownership of a binary encoding.
    pub fn from_binary(bytes: &[u8]) -> Result<RevId> {
        match bytes.first() {
            None => Err(Error::BadRevisionId),
            Some(&BINARY_TAG) => {
                let vv = VersionVector::from_binary(bytes).map_err(|_| Error::BadRevisionId)?;
                if vv.is_empty() {
                    return Err(Error::BadRevisionId);
                }
                Ok(RevId { bytes: bytes.to_vec() })
            }
            Some(_) => {
                let mut rest = bytes;
                let gen = varint::read_from(&mut rest).ok_or(Error::BadRevisionId)?;
                if gen == 0 || rest.is_empty() || rest.len() > MAX_DIGEST_LEN {
                    return Err(Error::BadRevisionId);
                }
                Ok(RevId { bytes: bytes.to_vec() })
            }
        }
    }

    /// Parse ASCII form: `<decimal gen>-<lowercase hex digest>` or a single
    /// `<hex gen>@<peer>` version. Will not parse a whole vector.
    pub fn parse_ascii(ascii: &str) -> Result<RevId> {
        if let Some((gen_str, hex_str)) = ascii.split_once('-') {
            let gen: u64 = gen_str.parse().map_err(|_| Error::BadRevisionId)?;
            if hex_str.is_empty()
                || hex_str.len() % 2 != 0
                || !hex_str.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f'))
            {
                return Err(Error::BadRevisionId);
            }
            let digest = hex::decode(hex_str).map_err(|_| Error::BadRevisionId)?;
            RevId::from_digest(gen, &digest)
        } else {
            if ascii.contains(',') {
                return Err(Error::BadRevisionId);
            }
            let vers = Version::parse_ascii(ascii, PeerId::ME).map_err(|_| Error::BadRevisionId)?;
            RevId::from_version(&vers, PeerId::ME).map_err(|_| Error::BadRevisionId)
        }
    }

    /// The binary encoding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// True for version form, false for digest form.
    pub fn is_version(&self) -> bool {
        self.bytes.first() == Some(&BINARY_TAG)
    }

    fn gen_and_digest(&self) -> Result<(u64, &[u8])> {
        if self.is_version() {
            return Err(Error::InvalidParameter("not a digest-form revision ID"));
        }
        let mut rest = self.bytes.as_slice();
        let gen = varint::read_from(&mut rest).ok_or(Error::CorruptRevisionData)?;
        Ok((gen, rest))
    }

    /// The generation count (of the current version, in version form).
    pub fn generation(&self) -> u64 {
        if self.is_version() {
            self.as_version().map_or(0, |v| v.gen())
        } else {
            self.gen_and_digest().map_or(0, |(gen, _)| gen)
        }
    }

    /// The digest bytes; digest form only. Length distinguishes MD5 (16)
    /// from SHA-1 (20).
    pub fn digest(&self) -> Result<&[u8]> {
        self.gen_and_digest().map(|(_, digest)| digest)
    }

    /// The current version; version form only.
    pub fn as_version(&self) -> Result<Version> {
        if !self.is_version() {
            return Err(Error::InvalidParameter("not a version-form revision ID"));
        }
        VersionVector::read_current_from_binary(&self.bytes).map_err(|_| Error::CorruptRevisionData)
    }

    /// The full version vector; version form only.
    pub fn as_vector(&self) -> Result<VersionVector> {
        if !self.is_version() {
            return Err(Error::InvalidParameter("not a version-form revision ID"));
        }
        VersionVector::from_binary(&self.bytes).map_err(|_| Error::CorruptRevisionData)
    }

    /// Expanded ASCII form, leaving the local peer as `*`.
    pub fn ascii(&self) -> String {
        self.ascii_with(PeerId::ME)
    }

    /// Expanded ASCII form, binding the local peer to `my_peer`.
    pub fn ascii_with(&self, my_peer: PeerId) -> String {
        if self.is_version() {
            match self.as_version() {
                Ok(vers) => vers.ascii(my_peer),
                Err(_) => String::new(),
            }
        } else {
            match self.gen_and_digest() {
                Ok((gen, digest)) => format!("{gen}-{}", hex::encode(digest)),
                Err(_) => String::new(),
            }
        }
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ascii())
    }
}

impl fmt::Debug for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevId({})", self.ascii())
    }
}

impl PartialOrd for RevId {
    fn partial_cmp(&self, other: &RevId) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority order: digest form sorts by generation then digest bytes, the
/// order the rev-tree sort relies on. Version form compares its current
/// version and sorts after all digest-form IDs.
impl Ord for RevId {
    fn cmp(&self, other: &RevId) -> Ordering {
        match (self.is_version(), other.is_version()) {
            (false, false) => {
                let (my_gen, my_digest) = self.gen_and_digest().unwrap_or((0, &[]));
                let (other_gen, other_digest) = other.gen_and_digest().unwrap_or((0, &[]));
                my_gen.cmp(&other_gen).then_with(|| my_digest.cmp(other_digest))
            }
            (true, true) => self.bytes[1..].cmp(&other.bytes[1..]),
            (mine, _) => mine.cmp(&other.is_version()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_ascii_round_trip() {
        let id = RevId::parse_ascii("3-deadbeef").unwrap();
        assert!(!id.is_version());
        assert_eq!(id.generation(), 3);
        assert_eq!(id.digest().unwrap(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id.ascii(), "3-deadbeef");
        assert_eq!(RevId::from_binary(id.as_bytes()).unwrap(), id);
    }

    #[test]
    fn test_digest_ascii_rejects_malformed() {
        for bad in [
            "0-aa",       // zero generation
            "3-",         // empty digest
            "3-abc",      // odd hex length
            "3-DEADBEEF", // uppercase hex
            "x-aa",       // non-decimal generation
            "3-zz",       // non-hex digest
        ] {
            assert_eq!(RevId::parse_ascii(bad), Err(Error::BadRevisionId), "{bad}");
        }
    }

    #[test]
    fn test_version_ascii_round_trip() {
        let id = RevId::parse_ascii("7b@cafebabe").unwrap();
        assert!(id.is_version());
        assert_eq!(id.generation(), 0x7b);
        assert_eq!(id.ascii(), "7b@cafebabe");
        let vers = id.as_version().unwrap();
        assert_eq!(vers.author().peer(), Some(PeerId(0xcafebabe)));
        assert_eq!(RevId::from_binary(id.as_bytes()).unwrap(), id);
    }

    #[test]
    fn test_version_form_refuses_digest_accessors() {
        let id = RevId::parse_ascii("7b@*").unwrap();
        assert!(id.digest().is_err());
        let id = RevId::parse_ascii("2-abcd").unwrap();
        assert!(id.as_version().is_err());
        assert!(id.as_vector().is_err());
    }

    #[test]
    fn test_ascii_will_not_parse_a_vector() {
        assert_eq!(RevId::parse_ascii("2@aa,1@bb"), Err(Error::BadRevisionId));
    }

    #[test]
    fn test_vector_round_trip() {
        let vv = VersionVector::from_ascii("2@aa,1@bb", PeerId::ME).unwrap();
        let id = RevId::from_vector(&vv, PeerId::ME).unwrap();
        assert!(id.is_version());
        // The API exposes only the current version...
        assert_eq!(id.generation(), 2);
        assert_eq!(id.ascii(), "2@aa");
        // ...but the whole vector is recoverable:
        assert_eq!(id.as_vector().unwrap().count(), 2);
    }

    #[test]
    fn test_binary_validation() {
        assert!(RevId::from_binary(&[]).is_err());
        // Digest form with zero generation:
        assert!(RevId::from_binary(&[0x80]).is_err());
        // Version form with truncated varints:
        assert!(RevId::from_binary(&[0, 0x81]).is_err());
        // Bare tag byte with no versions:
        assert!(RevId::from_binary(&[0]).is_err());
    }

    #[test]
    fn test_equality_is_bytewise() {
        let a = RevId::parse_ascii("2-abcd").unwrap();
        let b = RevId::from_digest(2, &[0xab, 0xcd]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, RevId::from_digest(2, &[0xab, 0xce]).unwrap());
    }

    #[test]
    fn test_ordering_generation_then_digest() {
        let low = RevId::parse_ascii("2-ff").unwrap();
        let high = RevId::parse_ascii("10-00").unwrap();
        assert!(low < high); // generation dominates the digest
        let a = RevId::parse_ascii("2-aa").unwrap();
        let b = RevId::parse_ascii("2-bb").unwrap();
        assert!(a < b);
    }
}
