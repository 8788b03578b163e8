//! Vector-mode revisions and the record "extra" codec that stores the
//! per-remote revision map.

use std::collections::BTreeMap;

use strata_model::{varint, Error, RemoteId, Version, VersionVector};
use strata_store::body::{encode_dict, parse_dict, Dict};
use strata_store::{DocumentFlags, Record};

use crate::Result;

/// One revision of a vector-mode document: a binary version vector, decoded
/// properties, and its flags (`DELETED`, `HAS_ATTACHMENTS`, `CONFLICTED`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Revision {
    /// Binary version vector; empty when the slot holds no revision yet.
    pub rev_id: Vec<u8>,
    pub properties: Dict,
    pub flags: DocumentFlags,
}

impl Revision {
    /// The current (first) version of this revision's vector.
    pub fn version(&self) -> Result<Version> {
        Ok(VersionVector::read_current_from_binary(&self.rev_id)?)
    }

    /// The full version vector.
    pub fn vector(&self) -> Result<VersionVector> {
        Ok(VersionVector::from_binary(&self.rev_id)?)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(DocumentFlags::DELETED)
    }

    pub fn is_conflicted(&self) -> bool {
        self.flags.contains(DocumentFlags::CONFLICTED)
    }

    pub fn has_attachments(&self) -> bool {
        self.flags.contains(DocumentFlags::HAS_ATTACHMENTS)
    }
}

/// Encode the remote-revision map as record "extra" bytes: a count, then
/// `(remote, revid, flags, properties)` entries in ascending remote order.
/// The local revision is never stored here.
pub fn encode_remotes(remotes: &BTreeMap<RemoteId, Revision>) -> Vec<u8> {
    if remotes.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    varint::write(&mut out, remotes.len() as u64);
    for (remote, rev) in remotes {
        varint::write(&mut out, u64::from(remote.0));
        varint::write(&mut out, rev.rev_id.len() as u64);
        out.extend_from_slice(&rev.rev_id);
        out.push(rev.flags.bits());
        let props = encode_dict(&rev.properties);
        varint::write(&mut out, props.len() as u64);
        out.extend_from_slice(&props);
    }
    out
}

/// Decode record "extra" bytes back into the remote-revision map.
pub fn decode_remotes(extra: &[u8]) -> Result<BTreeMap<RemoteId, Revision>> {
    let mut remotes = BTreeMap::new();
    if extra.is_empty() {
        return Ok(remotes);
    }
    let mut data = extra;
    let count = varint::read_from(&mut data).ok_or(Error::CorruptRevisionData)?;
    for _ in 0..count {
        let (remote, rev_id, flags, props) = read_entry(&mut data)?;
        let properties = if props.is_empty() {
            Dict::new()
        } else {
            parse_dict(props, true)?
        };
        remotes.insert(remote, Revision { rev_id: rev_id.to_vec(), properties, flags });
    }
    if !data.is_empty() {
        return Err(Error::CorruptRevisionData.into());
    }
    Ok(remotes)
}

/// Walk every revision ID a stored record carries, without decoding
/// revision bodies: the local one from the `version` column, then each
/// remote from `extra`.
/// revision bodies.
pub fn for_each_rev_id<F>(record: &Record, mut f: F) -> Result<()>
where
    F: FnMut(&[u8], RemoteId) -> Result<()>,
{
    if !record.version.is_empty() {
        f(&record.version, RemoteId::LOCAL)?;
    }
    if record.extra.is_empty() {
        return Ok(());
    }
    let mut data: &[u8] = &record.extra;
    let count = varint::read_from(&mut data).ok_or(Error::CorruptRevisionData)?;
    for _ in 0..count {
        let (remote, rev_id, _, _) = read_entry(&mut data)?;
        f(rev_id, remote)?;
    }
    Ok(())
}

fn read_entry<'a>(data: &mut &'a [u8]) -> Result<(RemoteId, &'a [u8], DocumentFlags, &'a [u8])> {
    let remote = varint::read_from(data).ok_or(Error::CorruptRevisionData)?;
    let remote = u32::try_from(remote).map_err(|_| Error::CorruptRevisionData)?;
    if remote == 0 {
        return Err(Error::CorruptRevisionData.into());
    }
    let rev_id = read_chunk(data)?;
    let (&flag_bits, rest) = data.split_first().ok_or(Error::CorruptRevisionData)?;
    *data = rest;
    let flags = DocumentFlags::from_bits(flag_bits).ok_or(Error::CorruptRevisionData)?;
    let props = read_chunk(data)?;
    Ok((RemoteId(remote), rev_id, flags, props))
}

fn read_chunk<'a>(data: &mut &'a [u8]) -> Result<&'a [u8], Error> {
    let len = varint::read_from(data).ok_or(Error::CorruptRevisionData)? as usize;
    if len > data.len() {
        return Err(Error::CorruptRevisionData);
    }
    let (chunk, rest) = data.split_at(len);
    *data = rest;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_model::PeerId;

    fn rev(vector: &str, props: &str, flags: DocumentFlags) -> Revision {
        let vv = VersionVector::from_ascii(vector, PeerId::ME).unwrap();
        Revision {
            rev_id: vv.as_binary(PeerId::ME).unwrap(),
            properties: parse_dict(props.as_bytes(), false).unwrap(),
            flags,
        }
    }

    #[test]
    fn test_remotes_round_trip() {
        let mut remotes = BTreeMap::new();
        remotes.insert(RemoteId(1), rev("2@aa", "{\"n\":1}", DocumentFlags::empty()));
        remotes.insert(
            RemoteId(3),
            rev("1@bb,1@aa", "{\"n\":2}", DocumentFlags::CONFLICTED | DocumentFlags::DELETED),
        );

        let extra = encode_remotes(&remotes);
        let decoded = decode_remotes(&extra).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[&RemoteId(1)], remotes[&RemoteId(1)]);
        assert!(decoded[&RemoteId(3)].is_conflicted());
        assert_eq!(decoded[&RemoteId(3)].vector().unwrap().count(), 2);
    }

    #[test]
    fn test_empty_map_is_empty_extra() {
        assert!(encode_remotes(&BTreeMap::new()).is_empty());
        assert!(decode_remotes(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_extra_is_corrupt() {
        let mut remotes = BTreeMap::new();
        remotes.insert(RemoteId(1), rev("2@aa", "{}", DocumentFlags::empty()));
        let extra = encode_remotes(&remotes);
        assert!(decode_remotes(&extra[..extra.len() - 1]).is_err());
    }

    #[test]
    fn test_for_each_rev_id() {
        let mut remotes = BTreeMap::new();
        remotes.insert(RemoteId(2), rev("2@aa", "{}", DocumentFlags::empty()));
        let mut record = Record::new("doc");
        record.version = VersionVector::from_ascii("3@*", PeerId::ME)
            .unwrap()
            .as_binary(PeerId::ME)
            .unwrap();
        record.extra = encode_remotes(&remotes).into();

        let mut seen = Vec::new();
        for_each_rev_id(&record, |rev_id, remote| {
            seen.push((remote, rev_id.to_vec()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, RemoteId::LOCAL);
        assert_eq!(seen[1].0, RemoteId(2));
    }
}
