//! Packed binary codec for a revision tree, the format of the record
//! "extra" column in rev-tree mode.
//!
//! Layout: a varint revision count, then one packed record per revision in
//! priority order (flags byte, length-prefixed revision ID, parent link as
//! encoded position + 1 with 0 for none, sequence, and an optional
//! length-prefixed body), then a varint remote count and one
//! `(remote, position)` varint pair per remote pointer.
//!
//! The current (first) revision's body is not stored here; it lives in the
//! record body column and is reattached on decode. Decoded bodies are
//! `Bytes` slices aliasing the source buffer, so they stay valid and cheap
//! for as long as any reader holds them.

use std::collections::BTreeMap;

use bytes::Bytes;
use strata_model::{varint, Error, RemoteId, RevId};

use crate::rev::{Rev, RevFlags, RevIdx};

/// Wire bit marking a record that carries a body. Shares the bit of the
/// transient `PURGE` flag, which is never persisted.
const HAS_BODY: u8 = 0x80;

/// Encode the tree. Returns the "extra" bytes and the current revision's
/// body (destined for the record body column).
pub fn encode(
    revs: &[Rev],
    order: &[RevIdx],
    remote_revs: &BTreeMap<RemoteId, RevIdx>,
) -> (Vec<u8>, Option<Bytes>) {
    debug_assert_eq!(revs.len(), order.len());
    if revs.is_empty() {
        return (Vec::new(), None);
    }

    // Map arena indices to encoded positions:
    let mut position = vec![0usize; revs.len()];
    for (pos, idx) in order.iter().enumerate() {
        position[idx.index()] = pos;
    }

    let mut out = Vec::new();
    varint::write(&mut out, revs.len() as u64);
    for (pos, idx) in order.iter().enumerate() {
        let rev = &revs[idx.index()];
        let body = if pos == 0 { None } else { rev.body() };
        let mut flags = (rev.flags() & RevFlags::PERSISTENT).bits();
        if body.is_some() {
            flags |= HAS_BODY;
        }
        out.push(flags);
        varint::write(&mut out, rev.rev_id().as_bytes().len() as u64);
        out.extend_from_slice(rev.rev_id().as_bytes());
        let parent = rev.parent().map_or(0, |p| position[p.index()] as u64 + 1);
        varint::write(&mut out, parent);
        varint::write(&mut out, rev.sequence());
        if let Some(body) = body {
            varint::write(&mut out, body.len() as u64);
            out.extend_from_slice(body);
        }
    }

    varint::write(&mut out, remote_revs.len() as u64);
    for (remote, idx) in remote_revs {
        varint::write(&mut out, u64::from(remote.0));
        varint::write(&mut out, position[idx.index()] as u64);
    }

    let current_body = revs[order[0].index()].body().cloned();
    (out, current_body)
}

/// Decode a tree from "extra" bytes. Revisions come back in their encoded
/// (priority) order; revisions stored without a per-revision sequence get
/// the record's `sequence`.
pub fn decode(extra: &Bytes, sequence: u64) -> Result<(Vec<Rev>, BTreeMap<RemoteId, RevIdx>), Error> {
    if extra.is_empty() {
        return Ok((Vec::new(), BTreeMap::new()));
    }
    let mut reader = Reader { buf: extra, pos: 0 };

    let count = reader.varint()? as usize;
    if count > extra.len() {
        return Err(Error::CorruptRevisionData);
    }
    let mut revs = Vec::with_capacity(count);
    for _ in 0..count {
        let wire_flags = reader.byte()?;
        let flags = RevFlags::from_bits(wire_flags & !HAS_BODY).ok_or(Error::CorruptRevisionData)?;
        if !RevFlags::PERSISTENT.contains(flags) {
            return Err(Error::CorruptRevisionData);
        }
        let id_len = reader.varint()? as usize;
        let rev_id = RevId::from_binary(&reader.slice(id_len)?).map_err(|_| Error::CorruptRevisionData)?;
        let parent = match reader.varint()? as usize {
            0 => None,
            p if p <= count => Some(RevIdx::new(p - 1)),
            _ => return Err(Error::CorruptRevisionData),
        };
        let rev_sequence = match reader.varint()? {
            0 => sequence,
            s => s,
        };
        let body = if wire_flags & HAS_BODY != 0 {
            let len = reader.varint()? as usize;
            Some(reader.slice(len)?)
        } else {
            None
        };
        revs.push(Rev { rev_id, parent, body, sequence: rev_sequence, flags });
    }

    // Parent links must form a forest:
    for start in 0..count {
        let mut steps = 0;
        let mut cur = revs[start].parent;
        while let Some(idx) = cur {
            steps += 1;
            if steps > count {
                return Err(Error::CorruptRevisionData);
            }
            cur = revs[idx.index()].parent;
        }
    }

    let mut remote_revs = BTreeMap::new();
    let remote_count = reader.varint()? as usize;
    for _ in 0..remote_count {
        let remote = u32::try_from(reader.varint()?).map_err(|_| Error::CorruptRevisionData)?;
        let pos = reader.varint()? as usize;
        if remote == 0 || pos >= count {
            return Err(Error::CorruptRevisionData);
        }
        remote_revs.insert(RemoteId(remote), RevIdx::new(pos));
    }
    if reader.pos != extra.len() {
        return Err(Error::CorruptRevisionData);
    }

    Ok((revs, remote_revs))
}

struct Reader<'a> {
    buf: &'a Bytes,
    pos: usize,
}

impl Reader<'_> {
    fn varint(&mut self) -> Result<u64, Error> {
        let (value, used) = varint::read(&self.buf[self.pos..]).ok_or(Error::CorruptRevisionData)?;
        self.pos += used;
        Ok(value)
    }

    fn byte(&mut self) -> Result<u8, Error> {
        let b = *self.buf.get(self.pos).ok_or(Error::CorruptRevisionData)?;
        self.pos += 1;
        Ok(b)
    }

    /// A zero-copy slice of the source buffer.
    fn slice(&mut self, len: usize) -> Result<Bytes, Error> {
        if len > self.buf.len() - self.pos {
            return Err(Error::CorruptRevisionData);
        }
        let out = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }
}
