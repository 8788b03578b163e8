//! The KV row shape and its on-disk encoding.

use bytes::Bytes;
use strata_model::{varint, Error};

bitflags::bitflags! {
    /// Document-level flags, rolled up from the stored revisions.
    ///
    /// `SYNCED` is a fast-path marker set when the current revision was
    /// pushed to the default remote without rewriting the record body; it is
    /// folded into the remote map the next time the document is loaded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DocumentFlags: u8 {
        const DELETED         = 0x01;
        const CONFLICTED      = 0x02;
        const HAS_ATTACHMENTS = 0x04;
        const SYNCED          = 0x08;
    }
}

/// How much of a record was materialized by a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContentLevel {
    /// Key, flags, version, sequence only.
    MetaOnly,
    /// Metadata plus the current revision body.
    CurrentRev,
    /// Everything, including the "extra" column.
    Entire,
}

/// One row of the document table.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: String,
    pub flags: DocumentFlags,
    pub body: Bytes,
    pub extra: Bytes,
    /// Binary revision ID (tree mode) or binary version vector (vector mode).
    pub version: Vec<u8>,
    pub sequence: u64,
    pub exists: bool,
    pub content: ContentLevel,
}

impl Record {
    /// An empty, never-saved record for `key`.
    pub fn new(key: impl Into<String>) -> Record {
        Record {
            key: key.into(),
            flags: DocumentFlags::empty(),
            body: Bytes::new(),
            extra: Bytes::new(),
            version: Vec::new(),
            sequence: 0,
            exists: false,
            content: ContentLevel::Entire,
        }
    }
}

/// The write shape handed to [`crate::KeyStore::set`].
///
/// `sequence` is the base the caller read; the store refuses the write when
/// it no longer matches the stored row. `update_sequence` asks the store to
/// assign a fresh sequence (a real edit) rather than keep the base (a
/// metadata-only rewrite).
#[derive(Debug, Clone)]
pub struct RecordUpdate<'a> {
    pub key: &'a str,
    pub flags: DocumentFlags,
    pub body: &'a [u8],
    pub extra: &'a [u8],
    pub version: &'a [u8],
    pub sequence: u64,
    pub update_sequence: bool,
}

/// Encode a row value: flags, sequence, then length-prefixed version, body
/// and extra.
pub(crate) fn encode_row(update: &RecordUpdate<'_>, sequence: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        16 + update.version.len() + update.body.len() + update.extra.len(),
    );
    out.push(update.flags.bits());
    varint::write(&mut out, sequence);
    varint::write(&mut out, update.version.len() as u64);
    out.extend_from_slice(update.version);
    varint::write(&mut out, update.body.len() as u64);
    out.extend_from_slice(update.body);
    varint::write(&mut out, update.extra.len() as u64);
    out.extend_from_slice(update.extra);
    out
}

/// Decode a row value into a `Record`, materializing only up to `level`.
pub(crate) fn decode_row(key: &str, value: &[u8], level: ContentLevel) -> Result<Record, Error> {
    let mut data = value;
    let (&flag_bits, rest) = data.split_first().ok_or(Error::CorruptRevisionData)?;
    data = rest;
    let flags = DocumentFlags::from_bits(flag_bits).ok_or(Error::CorruptRevisionData)?;
    let sequence = varint::read_from(&mut data).ok_or(Error::CorruptRevisionData)?;

    let version = read_chunk(&mut data)?.to_vec();
    let body = read_chunk(&mut data)?;
    let body = if level >= ContentLevel::CurrentRev {
        Bytes::copy_from_slice(body)
    } else {
        Bytes::new()
    };
    let extra = read_chunk(&mut data)?;
    let extra = if level >= ContentLevel::Entire {
        Bytes::copy_from_slice(extra)
    } else {
        Bytes::new()
    };
    if !data.is_empty() {
        return Err(Error::CorruptRevisionData);
    }

    Ok(Record {
        key: key.to_owned(),
        flags,
        body,
        extra,
        version,
        sequence,
        exists: true,
        content: level,
    })
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
