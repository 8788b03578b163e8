//! A single node of a revision tree.

use bytes::Bytes;
use strata_model::RevId;

bitflags::bitflags! {
    /// Per-revision flags.
    ///
    /// `NEW` and `PURGE` are transient: `NEW` marks revisions inserted since
    /// the last save, `PURGE` marks revisions scheduled for removal by the
    /// next compaction. Neither is persisted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RevFlags: u8 {
        const DELETED         = 0x01;
        const LEAF            = 0x02;
        const NEW             = 0x04;
        const HAS_ATTACHMENTS = 0x08;
        const KEEP_BODY       = 0x10;
        const IS_CONFLICT     = 0x20;
        const CLOSED          = 0x40;
        const PURGE           = 0x80;
    }
}

impl RevFlags {
    /// The subset a caller may request on insertion.
    pub const INSERTABLE: RevFlags = RevFlags::DELETED
        .union(RevFlags::CLOSED)
        .union(RevFlags::HAS_ATTACHMENTS)
        .union(RevFlags::KEEP_BODY);

    /// The subset written by the binary codec.
    pub const PERSISTENT: RevFlags = RevFlags::INSERTABLE
        .union(RevFlags::LEAF)
        .union(RevFlags::IS_CONFLICT);
}

/// Index of a revision in its tree's arena.
///
/// Stable across insertion and sorting; invalidated only by compaction,
/// which rewrites every stored index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevIdx(pub(crate) u32);

impl RevIdx {
    pub(crate) fn new(i: usize) -> RevIdx {
        RevIdx(i as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One revision in a tree.
#[derive(Debug, Clone)]
pub struct Rev {
    pub(crate) rev_id: RevId,
    pub(crate) parent: Option<RevIdx>,
    pub(crate) body: Option<Bytes>,
    pub(crate) sequence: u64,
    pub(crate) flags: RevFlags,
}

impl Rev {
    pub fn rev_id(&self) -> &RevId {
        &self.rev_id
    }

    pub fn parent(&self) -> Option<RevIdx> {
        self.parent
    }

    /// The revision body, if still stored.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Sequence assigned by the store at save time; 0 while unsaved.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn flags(&self) -> RevFlags {
        self.flags
    }

    pub fn is_leaf(&self) -> bool {
        self.flags.contains(RevFlags::LEAF)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(RevFlags::DELETED)
    }

    pub fn is_closed(&self) -> bool {
        self.flags.contains(RevFlags::CLOSED)
    }

    pub fn is_conflict(&self) -> bool {
        self.flags.contains(RevFlags::IS_CONFLICT)
    }

    pub fn is_new(&self) -> bool {
        self.flags.contains(RevFlags::NEW)
    }

    pub fn keeps_body(&self) -> bool {
        self.flags.contains(RevFlags::KEEP_BODY)
    }

    pub(crate) fn is_marked_for_purge(&self) -> bool {
        self.flags.contains(RevFlags::PURGE)
    }

    pub(crate) fn add_flag(&mut self, flag: RevFlags) {
        self.flags.insert(flag);
    }

    pub(crate) fn clear_flag(&mut self, flag: RevFlags) {
        self.flags.remove(flag);
    }
}
