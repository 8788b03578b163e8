//! The revision tree: insertion, pruning, purging, sorting, conflicts.

use std::collections::BTreeMap;

use bytes::Bytes;
use strata_model::{Error, RemoteId, RevId};
use thiserror::Error;

use crate::rev::{Rev, RevFlags, RevIdx};
use crate::{raw, DEFAULT_PRUNE_DEPTH};

/// Successful insertion outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// A new revision was added to the tree.
    Created(RevIdx),
    /// A revision with this ID already exists; nothing changed.
    Existing,
}

/// Rejected insertion. Maps onto the HTTP-like codes the engine surfaces
/// at its boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    #[error("revision generation out of sequence")]
    BadGeneration,
    #[error("parent revision not found")]
    ParentNotFound,
    #[error("revision would create a conflict")]
    Conflict,
}

impl InsertError {
    pub fn http_status(self) -> u16 {
        match self {
            InsertError::BadGeneration => 400,
            InsertError::ParentNotFound => 404,
            InsertError::Conflict => 409,
        }
    }
}

/// A tree of revisions linked by parent indices.
///
/// The arena (`revs`) owns every revision; `order` is the iteration order,
/// kept in priority order while `sorted` is true. `remote_revs` pins the
/// last-known revision per remote; pinned revisions survive pruning.
#[derive(Debug, Clone, Default)]
pub struct RevTree {
    revs: Vec<Rev>,
    order: Vec<RevIdx>,
    remote_revs: BTreeMap<RemoteId, RevIdx>,
    sorted: bool,
    changed: bool,
    unknown: bool,
    prune_depth: u32,
}

impl RevTree {
    pub fn new() -> RevTree {
        RevTree {
            sorted: true,
            prune_depth: DEFAULT_PRUNE_DEPTH,
            ..RevTree::default()
        }
    }

    /// A placeholder for a record whose tree data was not loaded. Most
    /// queries on an unloaded tree are programming errors and panic.
    pub fn unloaded() -> RevTree {
        RevTree { unknown: true, ..RevTree::new() }
    }

    /// Decode a tree from a record's "extra" data. The current revision's
    /// body lives in the record body column, not in `extra`, and is
    /// reattached here. `sequence` is the record's sequence, applied to
    /// revisions stored before per-revision sequences were assigned.
    pub fn decode(extra: &Bytes, current_body: Option<Bytes>, sequence: u64) -> Result<RevTree, Error> {
        let (mut revs, remote_revs) = raw::decode(extra, sequence)?;
        if let Some(body) = current_body {
            if let Some(first) = revs.first_mut() {
                first.body = Some(body);
            }
        }
        let order = (0..revs.len()).map(RevIdx::new).collect();
        Ok(RevTree {
            revs,
            order,
            remote_revs,
            sorted: false,
            changed: false,
            unknown: false,
            prune_depth: DEFAULT_PRUNE_DEPTH,
        })
    }

    /// Encode for storage: the "extra" bytes, and the current revision's
    /// body to be written to the record body column. Sorts first so the
    /// current revision is the first encoded.
    pub fn encode(&mut self) -> (Vec<u8>, Option<Bytes>) {
        assert!(!self.unknown, "encoding an unloaded revision tree");
        self.sort();
        raw::encode(&self.revs, &self.order, &self.remote_revs)
    }

    // ---- Accessors:

    pub fn len(&self) -> usize {
        self.revs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    /// True when the record's tree data was never loaded.
    pub fn is_unknown(&self) -> bool {
        self.unknown
    }

    pub fn prune_depth(&self) -> u32 {
        self.prune_depth
    }

    pub fn set_prune_depth(&mut self, depth: u32) {
        assert!(depth > 0);
        self.prune_depth = depth;
    }

    pub fn rev(&self, idx: RevIdx) -> &Rev {
        &self.revs[idx.index()]
    }

    fn rev_mut(&mut self, idx: RevIdx) -> &mut Rev {
        &mut self.revs[idx.index()]
    }

    /// The highest-priority revision. Sorts if needed.
    pub fn current(&mut self) -> Option<RevIdx> {
        assert!(!self.unknown, "querying an unloaded revision tree");
        self.sort();
        self.order.first().copied()
    }

    /// Look up a revision by ID.
    pub fn get(&self, rev_id: &RevId) -> Option<RevIdx> {
        let found = self.revs.iter().position(|r| &r.rev_id == rev_id);
        assert!(found.is_some() || !self.unknown, "querying an unloaded revision tree");
        found.map(RevIdx::new)
    }

    pub fn get_by_sequence(&self, sequence: u64) -> Option<RevIdx> {
        let found = self.revs.iter().position(|r| r.sequence == sequence);
        assert!(found.is_some() || !self.unknown, "querying an unloaded revision tree");
        found.map(RevIdx::new)
    }

    /// Revisions in priority order (only meaningful after [`RevTree::sort`]).
    pub fn in_order(&self) -> impl Iterator<Item = RevIdx> + '_ {
        self.order.iter().copied()
    }

    /// The revision after `idx` in priority order.
    pub fn next_in_order(&self, idx: RevIdx) -> Option<RevIdx> {
        let pos = self.order.iter().position(|&i| i == idx)?;
        self.order.get(pos + 1).copied()
    }

    /// Walk from `idx` to its root, inclusive.
    pub fn history(&self, idx: RevIdx) -> Vec<RevIdx> {
        let mut chain = Vec::new();
        let mut cur = Some(idx);
        while let Some(i) = cur {
            chain.push(i);
            cur = self.rev(i).parent;
        }
        chain
    }

    pub fn is_ancestor_of(&self, ancestor: RevIdx, idx: RevIdx) -> bool {
        let mut cur = Some(idx);
        while let Some(i) = cur {
            if i == ancestor {
                return true;
            }
            cur = self.rev(i).parent;
        }
        false
    }

    /// Deepest revision on `b`'s branch that is also an ancestor of `a`.
    pub fn common_ancestor(&self, a: RevIdx, b: RevIdx) -> Option<RevIdx> {
        let mut cur = Some(b);
        while let Some(i) = cur {
            if self.is_ancestor_of(i, a) {
                return Some(i);
            }
            cur = self.rev(i).parent;
        }
        None
    }

    // ---- Conflicts:

    /// Active revisions contribute to conflicts: a leaf that is either not
    /// deleted, or is some remote's latest revision. Deleted leaves cap
    /// conflicting branches, but a deletion that a server considers current
    /// still counts.
    pub fn is_active(&self, idx: RevIdx) -> bool {
        let rev = self.rev(idx);
        rev.is_leaf() && (!rev.is_deleted() || self.is_latest_remote_revision(idx))
    }

    /// More than one active leaf?
    pub fn has_conflict(&self) -> bool {
        if self.revs.len() < 2 {
            assert!(!self.unknown, "querying an unloaded revision tree");
            return false;
        }
        if self.sorted {
            self.is_active(self.order[1])
        } else {
            let mut active = 0;
            for i in 0..self.revs.len() {
                if self.is_active(RevIdx::new(i)) {
                    active += 1;
                    if active > 1 {
                        return true;
                    }
                }
            }
            false
        }
    }

    pub fn is_latest_remote_revision(&self, idx: RevIdx) -> bool {
        self.remote_revs.values().any(|&i| i == idx)
    }

    pub fn latest_revision_on_remote(&self, remote: RemoteId) -> Option<RevIdx> {
        assert!(!remote.is_local());
        self.remote_revs.get(&remote).copied()
    }

    /// Record (or with `None`, erase) a remote's last-known revision.
    pub fn set_latest_revision_on_remote(&mut self, remote: RemoteId, rev: Option<RevIdx>) {
        assert!(!remote.is_local());
        match rev {
            Some(idx) => {
                self.remote_revs.insert(remote, idx);
            }
            None => {
                self.remote_revs.remove(&remote);
            }
        }
        self.changed = true;
    }

    pub fn remote_revisions(&self) -> &BTreeMap<RemoteId, RevIdx> {
        &self.remote_revs
    }

    // ---- Insertion:

    /// Lowest-level insert. No sanity checks; always inserts.
    fn raw_insert(
        &mut self,
        rev_id: RevId,
        body: Option<Bytes>,
        flags: RevFlags,
        parent: Option<RevIdx>,
        mark_conflict: bool,
    ) -> RevIdx {
        assert!(!self.unknown, "inserting into an unloaded revision tree");
        let flags = flags & RevFlags::INSERTABLE;
        assert!(
            !flags.contains(RevFlags::CLOSED) || flags.contains(RevFlags::DELETED),
            "a closed revision must be a deletion"
        );

        let was_empty = self.revs.is_empty();
        let idx = RevIdx::new(self.revs.len());
        self.revs.push(Rev {
            rev_id,
            parent,
            body,
            sequence: 0,
            flags: RevFlags::LEAF | RevFlags::NEW | flags,
        });
        self.order.push(idx);

        if let Some(parent) = parent {
            // Extending (or branching off) an existing revision:
            if mark_conflict && (!self.rev(parent).is_leaf() || self.rev(parent).is_conflict()) {
                self.rev_mut(idx).add_flag(RevFlags::IS_CONFLICT);
            }
            self.rev_mut(parent).clear_flag(RevFlags::LEAF);
            if flags.contains(RevFlags::KEEP_BODY) {
                self.keep_body(idx);
            } else if flags.contains(RevFlags::CLOSED) {
                // No bodies on a closed conflict branch.
                self.remove_bodies_on_branch(parent);
            }
        } else if mark_conflict && !was_empty {
            // Creating a second root.
            self.rev_mut(idx).add_flag(RevFlags::IS_CONFLICT);
        }

        self.changed = true;
        if !was_empty {
            self.sorted = false;
        }
        idx
    }

    /// Insert a single revision.
    ///
    /// The parent (when given) must exist, and must be a leaf unless
    /// `allow_conflict`; the new revision's generation must be exactly one
    /// past its parent's. Inserting an ID that is already present is a
    /// no-op reported as [`Inserted::Existing`].
    pub fn insert(
        &mut self,
        rev_id: RevId,
        body: Option<Bytes>,
        flags: RevFlags,
        parent_id: Option<&RevId>,
        allow_conflict: bool,
        mark_conflict: bool,
    ) -> Result<Inserted, InsertError> {
        let gen = rev_id.generation();
        if gen == 0 {
            return Err(InsertError::BadGeneration);
        }
        if self.get(&rev_id).is_some() {
            return Ok(Inserted::Existing);
        }

        let parent = match parent_id {
            Some(id) => Some(self.get(id).ok_or(InsertError::ParentNotFound)?),
            None => None,
        };
        let parent_gen = match parent {
            Some(idx) => {
                if !allow_conflict && !self.rev(idx).is_leaf() {
                    return Err(InsertError::Conflict);
                }
                self.rev(idx).rev_id.generation()
            }
            None => {
                if !allow_conflict && !self.revs.is_empty() {
                    return Err(InsertError::Conflict);
                }
                0
            }
        };
        if gen != parent_gen + 1 {
            return Err(InsertError::BadGeneration);
        }

        Ok(Inserted::Created(self.raw_insert(rev_id, body, flags, parent, mark_conflict)))
    }

    /// Locate the deepest element of `history` (newest → oldest) already in
    /// the tree. Generation gaps are tolerated only at depths the prune
    /// limit would discard anyway, which lets replicators elide middle
    /// revisions of very long histories.
    fn find_common_ancestor(
        &self,
        history: &[RevId],
        allow_conflict: bool,
    ) -> Result<(Option<RevIdx>, usize), InsertError> {
        assert!(!history.is_empty());
        let mut last_gen: u64 = 0;
        let mut parent = None;
        let mut index = history.len();
        for (i, rev_id) in history.iter().enumerate() {
            let gen = rev_id.generation();
            if last_gen > 0 && gen != last_gen - 1 {
                // Generation numbers not in sequence:
                if !(gen < last_gen && i >= (self.prune_depth as usize).saturating_sub(1)) {
                    return Err(InsertError::BadGeneration);
                }
            }
            last_gen = gen;

            if let Some(found) = self.get(rev_id) {
                parent = Some(found);
                index = i;
                break;
            }
        }

        if !allow_conflict {
            let rejects = match parent {
                Some(idx) => !self.rev(idx).is_leaf(),
                None => !self.revs.is_empty(),
            };
            if rejects {
                return Err(InsertError::Conflict);
            }
        }
        Ok((parent, index))
    }

    /// Insert a revision along with its ancestry (`history[0]` is the new
    /// revision, the rest its ancestors, newest first). Placeholders without
    /// bodies are created for the unknown middle of the history. Returns the
    /// index of the common ancestor, 0 if everything was already present.
    pub fn insert_history(
        &mut self,
        history: &[RevId],
        body: Option<Bytes>,
        flags: RevFlags,
        allow_conflict: bool,
        mark_conflict: bool,
    ) -> Result<usize, InsertError> {
        let (mut parent, index) = self.find_common_ancestor(history, allow_conflict)?;
        if index > 0 && body.is_some() {
            // Insert the new revisions in chronological order:
            for i in (1..index).rev() {
                parent = Some(self.raw_insert(
                    history[i].clone(),
                    None,
                    RevFlags::empty(),
                    parent,
                    mark_conflict,
                ));
            }
            self.raw_insert(history[0].clone(), body, flags, parent, mark_conflict);
        }
        Ok(index)
    }

    // ---- Body retention:

    /// Mark `idx` as the one revision on its branch whose body survives
    /// pruning. Clears the flag from same-branch ancestors; a branch is
    /// bounded by the first transition out of conflict revisions.
    pub fn keep_body(&mut self, idx: RevIdx) {
        self.rev_mut(idx).add_flag(RevFlags::KEEP_BODY);
        let conflict = self.rev(idx).is_conflict();
        let mut cur = self.rev(idx).parent;
        while let Some(i) = cur {
            if conflict && !self.rev(i).is_conflict() {
                break;
            }
            self.rev_mut(i).clear_flag(RevFlags::KEEP_BODY);
            cur = self.rev(i).parent;
        }
        self.changed = true;
    }

    pub fn remove_body(&mut self, idx: RevIdx) {
        if self.rev(idx).body.is_some() {
            self.rev_mut(idx).body = None;
            self.changed = true;
        }
    }

    fn remove_bodies_on_branch(&mut self, idx: RevIdx) {
        let mut cur = Some(idx);
        while let Some(i) = cur {
            self.remove_body(i);
            cur = self.rev(i).parent;
        }
    }

    /// Strip bodies of saved revisions that are no longer leaves.
    pub fn remove_non_leaf_bodies(&mut self) {
        for rev in &mut self.revs {
            if rev.body.is_some()
                && !rev.flags.intersects(RevFlags::LEAF | RevFlags::NEW | RevFlags::KEEP_BODY)
            {
                rev.body = None;
                self.changed = true;
            }
        }
    }

    // ---- Removal (prune / purge / compact):

    /// Mark and remove revisions more than `max_depth` steps from every
    /// leaf. KeepBody revisions and remote-pinned revisions are retained;
    /// survivors are re-parented across the gap. Returns the number purged.
    pub fn prune(&mut self, max_depth: u32) -> usize {
        assert!(max_depth > 0);
        if self.revs.len() <= max_depth as usize {
            return 0;
        }

        // Walk from each leaf toward the root, marking revs too far away:
        for i in 0..self.revs.len() {
            if !self.rev(RevIdx::new(i)).is_leaf() {
                continue;
            }
            let mut depth = 0u32;
            let mut cur = Some(RevIdx::new(i));
            while let Some(idx) = cur {
                depth += 1;
                if depth > max_depth && !self.rev(idx).keeps_body() {
                    self.rev_mut(idx).add_flag(RevFlags::PURGE);
                }
                cur = self.rev(idx).parent;
            }
        }

        // Never prune current remote revisions:
        let pinned: Vec<RevIdx> = self.remote_revs.values().copied().collect();
        for idx in pinned {
            self.rev_mut(idx).clear_flag(RevFlags::PURGE);
        }

        let num_pruned = self.revs.iter().filter(|r| r.is_marked_for_purge()).count();
        if num_pruned == 0 {
            return 0;
        }

        // Re-parent survivors across the revisions being pruned:
        for i in 0..self.revs.len() {
            if self.rev(RevIdx::new(i)).is_marked_for_purge() {
                continue;
            }
            let mut parent = self.rev(RevIdx::new(i)).parent;
            while let Some(p) = parent {
                if !self.rev(p).is_marked_for_purge() {
                    break;
                }
                parent = self.rev(p).parent;
            }
            self.rev_mut(RevIdx::new(i)).parent = parent;
        }
        self.compact();
        num_pruned
    }

    /// Remove the named leaf and every ancestor that becomes a leaf as a
    /// result, stopping at the first branch point.
    pub fn purge(&mut self, leaf_id: &RevId) -> usize {
        let Some(mut idx) = self.get(leaf_id) else {
            return 0;
        };
        if !self.rev(idx).is_leaf() {
            return 0;
        }
        let mut num_purged = 0;
        loop {
            num_purged += 1;
            self.rev_mut(idx).add_flag(RevFlags::PURGE);
            let parent = self.rev(idx).parent;
            self.rev_mut(idx).parent = None; // unlink
            match parent {
                Some(p) if self.confirm_leaf(p) => idx = p,
                _ => break,
            }
        }
        self.compact();
        self.check_for_resolved_conflict();
        num_purged
    }

    /// Remove every revision.
    pub fn purge_all(&mut self) -> usize {
        let num = self.revs.len();
        self.revs.clear();
        self.order.clear();
        self.remote_revs.clear();
        self.changed = true;
        self.sorted = true;
        num
    }

    /// `idx` becomes a leaf iff nothing lists it as parent.
    fn confirm_leaf(&mut self, idx: RevIdx) -> bool {
        if self.revs.iter().any(|r| r.parent == Some(idx)) {
            return false;
        }
        self.rev_mut(idx).add_flag(RevFlags::LEAF);
        true
    }

    /// Physically remove purge-marked revisions, rewriting all indices.
    fn compact(&mut self) {
        let mut remap: Vec<Option<RevIdx>> = vec![None; self.revs.len()];
        let mut kept = 0usize;
        for (i, rev) in self.revs.iter().enumerate() {
            if !rev.is_marked_for_purge() {
                remap[i] = Some(RevIdx::new(kept));
                kept += 1;
            }
        }
        self.revs.retain(|r| !r.is_marked_for_purge());
        for rev in &mut self.revs {
            rev.parent = rev.parent.and_then(|p| remap[p.index()]);
        }
        self.order = self
            .order
            .iter()
            .filter_map(|idx| remap[idx.index()])
            .collect();
        self.remote_revs = self
            .remote_revs
            .iter()
            .filter_map(|(&remote, &idx)| remap[idx.index()].map(|new| (remote, new)))
            .collect();
        self.changed = true;
    }

    // ---- Sorting:

    /// Bring `order` into priority order: leaves first, then non-conflicts,
    /// then live revisions, then non-closed, ties broken by descending
    /// revision ID.
    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        let revs = &self.revs;
        self.order.sort_by(|&a, &b| {
            let (ra, rb) = (&revs[a.index()], &revs[b.index()]);
            rb.is_leaf()
                .cmp(&ra.is_leaf())
                .then_with(|| ra.is_conflict().cmp(&rb.is_conflict()))
                .then_with(|| ra.is_deleted().cmp(&rb.is_deleted()))
                .then_with(|| ra.is_closed().cmp(&rb.is_closed()))
                .then_with(|| rb.rev_id.cmp(&ra.rev_id))
        });
        self.sorted = true;
        self.check_for_resolved_conflict();
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// If the head ended up being a conflict revision, the last non-conflict
    /// leaf is gone: its branch is now the winner, so clear the markers.
    fn check_for_resolved_conflict(&mut self) {
        if self.sorted && !self.order.is_empty() && self.rev(self.order[0]).is_conflict() {
            self.mark_branch_not_conflict(self.order[0], true);
        }
    }

    /// Clear conflict markers along a branch. On the winning branch the
    /// walk continues to the root and also enforces the one-KeepBody-per-
    /// branch rule; on a losing branch it stops at the branch's end.
    pub fn mark_branch_not_conflict(&mut self, branch: RevIdx, winning_branch: bool) {
        let mut keep_bodies = winning_branch;
        let mut cur = Some(branch);
        while let Some(idx) = cur {
            if self.rev(idx).is_conflict() {
                self.rev_mut(idx).clear_flag(RevFlags::IS_CONFLICT);
                self.changed = true;
                if !winning_branch {
                    return; // end of the conflicting branch
                }
            }
            if self.rev(idx).keeps_body() {
                if keep_bodies {
                    keep_bodies = false; // only one KeepBody per branch
                } else {
                    self.rev_mut(idx).clear_flag(RevFlags::KEEP_BODY);
                    self.changed = true;
                }
            }
            cur = self.rev(idx).parent;
        }
    }

    // ---- Saving:

    /// Any revisions inserted (or not yet sequenced) since the last save?
    pub fn has_new_revisions(&self) -> bool {
        self.revs.iter().any(|r| r.is_new() || r.sequence == 0)
    }

    /// Called after the store assigns `new_sequence` to the record: clears
    /// the `NEW` marker and stamps unsequenced revisions.
    pub fn saved(&mut self, new_sequence: u64) {
        for rev in &mut self.revs {
            rev.clear_flag(RevFlags::NEW);
            if rev.sequence == 0 {
                rev.sequence = new_sequence;
            }
        }
    }

    /// Zero a winning revision's sequence so the next save reassigns it.
    pub fn reset_conflict_sequence(&mut self, winner: RevIdx) {
        self.rev_mut(winner).sequence = 0;
    }
}
